//! Proxies bound to a bus connection.

use crate::{fdo_tp_error, tp_error};
use std::{ops::Deref, sync::Arc};
use telepathy_core::{
	DBusProxy, Feature, TpError, TpResult, constants::DBUS_ERROR_NAME_HAS_NO_OWNER,
};
use tokio::task::AbortHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use zbus::{Connection, fdo, names::BusName};

/// Aborts the task when dropped.
pub struct AbortOnDrop {
	abort_handle: AbortHandle,
}
impl AbortOnDrop {
	pub fn new(abort_handle: AbortHandle) -> Self {
		AbortOnDrop { abort_handle }
	}
	pub fn abort(&self) {
		self.abort_handle.abort();
	}
	pub fn is_finished(&self) -> bool {
		self.abort_handle.is_finished()
	}
}
impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.abort_handle.abort();
	}
}

pub fn is_unique_name(name: &str) -> bool {
	name.starts_with(':')
}

/// Resolve `name` to the unique name currently owning it. Unique names are
/// returned unchanged.
pub async fn unique_name_from(connection: &Connection, name: &str) -> TpResult<String> {
	if is_unique_name(name) {
		return Ok(name.to_string());
	}
	let bus = fdo::DBusProxy::new(connection)
		.await
		.map_err(|e| tp_error(&e))?;
	unique_name_with(&bus, name).await
}

async fn unique_name_with(bus: &fdo::DBusProxy<'_>, name: &str) -> TpResult<String> {
	if is_unique_name(name) {
		return Ok(name.to_string());
	}
	let name = BusName::try_from(name).map_err(|e| TpError::invalid_argument(e.to_string()))?;
	let owner = bus
		.get_name_owner(name)
		.await
		.map_err(|e| fdo_tp_error(&e))?;
	Ok(owner.to_string())
}

/// Whether a `NameOwnerChanged` signal means the service behind `watched` went away.
fn owner_lost(watched: &str, name: &str, new_owner: Option<&str>) -> bool {
	name == watched && new_owner.is_none_or(str::is_empty)
}

/// A remote object whose state does not survive its service exiting, such as
/// a connection or a channel.
///
/// The proxy binds to the unique name owning the bus name it was created
/// with, and is invalidated once that owner goes away.
pub struct StatefulDBusProxy {
	proxy: Arc<DBusProxy>,
	connection: Connection,
	original_name: String,
	_name_watch: Option<AbortOnDrop>,
}
impl StatefulDBusProxy {
	pub async fn new(
		connection: &Connection,
		bus_name: impl Into<String>,
		object_path: impl Into<String>,
		core_feature: Feature,
	) -> Self {
		let original_name = bus_name.into();
		let proxy = DBusProxy::new(original_name.clone(), object_path, core_feature);
		let name_watch = match Self::bind(connection, &proxy, &original_name).await {
			Ok(name_watch) => Some(name_watch),
			Err(error) => {
				proxy.invalidate(error);
				None
			}
		};
		StatefulDBusProxy {
			proxy,
			connection: connection.clone(),
			original_name,
			_name_watch: name_watch,
		}
	}

	/// Start watching the owner of `original_name`, then switch the proxy to
	/// the unique name owning it. Subscribing first means an owner change
	/// between the two steps is still seen.
	async fn bind(
		connection: &Connection,
		proxy: &Arc<DBusProxy>,
		original_name: &str,
	) -> TpResult<AbortOnDrop> {
		let bus = fdo::DBusProxy::new(connection)
			.await
			.map_err(|e| tp_error(&e))?;
		let mut owner_changes = bus
			.receive_name_owner_changed()
			.await
			.map_err(|e| tp_error(&e))?;

		let unique_name = unique_name_with(&bus, original_name).await?;
		debug!(original_name, %unique_name, "bound to unique name");
		proxy.set_bus_name(unique_name);

		let proxy = Arc::downgrade(proxy);
		let original_name = original_name.to_string();
		let task = tokio::spawn(async move {
			while let Some(signal) = owner_changes.next().await {
				let Ok(args) = signal.args() else {
					continue;
				};
				let new_owner = (*args.new_owner).as_ref().map(|owner| owner.as_str());
				if !owner_lost(&original_name, args.name.as_str(), new_owner) {
					continue;
				}
				let Some(proxy) = proxy.upgrade() else {
					return;
				};
				if proxy.is_valid() {
					proxy.invalidate(TpError::new(
						DBUS_ERROR_NAME_HAS_NO_OWNER,
						"Name owner lost (service crashed?)",
					));
				}
				return;
			}
		});
		Ok(AbortOnDrop::new(task.abort_handle()))
	}

	pub fn proxy(&self) -> &Arc<DBusProxy> {
		&self.proxy
	}
	pub fn connection(&self) -> &Connection {
		&self.connection
	}
	/// The bus name the proxy was created with, before resolving it.
	pub fn original_name(&self) -> &str {
		&self.original_name
	}
}
impl Deref for StatefulDBusProxy {
	type Target = DBusProxy;

	fn deref(&self) -> &DBusProxy {
		&self.proxy
	}
}

/// A remote object whose API holds no per-client state, so following whoever
/// owns its well-known name is fine.
pub struct StatelessDBusProxy {
	proxy: Arc<DBusProxy>,
	connection: Connection,
}
impl StatelessDBusProxy {
	pub fn new(
		connection: &Connection,
		bus_name: impl Into<String>,
		object_path: impl Into<String>,
		core_feature: Feature,
	) -> Self {
		let bus_name = bus_name.into();
		if is_unique_name(&bus_name) {
			warn!(
				%bus_name,
				"using a unique name for a stateless proxy, it will not follow owner changes"
			);
		}
		StatelessDBusProxy {
			proxy: DBusProxy::new(bus_name, object_path, core_feature),
			connection: connection.clone(),
		}
	}

	pub fn proxy(&self) -> &Arc<DBusProxy> {
		&self.proxy
	}
	pub fn connection(&self) -> &Connection {
		&self.connection
	}
}
impl Deref for StatelessDBusProxy {
	type Target = DBusProxy;

	fn deref(&self) -> &DBusProxy {
		&self.proxy
	}
}

#[test]
fn unique_names() {
	assert!(is_unique_name(":1.42"));
	assert!(!is_unique_name("org.freedesktop.Telepathy.AccountManager"));
}

#[test]
fn owner_loss_detection() {
	let watched = "org.freedesktop.Telepathy.Connection.gabble.jabber.me";
	assert!(owner_lost(watched, watched, None));
	assert!(owner_lost(watched, watched, Some("")));
	assert!(!owner_lost(watched, watched, Some(":1.9")));
	assert!(!owner_lost(watched, "org.example.Other", None));
}

#[ignore = "needs a session bus"]
#[tokio::test]
async fn binds_to_the_unique_owner() {
	const CORE: Feature = Feature::critical("BusDaemon", 0);
	let connection = crate::connect_to(crate::BusKind::Session).await.unwrap();

	let proxy = StatefulDBusProxy::new(
		&connection,
		"org.freedesktop.DBus",
		"/org/freedesktop/DBus",
		CORE,
	)
	.await;
	assert!(proxy.is_valid());
	assert_eq!(proxy.original_name(), "org.freedesktop.DBus");

	let missing = StatefulDBusProxy::new(
		&connection,
		"org.example.NobodyOwnsThis",
		"/org/example/Nothing",
		CORE,
	)
	.await;
	assert!(!missing.is_valid());
	assert_eq!(
		missing.invalidation_reason().as_deref(),
		Some(DBUS_ERROR_NAME_HAS_NO_OWNER)
	);
}

#[ignore = "needs a session bus"]
#[tokio::test]
async fn stateful_proxy_sees_its_owner_leave() {
	const CORE: Feature = Feature::critical("Service", 0);
	let name = "org.example.TelepathyRs.OwnerLoss";
	let service = crate::connect_to(crate::BusKind::Session).await.unwrap();
	service.request_name(name).await.unwrap();

	let client = crate::connect_to(crate::BusKind::Session).await.unwrap();
	let proxy = StatefulDBusProxy::new(&client, name, "/org/example/Object", CORE).await;
	assert_eq!(
		Some(proxy.bus_name().as_str()),
		service.unique_name().map(|n| n.as_str())
	);
	let mut invalidated = proxy.subscribe_invalidated();

	service.release_name(name).await.unwrap();
	let error = invalidated
		.wait_for(Option::is_some)
		.await
		.unwrap()
		.clone()
		.unwrap();
	assert_eq!(error.name, DBUS_ERROR_NAME_HAS_NO_OWNER);
}
