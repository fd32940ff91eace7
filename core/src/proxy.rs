//! Client-side handle for a remote D-Bus object.

use crate::{
	TpError,
	constants::ERROR_HANDLING_ERROR,
	event_loop::defer,
	feature::{Feature, Features},
	pending_ready::PendingReady,
	readiness_helper::ReadinessHelper,
	ready_object::ReadyObject,
};
use parking_lot::{Mutex, RwLock};
use std::{fmt, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Identity and validity of a remote object, plus its readiness.
///
/// Once invalidated (the service went away, the connection dropped) a proxy
/// stays invalid, and every readiness request on it fails with the
/// invalidation error.
pub struct DBusProxy {
	bus_name: RwLock<String>,
	object_path: String,
	invalidation: Mutex<Option<TpError>>,
	invalidated: Arc<watch::Sender<Option<TpError>>>,
	ready: ReadyObject,
}
impl DBusProxy {
	pub fn new(
		bus_name: impl Into<String>,
		object_path: impl Into<String>,
		core_feature: Feature,
	) -> Arc<Self> {
		let bus_name = bus_name.into();
		let object_path = object_path.into();
		debug!(%bus_name, %object_path, "creating new DBusProxy");
		let (invalidated, _) = watch::channel(None);
		Arc::new_cyclic(|proxy| DBusProxy {
			bus_name: RwLock::new(bus_name),
			object_path,
			invalidation: Mutex::new(None),
			invalidated: Arc::new(invalidated),
			ready: ReadyObject::for_proxy(proxy.clone(), core_feature),
		})
	}

	pub fn bus_name(&self) -> String {
		self.bus_name.read().clone()
	}
	/// Rebind to another bus name, typically the unique name owning the
	/// well-known one the proxy was created with.
	pub fn set_bus_name(&self, bus_name: impl Into<String>) {
		*self.bus_name.write() = bus_name.into();
	}
	pub fn object_path(&self) -> &str {
		&self.object_path
	}

	pub fn is_valid(&self) -> bool {
		self.invalidation.lock().is_none()
	}
	pub fn invalidation(&self) -> Option<TpError> {
		self.invalidation.lock().clone()
	}
	pub fn invalidation_reason(&self) -> Option<String> {
		self.invalidation().map(|e| e.name)
	}
	pub fn invalidation_message(&self) -> Option<String> {
		self.invalidation().map(|e| e.message)
	}

	/// Mark the proxy as no longer usable. Only the first invalidation counts.
	///
	/// [`Self::is_valid`] changes immediately; subscribers are notified on the
	/// next turn of the runtime.
	pub fn invalidate(&self, mut error: TpError) {
		{
			let mut invalidation = self.invalidation.lock();
			if let Some(existing) = invalidation.as_ref() {
				debug!("already invalidated by {existing}, not replacing with {error}");
				return;
			}
			if error.name.is_empty() {
				warn!(object_path = %self.object_path, "invalidated without an error name");
				error.name = ERROR_HANDLING_ERROR.to_string();
			}
			debug!(object_path = %self.object_path, %error, "proxy invalidated");
			*invalidation = Some(error.clone());
		}

		let invalidated = self.invalidated.clone();
		defer(move || {
			invalidated.send_replace(Some(error));
		});
	}

	/// Receiver that observes the invalidation once it has been announced.
	pub fn subscribe_invalidated(&self) -> watch::Receiver<Option<TpError>> {
		self.invalidated.subscribe()
	}

	pub fn ready_object(&self) -> &ReadyObject {
		&self.ready
	}
	pub fn readiness_helper(&self) -> &ReadinessHelper {
		self.ready.readiness_helper()
	}
	/// See [`ReadyObject::is_ready`].
	pub fn is_ready(&self, features: &Features) -> bool {
		self.ready.is_ready(features)
	}
	/// See [`ReadyObject::become_ready`].
	pub fn become_ready(&self, features: Features) -> PendingReady {
		self.ready.become_ready(features)
	}
}
impl fmt::Debug for DBusProxy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DBusProxy")
			.field("bus_name", &*self.bus_name.read())
			.field("object_path", &self.object_path)
			.field("invalidation", &*self.invalidation.lock())
			.finish()
	}
}

#[tokio::test]
async fn first_invalidation_wins() {
	use crate::pending_operation::settle;

	let proxy = DBusProxy::new(
		"org.example.Service",
		"/org/example/Object",
		Feature::critical("Proxy", 0),
	);
	let mut invalidated = proxy.subscribe_invalidated();
	assert!(proxy.is_valid());

	proxy.invalidate(TpError::disconnected("gone"));
	proxy.invalidate(TpError::cancelled("again"));
	assert!(!proxy.is_valid());
	assert_eq!(
		proxy.invalidation_reason().as_deref(),
		Some(crate::constants::ERROR_DISCONNECTED)
	);
	assert!(invalidated.borrow().is_none());

	settle().await;
	assert!(invalidated.has_changed().unwrap());
	assert_eq!(
		invalidated.borrow_and_update().clone(),
		Some(TpError::disconnected("gone"))
	);
}

#[tokio::test]
async fn invalid_proxy_fails_readiness() {
	const CORE: Feature = Feature::critical("Proxy", 0);
	let proxy = DBusProxy::new(":1.42", "/org/example/Object", CORE);
	proxy.invalidate(TpError::new(
		crate::constants::DBUS_ERROR_NAME_HAS_NO_OWNER,
		"Name owner lost (service crashed?)",
	));

	let ready = proxy.become_ready(Features::new());
	assert_eq!(
		ready.proxy().map(|p| p.object_path().to_string()).as_deref(),
		Some("/org/example/Object")
	);
	let error = ready.await.unwrap_err();
	assert_eq!(error.name, crate::constants::DBUS_ERROR_NAME_HAS_NO_OWNER);
	assert!(!proxy.is_ready(&Features::new()));
}
