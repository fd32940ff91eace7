//! Introspectables backed by `org.freedesktop.DBus.Properties.GetAll`.

use crate::tp_error;
use std::{
	collections::HashMap,
	sync::{Arc, Weak},
};
use telepathy_core::{DBusProxy, Features, Introspectable, TpError, TpResult};
use tokio::runtime::Handle;
use tracing::{debug, warn};
use zbus::{Connection, Proxy, zvariant::OwnedValue};

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

pub type PropertyMap = HashMap<String, OwnedValue>;

/// Fetch every property of `interface` on the object behind `proxy`.
pub async fn get_all(
	connection: &Connection,
	proxy: &DBusProxy,
	interface: &str,
) -> TpResult<PropertyMap> {
	let properties = Proxy::new(
		connection,
		proxy.bus_name(),
		proxy.object_path().to_string(),
		PROPERTIES_INTERFACE,
	)
	.await
	.map_err(|e| tp_error(&e))?;
	properties
		.call("GetAll", &(interface,))
		.await
		.map_err(|e| tp_error(&e))
}

/// An [`Introspectable`] that fetches the properties of `interface` and
/// hands them to `on_properties`, whose result completes the feature.
///
/// The feature also depends on the object implementing `interface`, so it
/// is reported missing without a round trip when the interface is absent.
pub fn properties_introspectable<F>(
	connection: &Connection,
	proxy: &Arc<DBusProxy>,
	interface: &'static str,
	makes_sense_for_statuses: impl IntoIterator<Item = u32>,
	depends_on_features: Features,
	on_properties: F,
) -> Introspectable
where
	F: Fn(PropertyMap) -> TpResult + Send + Sync + 'static,
{
	let connection = connection.clone();
	let proxy: Weak<DBusProxy> = Arc::downgrade(proxy);
	let on_properties = Arc::new(on_properties);
	Introspectable::new(
		makes_sense_for_statuses,
		depends_on_features,
		&[interface],
		move |request| {
			let Some(proxy) = proxy.upgrade() else {
				request.complete(Err(TpError::cancelled("Proxy was destroyed")));
				return;
			};
			let Ok(runtime) = Handle::try_current() else {
				warn!(feature = %request.feature(), "no tokio runtime to get properties on");
				request.complete(Err(TpError::not_available(
					"No tokio runtime to get properties on",
				)));
				return;
			};
			let connection = connection.clone();
			let on_properties = on_properties.clone();
			runtime.spawn(async move {
				debug!(feature = %request.feature(), interface, "getting properties");
				let result = match get_all(&connection, &proxy, interface).await {
					Ok(properties) => on_properties(properties),
					Err(error) => Err(error),
				};
				request.complete(result);
			});
		},
	)
}

#[ignore = "needs a session bus"]
#[tokio::test]
async fn bus_daemon_properties() {
	use telepathy_core::{Feature, Introspectables, features};

	const CORE: Feature = Feature::critical("BusDaemon", 0);
	let connection = crate::connect_to(crate::BusKind::Session).await.unwrap();
	let proxy = DBusProxy::new("org.freedesktop.DBus", "/org/freedesktop/DBus", CORE);
	proxy.readiness_helper().set_interfaces(["org.freedesktop.DBus"]);
	proxy
		.readiness_helper()
		.add_introspectables(Introspectables::from([(
			CORE,
			properties_introspectable(
				&connection,
				&proxy,
				"org.freedesktop.DBus",
				[0],
				features![],
				|properties| {
					if properties.contains_key("Interfaces") {
						Ok(())
					} else {
						Err(TpError::not_available("no Interfaces property"))
					}
				},
			),
		)]));

	assert_eq!(proxy.become_ready(features![]).await, Ok(()));
	assert!(proxy.is_ready(&features![]));
}
