use crate::tp_error;
use std::future::Future;
use telepathy_core::{PendingOperation, spawn_operation};

/// A [`PendingOperation`] for a D-Bus call whose reply carries nothing the
/// caller needs.
pub struct PendingVoid;
impl PendingVoid {
	pub fn spawn<T, F>(call: F) -> PendingOperation
	where
		F: Future<Output = zbus::Result<T>> + Send + 'static,
	{
		spawn_operation("PendingVoid", async move {
			call.await.map(|_| ()).map_err(|e| tp_error(&e))
		})
	}
}

#[tokio::test]
async fn reply_becomes_result() {
	use telepathy_core::constants::DBUS_ERROR_FAILED;

	let ok = PendingVoid::spawn(async { zbus::Result::Ok(42u32) });
	assert_eq!(ok.await, Ok(()));

	let failed = PendingVoid::spawn(async {
		zbus::Result::<()>::Err(zbus::Error::Failure("no reply".to_string()))
	});
	let error = failed.await.unwrap_err();
	assert_eq!(error.name, DBUS_ERROR_FAILED);
}

#[ignore = "needs a session bus"]
#[tokio::test]
async fn ping_the_bus() {
	let connection = crate::connect_to(crate::BusKind::Session).await.unwrap();
	let operation = PendingVoid::spawn(async move {
		let peer = zbus::fdo::PeerProxy::builder(&connection)
			.destination("org.freedesktop.DBus")?
			.path("/org/freedesktop/DBus")?
			.build()
			.await?;
		peer.ping().await.map_err(zbus::Error::from)
	});
	assert_eq!(operation.await, Ok(()));
}
