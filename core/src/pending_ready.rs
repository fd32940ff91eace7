use crate::{
	DBusProxy, TpError, TpResult, event_loop::try_spawn, feature::Features,
	pending_operation::PendingOperation,
};
use futures::future::BoxFuture;
use std::{
	fmt,
	future::IntoFuture,
	ops::Deref,
	sync::{Arc, Weak},
};
use tracing::warn;

/// The result of asking an object to become ready for a set of features.
#[derive(Clone)]
pub struct PendingReady {
	operation: PendingOperation,
	requested_features: Features,
	proxy: Option<Weak<DBusProxy>>,
}
impl PendingReady {
	pub(crate) fn new(requested_features: Features, proxy: Option<Weak<DBusProxy>>) -> Self {
		PendingReady {
			operation: PendingOperation::new("PendingReady"),
			requested_features,
			proxy,
		}
	}

	/// Make `proxy` ready for `requested_features`, mirroring the outcome of
	/// its own [`DBusProxy::become_ready`]. An empty feature set succeeds
	/// without asking the proxy. Outside of a tokio runtime the result cannot
	/// be forwarded and the operation fails with `NotAvailable`.
	pub fn nested(proxy: &Arc<DBusProxy>, requested_features: Features) -> Self {
		let ready = PendingReady::new(requested_features.clone(), Some(Arc::downgrade(proxy)));
		if requested_features.is_empty() {
			ready.set_finished();
			return ready;
		}

		let nested = proxy.become_ready(requested_features).finished();
		let operation = ready.operation.clone();
		let object_path = proxy.object_path().to_string();
		let spawned = try_spawn(async move {
			match nested.await {
				Ok(()) => operation.set_finished(),
				Err(error) => {
					warn!(%object_path, %error, "nested PendingReady failed");
					operation.set_finished_with_error(error);
				}
			}
		});
		if !spawned {
			ready.set_finished_with_error(TpError::not_available(
				"No tokio runtime to wait for the proxy on",
			));
		}
		ready
	}

	pub fn requested_features(&self) -> &Features {
		&self.requested_features
	}
	/// The proxy this operation belongs to, if it is still alive.
	pub fn proxy(&self) -> Option<Arc<DBusProxy>> {
		self.proxy.as_ref()?.upgrade()
	}
	pub fn operation(&self) -> &PendingOperation {
		&self.operation
	}
}
impl Deref for PendingReady {
	type Target = PendingOperation;

	fn deref(&self) -> &PendingOperation {
		&self.operation
	}
}
impl IntoFuture for PendingReady {
	type Output = TpResult;
	type IntoFuture = BoxFuture<'static, TpResult>;

	fn into_future(self) -> Self::IntoFuture {
		self.operation.into_future()
	}
}
impl fmt::Debug for PendingReady {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingReady")
			.field("requested_features", &self.requested_features)
			.field("operation", &self.operation)
			.finish()
	}
}

#[test]
fn nested_without_runtime_fails() {
	use crate::{Feature, constants::ERROR_NOT_AVAILABLE};

	const CORE: Feature = Feature::critical("Proxy", 0);
	let proxy = DBusProxy::new(":1.3", "/org/example/Object", CORE);
	let ready = PendingReady::nested(&proxy, crate::features![CORE]);
	assert!(ready.is_finished());
	assert_eq!(ready.error_name().as_deref(), Some(ERROR_NOT_AVAILABLE));
}
