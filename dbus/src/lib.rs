//! zbus plumbing for Telepathy client proxies.

pub mod error;
pub mod pending_void;
pub mod properties;
pub mod proxy;

pub use error::{fdo_tp_error, tp_error};
pub use pending_void::PendingVoid;
pub use properties::properties_introspectable;
pub use proxy::{
	AbortOnDrop, StatefulDBusProxy, StatelessDBusProxy, is_unique_name, unique_name_from,
};

pub use telepathy_core;
pub use zbus;

use std::env;
use zbus::conn;

/// Picks the bus a client connects to.
pub const BUS_ENV: &str = "TP_RS_BUS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
	#[default]
	Session,
	System,
}
impl BusKind {
	/// Read [`BUS_ENV`]. Unset or unrecognised values mean the session bus.
	pub fn from_env() -> Self {
		Self::parse(env::var(BUS_ENV).ok().as_deref())
	}

	fn parse(value: Option<&str>) -> Self {
		match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
			Some("system") => BusKind::System,
			Some("session") | Some("") | None => BusKind::Session,
			Some(other) => {
				tracing::warn!(value = other, "unknown {BUS_ENV} value, using the session bus");
				BusKind::Session
			}
		}
	}
}

/// Connect to the bus chosen by [`BusKind::from_env`].
pub async fn connect() -> zbus::Result<zbus::Connection> {
	connect_to(BusKind::from_env()).await
}

pub async fn connect_to(kind: BusKind) -> zbus::Result<zbus::Connection> {
	let builder = match kind {
		BusKind::Session => conn::Builder::session()?,
		BusKind::System => conn::Builder::system()?,
	};
	builder.build().await
}

#[test]
fn bus_kind_parsing() {
	assert_eq!(BusKind::parse(None), BusKind::Session);
	assert_eq!(BusKind::parse(Some(" System ")), BusKind::System);
	assert_eq!(BusKind::parse(Some("session")), BusKind::Session);
	assert_eq!(BusKind::parse(Some("starbus")), BusKind::Session);
}

#[ignore = "needs a session bus"]
#[tokio::test]
async fn connect_session() {
	for _ in 0..4 {
		let connection = connect_to(BusKind::Session).await.unwrap();
		assert!(connection.unique_name().is_some());
	}
}
