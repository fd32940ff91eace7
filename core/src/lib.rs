//! Readiness machinery shared by every Telepathy client proxy.
//!
//! A proxy's state is split into [`Feature`]s that are fetched lazily, in
//! dependency order, by its [`ReadinessHelper`]. Callers ask for features with
//! `become_ready` and await the returned [`PendingReady`].

/// D-Bus error names used across the crate
pub mod constants;
/// The error type every operation fails with
pub mod error;
/// Feature identity and feature sets
#[macro_use]
pub mod feature;

mod event_loop;

/// One-shot asynchronous results
pub mod pending_operation;
/// Result of a readiness request
pub mod pending_ready;
/// Dependency-ordered introspection scheduler
pub mod readiness_helper;
/// Objects that expose readiness for a core feature
pub mod ready_object;
/// Remote object handles
pub mod proxy;

/// Environment driven log settings
pub mod config;
/// Runtime switches for the library's log output
pub mod debug;

pub use error::{TpError, TpResult};
pub use feature::{Feature, Features};
pub use pending_operation::{PendingComposite, PendingOperation, spawn_operation};
pub use pending_ready::PendingReady;
pub use proxy::DBusProxy;
pub use readiness_helper::{
	IntrospectFunc, IntrospectRequest, Introspectable, Introspectables, ReadinessHelper,
};
pub use ready_object::ReadyObject;
