//! Switches for the library's own log output.
//!
//! The library logs through `tracing`. Applications with their own subscriber
//! can ignore this module entirely. Others can call [`init`] to get output on
//! stderr, toggled at runtime with [`enable_debug`] and [`enable_warnings`],
//! or routed elsewhere with [`set_debug_callback`].

use crate::config::DebugConfig;
use parking_lot::RwLock;
use std::{
	fmt::{self, Write},
	sync::atomic::{AtomicBool, Ordering},
};
use tracing::{Event, Level, Metadata, Subscriber, field::Field};
use tracing_subscriber::{
	EnvFilter, Layer,
	field::Visit,
	filter::filter_fn,
	layer::{Context, SubscriberExt},
	util::{SubscriberInitExt, TryInitError},
};

/// Receives every library message that passes the debug/warning switches,
/// instead of it being printed: `(domain, version, level, message)`.
pub type DebugCallback = fn(&str, &str, Level, &str);

const DOMAIN: &str = "telepathy-rs";
const VERSION: &str = env!("CARGO_PKG_VERSION");

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static WARNINGS_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_CALLBACK: RwLock<Option<DebugCallback>> = parking_lot::const_rwlock(None);

pub fn enable_debug(enable: bool) {
	DEBUG_ENABLED.store(enable, Ordering::Relaxed);
}
pub fn enable_warnings(enable: bool) {
	WARNINGS_ENABLED.store(enable, Ordering::Relaxed);
}
pub fn set_debug_callback(callback: Option<DebugCallback>) {
	*DEBUG_CALLBACK.write() = callback;
}

fn is_library_target(target: &str) -> bool {
	target.starts_with("telepathy_")
}

/// Whether a library event passes the current switches. Events from other
/// crates are left to the rest of the subscriber.
fn switched_on(metadata: &Metadata<'_>) -> bool {
	if !is_library_target(metadata.target()) {
		return true;
	}
	match *metadata.level() {
		Level::ERROR | Level::WARN => WARNINGS_ENABLED.load(Ordering::Relaxed),
		_ => DEBUG_ENABLED.load(Ordering::Relaxed),
	}
}

#[derive(Default)]
struct MessageVisitor {
	message: String,
}
impl Visit for MessageVisitor {
	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		if field.name() == "message" {
			let _ = write!(self.message, "{value:?}");
		} else {
			let _ = write!(self.message, " {}={value:?}", field.name());
		}
	}
}

/// Forwards library events to the registered [`DebugCallback`].
pub struct CallbackLayer;
impl<S: Subscriber> Layer<S> for CallbackLayer {
	fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
		let Some(callback) = *DEBUG_CALLBACK.read() else {
			return;
		};
		let metadata = event.metadata();
		if !is_library_target(metadata.target()) || !switched_on(metadata) {
			return;
		}
		let mut visitor = MessageVisitor::default();
		event.record(&mut visitor);
		callback(DOMAIN, VERSION, *metadata.level(), &visitor.message);
	}
}

fn env_filter(config: &DebugConfig) -> EnvFilter {
	let mut directives = config.filter.clone().unwrap_or_else(|| "warn".to_string());
	if config.debug {
		directives.push_str(",telepathy_core=debug,telepathy_dbus=debug");
	}
	EnvFilter::new(directives)
}

/// Install a global subscriber printing to stderr, configured by `config`.
pub fn init(config: &DebugConfig) -> Result<(), TryInitError> {
	enable_debug(config.debug);
	enable_warnings(config.warnings);

	let printer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stderr)
		.with_filter(filter_fn(|metadata| {
			switched_on(metadata)
				&& (DEBUG_CALLBACK.read().is_none() || !is_library_target(metadata.target()))
		}));

	tracing_subscriber::registry()
		.with(env_filter(config))
		.with(printer)
		.with(CallbackLayer)
		.try_init()
}

#[test]
fn switches_gate_library_events() {
	static SEEN: parking_lot::Mutex<Vec<(Level, String)>> = parking_lot::const_mutex(Vec::new());
	fn record(domain: &str, _version: &str, level: Level, message: &str) {
		assert_eq!(domain, DOMAIN);
		SEEN.lock().push((level, message.to_string()));
	}

	let subscriber = tracing_subscriber::registry().with(CallbackLayer);
	set_debug_callback(Some(record));
	tracing::subscriber::with_default(subscriber, || {
		enable_debug(false);
		enable_warnings(true);
		tracing::debug!(target: "telepathy_core::test", "hidden");
		tracing::warn!(target: "telepathy_core::test", "shown");
		tracing::warn!(target: "some_other_crate", "not ours");

		enable_debug(true);
		tracing::debug!(target: "telepathy_core::test", count = 2, "now shown");
		enable_warnings(false);
		tracing::warn!(target: "telepathy_core::test", "hidden again");
	});
	set_debug_callback(None);
	enable_debug(false);
	enable_warnings(true);

	assert_eq!(
		&*SEEN.lock(),
		&[
			(Level::WARN, "shown".to_string()),
			(Level::DEBUG, "now shown count=2".to_string()),
		]
	);
}

#[test]
fn debug_adds_library_directives() {
	let config = DebugConfig {
		debug: true,
		warnings: true,
		filter: Some("info".to_string()),
	};
	let filter = env_filter(&config).to_string();
	assert!(filter.contains("telepathy_core=debug"));
	assert!(filter.contains("info"));
}
