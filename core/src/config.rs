//! Environment driven settings for log output.

use std::env;

/// Set to a true value to print the library's debug output.
pub const DEBUG_ENV: &str = "TP_RS_DEBUG";
/// Set to a false value to silence the library's warnings.
pub const WARNINGS_ENV: &str = "TP_RS_WARNINGS";
/// Filter directives for everything else, in `tracing_subscriber::EnvFilter` syntax.
pub const FILTER_ENV: &str = "RUST_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugConfig {
	pub debug: bool,
	pub warnings: bool,
	pub filter: Option<String>,
}
impl Default for DebugConfig {
	fn default() -> Self {
		DebugConfig {
			debug: false,
			warnings: true,
			filter: None,
		}
	}
}
impl DebugConfig {
	pub fn from_env() -> Self {
		Self::from_lookup(|key| env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let defaults = DebugConfig::default();
		DebugConfig {
			debug: lookup(DEBUG_ENV)
				.and_then(|v| parse_bool(&v))
				.unwrap_or(defaults.debug),
			warnings: lookup(WARNINGS_ENV)
				.and_then(|v| parse_bool(&v))
				.unwrap_or(defaults.warnings),
			filter: lookup(FILTER_ENV).filter(|v| !v.trim().is_empty()),
		}
	}
}

fn parse_bool(value: &str) -> Option<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

#[test]
fn config_from_lookup() {
	let config = DebugConfig::from_lookup(|key| match key {
		DEBUG_ENV => Some("Yes".to_string()),
		WARNINGS_ENV => Some("0".to_string()),
		FILTER_ENV => Some("  ".to_string()),
		_ => None,
	});
	assert_eq!(
		config,
		DebugConfig {
			debug: true,
			warnings: false,
			filter: None,
		}
	);

	let config = DebugConfig::from_lookup(|key| (key == DEBUG_ENV).then(|| "maybe".to_string()));
	assert_eq!(config, DebugConfig::default());
}
