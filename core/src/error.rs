use crate::constants::*;
use thiserror::Error;

pub type TpResult<T = ()> = Result<T, TpError>;

/// A D-Bus style error: a dotted error name plus a free-form message.
///
/// Errors coming back from the bus and errors synthesized locally (unsupported
/// features, invalidated proxies) share this one shape so they can be handed
/// to callers unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[error("{name}: {message}")]
pub struct TpError {
	pub name: String,
	pub message: String,
}
impl TpError {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		TpError {
			name: name.into(),
			message: message.into(),
		}
	}

	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::new(ERROR_INVALID_ARGUMENT, message)
	}
	pub fn not_available(message: impl Into<String>) -> Self {
		Self::new(ERROR_NOT_AVAILABLE, message)
	}
	pub fn not_yet(message: impl Into<String>) -> Self {
		Self::new(ERROR_NOT_YET, message)
	}
	pub fn cancelled(message: impl Into<String>) -> Self {
		Self::new(ERROR_CANCELLED, message)
	}
	pub fn disconnected(message: impl Into<String>) -> Self {
		Self::new(ERROR_DISCONNECTED, message)
	}

	pub fn name(&self) -> &str {
		&self.name
	}
	pub fn message(&self) -> &str {
		&self.message
	}
}

#[test]
fn error_display() {
	let e = TpError::not_available("no such thing");
	assert_eq!(
		e.to_string(),
		"org.freedesktop.Telepathy.Error.NotAvailable: no such thing"
	);
	assert_eq!(e.name(), ERROR_NOT_AVAILABLE);
}
