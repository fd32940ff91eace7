use telepathy_core::{TpError, constants::DBUS_ERROR_FAILED};
use zbus::{DBusError, fdo};

/// Convert a zbus error into the [`TpError`] handed to callers.
///
/// Errors replied by the remote side keep their D-Bus name and message.
/// Everything else (transport failures, bad signatures) becomes
/// `org.freedesktop.DBus.Error.Failed` with zbus' description.
pub fn tp_error(error: &zbus::Error) -> TpError {
	match error {
		zbus::Error::MethodError(name, message, _) => {
			TpError::new(name.to_string(), message.clone().unwrap_or_default())
		}
		zbus::Error::FDO(error) => fdo_tp_error(error),
		other => TpError::new(DBUS_ERROR_FAILED, other.to_string()),
	}
}

pub fn fdo_tp_error(error: &fdo::Error) -> TpError {
	match error {
		fdo::Error::ZBus(error) => tp_error(error),
		error => TpError::new(
			error.name().as_str(),
			error.description().unwrap_or_default(),
		),
	}
}

#[test]
fn fdo_errors_keep_their_name() {
	use telepathy_core::constants::DBUS_ERROR_NAME_HAS_NO_OWNER;

	let error = fdo_tp_error(&fdo::Error::NameHasNoOwner("nobody home".to_string()));
	assert_eq!(error, TpError::new(DBUS_ERROR_NAME_HAS_NO_OWNER, "nobody home"));

	let boxed = zbus::Error::FDO(Box::new(fdo::Error::NameHasNoOwner("boxed".to_string())));
	assert_eq!(tp_error(&boxed).name, DBUS_ERROR_NAME_HAS_NO_OWNER);
}

#[test]
fn local_failures_become_failed() {
	let error = tp_error(&zbus::Error::Failure("socket closed".to_string()));
	assert_eq!(error.name, DBUS_ERROR_FAILED);
	assert!(error.message.contains("socket closed"));
}
