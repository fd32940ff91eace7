//! D-Bus error names raised or synthesized by the readiness machinery.

pub const ERROR_INVALID_ARGUMENT: &str = "org.freedesktop.Telepathy.Error.InvalidArgument";
pub const ERROR_NOT_AVAILABLE: &str = "org.freedesktop.Telepathy.Error.NotAvailable";
pub const ERROR_NOT_YET: &str = "org.freedesktop.Telepathy.Error.NotYet";
pub const ERROR_CANCELLED: &str = "org.freedesktop.Telepathy.Error.Cancelled";
pub const ERROR_DISCONNECTED: &str = "org.freedesktop.Telepathy.Error.Disconnected";

/// Substituted when an operation is failed with an empty error name.
pub const ERROR_HANDLING_ERROR: &str = "org.freedesktop.Telepathy.Qt.ErrorHandlingError";

pub const DBUS_ERROR_NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
pub const DBUS_ERROR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";
