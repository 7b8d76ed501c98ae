/*!
 * Core identifier types for vcom.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle of a host device object.
///
/// The host framework hands one out per created device; the driver uses it
/// to find the device's state record again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    /// Create a new handle with a random UUID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a handle from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the handle
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for DeviceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for DeviceHandle {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for DeviceHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Device-interface class identifier
pub type InterfaceClass = Uuid;

/// `GUID_DEVINTERFACE_COMPORT`, the class generic serial clients enumerate
pub const GUID_DEVINTERFACE_COMPORT: InterfaceClass =
    Uuid::from_u128(0x86E0D1E0_8089_11D0_9CE4_08003E301F73);
