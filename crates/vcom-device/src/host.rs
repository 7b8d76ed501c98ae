/*!
 * Host framework collaborator traits.
 *
 * The driver never owns device objects or registry storage itself. Everything
 * it needs from the host framework (device creation, interface and symbolic
 * link publication, registry keys, device properties) goes through the
 * `DeviceHost` trait defined here.
 */
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vcom_core::types::{DeviceHandle, InterfaceClass};

/// Failure reported by the host framework or its registry store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The object, key or value does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The host ran out of resources
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// The caller lacks the required access
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Any other failing status
    #[error("Host operation failed: {0}")]
    Failed(String),
}

/// Result type for host operations
pub type HostResult<T> = std::result::Result<T, HostError>;

impl HostError {
    /// Whether the error means the target simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }
}

/// A typed registry value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryValue {
    /// String value
    String(String),
    /// 32-bit value
    Dword(u32),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl RegistryValue {
    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for RegistryValue {
    fn from(s: &str) -> Self {
        RegistryValue::String(s.to_string())
    }
}

impl From<u32> for RegistryValue {
    fn from(v: u32) -> Self {
        RegistryValue::Dword(v)
    }
}

/// An open registry key.
///
/// The handle is released when the value is dropped, so a key acquired with
/// `?` in scope is closed on every exit path.
pub trait RegistryKey: Send + Debug {
    /// Full path of the key
    fn path(&self) -> &str;

    /// Read a named value
    fn query_value(&self, name: &str) -> HostResult<RegistryValue>;

    /// Create or replace a string value
    fn assign_string(&mut self, name: &str, value: &str) -> HostResult<()>;

    /// Remove a named value
    fn remove_value(&mut self, name: &str) -> HostResult<()>;

    /// Names of the values currently stored under the key
    fn value_names(&self) -> HostResult<Vec<String>>;

    /// Delete the key itself
    fn remove_key(&mut self) -> HostResult<()>;
}

/// Callback the host invokes when it destroys a device object
pub type CleanupHook = Arc<dyn Fn(&DeviceHandle) + Send + Sync>;

/// Per-device initialization data handed to the driver by the host when a
/// device node appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInit {
    /// Instance path of the device node
    pub instance_id: String,
}

impl DeviceInit {
    /// Create initialization data for a device node
    pub fn new<S: Into<String>>(instance_id: S) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }
}

/// The host framework as seen by the driver
pub trait DeviceHost: Send + Sync + Debug {
    /// Create the device object and register its cleanup hook
    fn create_device(&self, init: DeviceInit, cleanup: CleanupHook) -> HostResult<DeviceHandle>;

    /// Publish the device under a device-interface class
    fn create_device_interface(&self, device: &DeviceHandle, class: InterfaceClass) -> HostResult<()>;

    /// Open the device's own hardware key for reading
    fn open_hardware_key(&self, device: &DeviceHandle) -> HostResult<Box<dyn RegistryKey>>;

    /// Make the device openable under a global name
    fn create_symbolic_link(&self, device: &DeviceHandle, name: &str) -> HostResult<()>;

    /// Query the name of the underlying physical device object
    fn query_physical_device_name(&self, device: &DeviceHandle) -> HostResult<String>;

    /// Open (creating if absent) a sub-key of `HARDWARE\DEVICEMAP`
    fn open_device_map_key(&self, device: &DeviceHandle, subkey: &str) -> HostResult<Box<dyn RegistryKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_kind() {
        assert!(HostError::NotFound("x".into()).is_not_found());
        assert!(!HostError::Failed("x".into()).is_not_found());
        assert_eq!(
            HostError::AccessDenied("SERIALCOMM".into()).to_string(),
            "Access denied: SERIALCOMM"
        );
    }

    #[test]
    fn test_registry_value_conversions() {
        let v: RegistryValue = "COM7".into();
        assert_eq!(v.as_str(), Some("COM7"));

        let v: RegistryValue = 9600u32.into();
        assert_eq!(v.as_str(), None);
        assert_eq!(v, RegistryValue::Dword(9600));
    }
}
