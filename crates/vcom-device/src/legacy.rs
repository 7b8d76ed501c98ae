/*!
 * Legacy port map registration.
 *
 * Older enumeration tools find serial ports by scanning
 * `HARDWARE\DEVICEMAP\SERIALCOMM`, where every port is a string value named
 * after the physical device object and holding the port name. Writing that
 * value can fail the caller. Removing it never does: cleanup runs on the
 * host's device-destruction path and only reports what went wrong.
 */
use tracing::{debug, error, info, warn};

use vcom_core::config::PortConfig;
use vcom_core::types::DeviceHandle;

use crate::error::{DeviceError, Result};
use crate::host::{DeviceHost, HostError};
use crate::port_name::PortName;

/// Outcome of removing the identity value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRemoval {
    /// The location could not be opened, nothing was tried
    NotAttempted,
    /// The value was removed
    Removed,
    /// There was no value to remove
    AlreadyAbsent,
    /// The store refused the removal
    Failed(HostError),
}

/// Outcome of removing the port map key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRemoval {
    /// The location could not be opened, nothing was tried
    NotAttempted,
    /// The key was deleted
    Removed,
    /// Other devices still have values under the key
    Retained {
        /// Number of values left
        remaining: usize,
    },
    /// The key could not be listed or deleted
    Failed(HostError),
}

/// What a legacy port map cleanup did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Error opening the location, if any
    pub open_error: Option<HostError>,
    /// Value removal outcome
    pub value: ValueRemoval,
    /// Key removal outcome
    pub key: KeyRemoval,
}

impl CleanupReport {
    fn unopened(error: HostError) -> Self {
        Self {
            open_error: Some(error),
            value: ValueRemoval::NotAttempted,
            key: KeyRemoval::NotAttempted,
        }
    }

    /// Whether the identity value is known to be gone
    pub fn entry_absent(&self) -> bool {
        matches!(self.value, ValueRemoval::Removed | ValueRemoval::AlreadyAbsent)
    }

    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.open_error.is_none()
            && self.entry_absent()
            && matches!(self.key, KeyRemoval::Removed | KeyRemoval::Retained { .. })
    }
}

/// Writes and removes `identity -> port name` in the legacy port map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPortMap {
    subkey: String,
}

impl LegacyPortMap {
    /// Create a registrar for a `HARDWARE\DEVICEMAP` sub-key
    pub fn new<S: Into<String>>(subkey: S) -> Self {
        Self {
            subkey: subkey.into(),
        }
    }

    /// Create a registrar from the port configuration
    pub fn from_config(config: &PortConfig) -> Self {
        Self::new(config.device_map_subkey.clone())
    }

    /// The device map sub-key
    pub fn subkey(&self) -> &str {
        &self.subkey
    }

    /// Write the port map entry for a device.
    ///
    /// The caller records the registration once this returns `Ok`.
    pub fn create(
        &self,
        host: &dyn DeviceHost,
        device: &DeviceHandle,
        identity: &str,
        port_name: &PortName,
    ) -> Result<()> {
        let mut key = host.open_device_map_key(device, &self.subkey).map_err(|e| {
            error!("Failed to open DEVICEMAP\\{} key: {}", self.subkey, e);
            DeviceError::LocationUnavailable(format!("DEVICEMAP\\{}: {}", self.subkey, e))
        })?;

        key.assign_string(identity, port_name.as_str()).map_err(|e| {
            error!("Failed to write to DEVICEMAP\\{} key: {}", self.subkey, e);
            DeviceError::WriteFailed(format!("{} = {}: {}", identity, port_name, e))
        })?;

        info!("Registered {} = {} in DEVICEMAP\\{}", identity, port_name, self.subkey);
        Ok(())
    }

    /// Remove the port map entry for a device, best-effort.
    ///
    /// The value is removed first. The key goes only when no other device
    /// still has a value under it.
    pub fn destroy(&self, host: &dyn DeviceHost, device: &DeviceHandle, identity: &str) -> CleanupReport {
        let mut key = match host.open_device_map_key(device, &self.subkey) {
            Ok(key) => key,
            Err(e) => {
                error!("Failed to open DEVICEMAP\\{} key: {}", self.subkey, e);
                return CleanupReport::unopened(e);
            }
        };

        let value = match key.remove_value(identity) {
            Ok(()) => ValueRemoval::Removed,
            Err(e) if e.is_not_found() => {
                warn!("Port map value {} was already absent", identity);
                ValueRemoval::AlreadyAbsent
            }
            Err(e) => {
                error!("Failed to remove {} value: {}", identity, e);
                ValueRemoval::Failed(e)
            }
        };

        let key_removal = match key.value_names() {
            Ok(names) if names.is_empty() => match key.remove_key() {
                Ok(()) => KeyRemoval::Removed,
                Err(e) => {
                    error!("Failed to remove DEVICEMAP\\{}: {}", self.subkey, e);
                    KeyRemoval::Failed(e)
                }
            },
            Ok(names) => {
                debug!(
                    "Keeping DEVICEMAP\\{}, {} other port(s) registered",
                    self.subkey,
                    names.len()
                );
                KeyRemoval::Retained {
                    remaining: names.len(),
                }
            }
            Err(e) => {
                error!("Failed to list DEVICEMAP\\{}: {}", self.subkey, e);
                KeyRemoval::Failed(e)
            }
        };

        CleanupReport {
            open_error: None,
            value,
            key: key_removal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RegistryValue;
    use crate::memory::{HostOperation, MemoryHost};

    const IDENTITY: &str = "\\Device\\00000012";

    fn setup() -> (MemoryHost, DeviceHandle, LegacyPortMap, String) {
        let host = MemoryHost::new();
        let handle = host.plug_in_and_create("ROOT\\PORTS\\0000", IDENTITY, Some("COM7"));
        let map = LegacyPortMap::from_config(&PortConfig::default());
        let path = MemoryHost::device_map_path(map.subkey());
        (host, handle, map, path)
    }

    #[test]
    fn test_create_and_destroy() {
        let (host, handle, map, path) = setup();
        let port = PortName::new("COM7", 10).unwrap();

        map.create(&host, &handle, IDENTITY, &port).unwrap();
        assert_eq!(
            host.registry_value(&path, IDENTITY),
            Some(RegistryValue::String("COM7".into()))
        );
        assert_eq!(host.open_key_count(), 0);

        let report = map.destroy(&host, &handle, IDENTITY);
        assert!(report.is_clean());
        assert_eq!(report.value, ValueRemoval::Removed);
        assert_eq!(report.key, KeyRemoval::Removed);
        assert!(!host.key_exists(&path));
        assert_eq!(host.open_key_count(), 0);
    }

    #[test]
    fn test_create_location_unavailable() {
        let (host, handle, map, path) = setup();
        let port = PortName::new("COM7", 10).unwrap();

        host.fail_on(HostOperation::OpenDeviceMapKey, HostError::AccessDenied("SERIALCOMM".into()));
        assert!(matches!(
            map.create(&host, &handle, IDENTITY, &port),
            Err(DeviceError::LocationUnavailable(_))
        ));
        assert!(!host.key_exists(&path));
    }

    #[test]
    fn test_create_write_failed_releases_key() {
        let (host, handle, map, path) = setup();
        let port = PortName::new("COM7", 10).unwrap();

        host.fail_on(HostOperation::AssignValue, HostError::Failed("disk full".into()));
        assert!(matches!(
            map.create(&host, &handle, IDENTITY, &port),
            Err(DeviceError::WriteFailed(_))
        ));
        assert_eq!(host.registry_value(&path, IDENTITY), None);
        assert_eq!(host.open_key_count(), 0);
    }

    #[test]
    fn test_destroy_keeps_other_ports() {
        let (host, handle, map, path) = setup();
        host.seed_value(&path, "\\Device\\00000034", RegistryValue::String("COM9".into()));

        let port = PortName::new("COM7", 10).unwrap();
        map.create(&host, &handle, IDENTITY, &port).unwrap();

        let report = map.destroy(&host, &handle, IDENTITY);
        assert!(report.is_clean());
        assert_eq!(report.key, KeyRemoval::Retained { remaining: 1 });
        assert_eq!(host.registry_value(&path, IDENTITY), None);
        assert_eq!(
            host.registry_value(&path, "\\Device\\00000034"),
            Some(RegistryValue::String("COM9".into()))
        );
    }

    #[test]
    fn test_destroy_already_absent() {
        let (host, handle, map, path) = setup();

        let report = map.destroy(&host, &handle, IDENTITY);
        assert_eq!(report.value, ValueRemoval::AlreadyAbsent);
        assert!(report.entry_absent());
        // The key was created by the open and is empty, so it goes again
        assert_eq!(report.key, KeyRemoval::Removed);
        assert!(!host.key_exists(&path));
    }

    #[test]
    fn test_destroy_continues_after_value_failure() {
        let (host, handle, map, path) = setup();
        let port = PortName::new("COM7", 10).unwrap();
        map.create(&host, &handle, IDENTITY, &port).unwrap();

        host.fail_on(HostOperation::RemoveValue, HostError::AccessDenied(IDENTITY.into()));
        let report = map.destroy(&host, &handle, IDENTITY);

        assert!(matches!(report.value, ValueRemoval::Failed(_)));
        assert!(!report.entry_absent());
        assert_eq!(report.key, KeyRemoval::Retained { remaining: 1 });
        assert!(host.key_exists(&path));
        assert_eq!(host.open_key_count(), 0);
    }

    #[test]
    fn test_destroy_key_removal_failure_is_reported() {
        let (host, handle, map, _) = setup();
        let port = PortName::new("COM7", 10).unwrap();
        map.create(&host, &handle, IDENTITY, &port).unwrap();

        host.fail_on(HostOperation::RemoveKey, HostError::Failed("in use".into()));
        let report = map.destroy(&host, &handle, IDENTITY);

        assert_eq!(report.value, ValueRemoval::Removed);
        assert!(matches!(report.key, KeyRemoval::Failed(_)));
        assert!(!report.is_clean());
        assert_eq!(host.open_key_count(), 0);
    }

    #[test]
    fn test_destroy_unopened_location() {
        let (host, handle, map, _) = setup();
        host.fail_on(HostOperation::OpenDeviceMapKey, HostError::Failed("gone".into()));

        let report = map.destroy(&host, &handle, IDENTITY);
        assert!(report.open_error.is_some());
        assert_eq!(report.value, ValueRemoval::NotAttempted);
        assert_eq!(report.key, KeyRemoval::NotAttempted);
    }
}
