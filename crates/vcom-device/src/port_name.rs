/*!
 * Port name resolution.
 *
 * The bus enumerator stores the assigned port name ("COM7") as a string
 * value in the device's hardware key. This module reads it back and checks
 * that it fits the fixed-size buffer the rest of the driver works with.
 */
use std::fmt;

use tracing::{debug, error};

use vcom_core::config::PortConfig;

use crate::error::{DeviceError, Result};
use crate::host::{RegistryKey, RegistryValue};

/// A validated port name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortName(String);

impl PortName {
    /// Validate a name against a buffer capacity (terminator included).
    ///
    /// A single trailing terminator is accepted and stripped.
    pub fn new<S: Into<String>>(name: S, capacity: usize) -> Result<Self> {
        let mut name = name.into();
        if name.ends_with('\0') {
            name.pop();
        }

        if name.is_empty() {
            return Err(DeviceError::MalformedName("port name is empty".to_string()));
        }

        if name.contains('\0') {
            return Err(DeviceError::MalformedName(format!(
                "port name {:?} contains an embedded terminator",
                name
            )));
        }

        let length = name.encode_utf16().count();
        if length >= capacity {
            return Err(DeviceError::BufferOverflow { length, capacity });
        }

        Ok(Self(name))
    }

    /// The port name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in UTF-16 code units, terminator excluded
    pub fn len(&self) -> usize {
        self.0.encode_utf16().count()
    }

    /// Always false for a validated name
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PortName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reads the bus-assigned port name from a device's hardware key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortNameResolver {
    value_name: String,
    capacity: usize,
}

impl PortNameResolver {
    /// Create a resolver reading `value_name` into a buffer of `capacity` units
    pub fn new<S: Into<String>>(value_name: S, capacity: usize) -> Self {
        Self {
            value_name: value_name.into(),
            capacity,
        }
    }

    /// Create a resolver from the port configuration
    pub fn from_config(config: &PortConfig) -> Self {
        Self::new(config.port_name_value.clone(), config.port_name_capacity)
    }

    /// Buffer capacity, terminator included
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolve the port name stored under an open hardware key
    pub fn resolve(&self, key: &dyn RegistryKey) -> Result<PortName> {
        let value = key.query_value(&self.value_name).map_err(|e| {
            error!("Failed to read port name from {}: {}", key.path(), e);
            if e.is_not_found() {
                DeviceError::NotFound(format!(
                    "no {} value under {}",
                    self.value_name,
                    key.path()
                ))
            } else {
                DeviceError::LocationUnavailable(format!("{}: {}", key.path(), e))
            }
        })?;

        let name = match value {
            RegistryValue::String(s) => s,
            other => {
                error!("Port name value under {} is not a string: {:?}", key.path(), other);
                return Err(DeviceError::MalformedName(format!(
                    "{} is not a string value",
                    self.value_name
                )));
            }
        };

        let port_name = PortName::new(name, self.capacity).map_err(|e| {
            error!("Invalid port name under {}: {}", key.path(), e);
            e
        })?;

        debug!("Resolved port name {}", port_name);
        Ok(port_name)
    }
}
