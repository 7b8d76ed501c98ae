/*!
 * Symbolic link composition and publication.
 *
 * The global link is the namespace prefix followed by the port name, built
 * in a fixed-capacity wide-character buffer. Overflow is checked before
 * anything is copied.
 */
use std::fmt;

use thiserror::Error;
use tracing::{error, info};

use vcom_core::config::PortConfig;
use vcom_core::types::DeviceHandle;

use crate::error::{DeviceError, Result};
use crate::host::DeviceHost;
use crate::port_name::PortName;

/// Failure of a bounded append
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    /// The source string contains a terminator
    #[error("source contains an embedded terminator")]
    InvalidSource,
    /// The destination no longer has room for its terminator
    #[error("destination buffer is not terminated within its capacity")]
    InvalidState,
    /// The result would not fit
    #[error("result does not fit the destination buffer")]
    NoRoom,
}

/// Fixed-capacity UTF-16 buffer with bounded concatenation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideNameBuffer {
    units: Vec<u16>,
    capacity: usize,
}

impl WideNameBuffer {
    /// An empty buffer holding at most `capacity - 1` units plus terminator
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            units: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Current length, terminator excluded
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Capacity, terminator included
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `src`, leaving the buffer untouched on failure
    pub fn append(&mut self, src: &str) -> std::result::Result<(), AppendError> {
        if self.units.len() >= self.capacity {
            return Err(AppendError::InvalidState);
        }

        let src: Vec<u16> = src.encode_utf16().collect();
        if src.contains(&0) {
            return Err(AppendError::InvalidSource);
        }

        if self.units.len() + src.len() >= self.capacity {
            return Err(AppendError::NoRoom);
        }

        self.units.extend_from_slice(&src);
        Ok(())
    }

    /// Decode the buffer contents
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }
}

/// A composed global symbolic link name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicLinkName(String);

impl SymbolicLinkName {
    /// The link name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in UTF-16 code units, terminator excluded
    pub fn len(&self) -> usize {
        self.0.encode_utf16().count()
    }

    /// Whether the name is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SymbolicLinkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composes and publishes the global name of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicLinkPublisher {
    prefix: String,
    capacity: usize,
}

impl SymbolicLinkPublisher {
    /// Create a publisher for a prefix and a buffer capacity
    pub fn new<S: Into<String>>(prefix: S, capacity: usize) -> Self {
        Self {
            prefix: prefix.into(),
            capacity,
        }
    }

    /// Create a publisher from the port configuration
    pub fn from_config(config: &PortConfig) -> Self {
        Self::new(config.symbolic_link_prefix.clone(), config.symbolic_link_capacity)
    }

    /// Namespace prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Compose `prefix + port_name`
    pub fn compose(&self, port_name: &PortName) -> Result<SymbolicLinkName> {
        self.compose_str(port_name.as_str())
    }

    pub(crate) fn compose_str(&self, port_name: &str) -> Result<SymbolicLinkName> {
        let length = self.prefix.encode_utf16().count() + port_name.encode_utf16().count();
        if length >= self.capacity {
            error!(
                "Buffer overflow when creating COM port name. Size is {}, buffer length is {}",
                length, self.capacity
            );
            return Err(DeviceError::BufferOverflow {
                length,
                capacity: self.capacity,
            });
        }

        let mut buffer = WideNameBuffer::with_capacity(self.capacity);
        buffer
            .append(&self.prefix)
            .and_then(|_| buffer.append(port_name))
            .map_err(|e| {
                error!("Failed to copy {} to buffer: {}", port_name, e);
                DeviceError::CopyFailed(format!("{}: {}", port_name, e))
            })?;

        Ok(SymbolicLinkName(buffer.to_string_lossy()))
    }

    /// Ask the host to expose the device under `link`
    pub fn publish(
        &self,
        host: &dyn DeviceHost,
        device: &DeviceHandle,
        link: &SymbolicLinkName,
    ) -> Result<()> {
        host.create_symbolic_link(device, link.as_str()).map_err(|e| {
            error!("Cannot create symbolic link {}: {}", link, e);
            DeviceError::publication(format!("symbolic link {}: {}", link, e))
        })?;

        info!("Created symbolic link {}", link);
        Ok(())
    }
}
