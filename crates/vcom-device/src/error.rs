/*!
 * Error types for the vcom device crate.
 */
use thiserror::Error;

use vcom_core::error::Error as CoreError;

use crate::host::HostError;

/// Error type for device lifecycle and registration operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The host could not create the device object
    #[error("Device allocation failed: {0}")]
    AllocationFailed(HostError),

    /// Device interface or symbolic link publication failed
    #[error("Publication failed: {0}")]
    PublicationFailed(String),

    /// The device has no port name association
    #[error("Not found: {0}")]
    NotFound(String),

    /// The port name is not a bounded null-terminated string
    #[error("Malformed port name: {0}")]
    MalformedName(String),

    /// A name does not fit its fixed-capacity buffer
    #[error("Buffer overflow: {length} units do not fit a buffer of {capacity}")]
    BufferOverflow {
        /// Length of the name, terminator excluded
        length: usize,
        /// Buffer capacity, terminator included
        capacity: usize,
    },

    /// The bounded append primitive rejected the copy
    #[error("Copy failed: {0}")]
    CopyFailed(String),

    /// A registry location could not be opened
    #[error("Registry location unavailable: {0}")]
    LocationUnavailable(String),

    /// A registry value could not be written
    #[error("Registry write failed: {0}")]
    WriteFailed(String),

    /// The physical device identity could not be queried
    #[error("Physical device identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The device is in the wrong lifecycle state for the operation
    #[error("Invalid device state: {0}")]
    InvalidState(String),

    /// The device state record is missing or unusable
    #[error("Device context unavailable: {0}")]
    ContextUnavailable(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new publication error
    pub fn publication<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::PublicationFailed(msg.as_ref().to_string())
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::InvalidState(msg.as_ref().to_string())
    }

    /// Create a new context error
    pub fn context<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::ContextUnavailable(msg.as_ref().to_string())
    }
}
