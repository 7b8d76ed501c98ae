/*!
 * Prelude module for vcom core.
 *
 * Re-exports the types most driver code needs.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{DeviceHandle, InterfaceClass, GUID_DEVINTERFACE_COMPORT};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, LoggingConfig, PortConfig, SharedConfig};

// Re-export logging helpers
pub use crate::logging::{device_span, operation_span};
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
