/*!
 * vcom Device
 *
 * This crate provides the device lifecycle of the vcom virtual serial port
 * driver: per-device state, port name resolution, symbolic link publication
 * and registration in the legacy serial port map.
 */

#![warn(missing_docs)]

// Re-export core types
pub use vcom_core::prelude;

pub mod context;
pub mod driver;
pub mod error;
pub mod host;
pub mod legacy;
pub mod lifecycle;
pub mod memory;
pub mod port_name;
pub mod registers;
pub mod symlink;
pub mod table;

pub use context::{DeviceContext, DeviceSnapshot, LifecycleState, SharedDeviceContext};
pub use driver::VirtualSerialDriver;
pub use error::{DeviceError, Result};
pub use host::{CleanupHook, DeviceHost, DeviceInit, HostError, RegistryKey, RegistryValue};
pub use legacy::{CleanupReport, KeyRemoval, LegacyPortMap, ValueRemoval};
pub use lifecycle::LifecycleController;
pub use memory::{HostOperation, MemoryHost};
pub use port_name::{PortName, PortNameResolver};
pub use registers::{SerialRegisters, SerialTimeouts};
pub use symlink::{SymbolicLinkName, SymbolicLinkPublisher};
pub use table::{DeviceEvent, DeviceTable};

/// vcom device crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device crate
pub fn init() -> std::result::Result<(), vcom_core::error::Error> {
    tracing::info!("vcom device {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(init().is_ok());
    }
}
