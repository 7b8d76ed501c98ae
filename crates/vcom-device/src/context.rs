/*!
 * Per-device state record.
 *
 * One `DeviceContext` exists for every device object the driver created. It
 * holds the emulated registers, the names resolved during configuration and
 * the flag recording whether the legacy port-map entry was written.
 */
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use vcom_core::types::DeviceHandle;

use crate::port_name::PortName;
use crate::registers::{SerialRegisters, SerialTimeouts};
use crate::symlink::SymbolicLinkName;

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Device object and record exist, nothing published yet
    Created,
    /// Configuration is running
    Configuring,
    /// Configuration finished
    Configured,
    /// Configuration aborted
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Configured => "configured",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Device state record
#[derive(Debug)]
pub struct DeviceContext {
    handle: DeviceHandle,
    state: LifecycleState,
    registers: SerialRegisters,
    /// True iff the legacy port-map entry for this device exists
    legacy_key_registered: bool,
    physical_device_identity: Option<String>,
    port_name: Option<PortName>,
    symbolic_link: Option<SymbolicLinkName>,
}

/// A device record shared between the context table and its users
pub type SharedDeviceContext = Arc<Mutex<DeviceContext>>;

impl DeviceContext {
    /// Zero-initialized record bound to a host device handle
    pub fn new(handle: DeviceHandle) -> Self {
        Self {
            handle,
            state: LifecycleState::Created,
            registers: SerialRegisters::new(),
            legacy_key_registered: false,
            physical_device_identity: None,
            port_name: None,
            symbolic_link: None,
        }
    }

    /// The host device handle this record is bound to
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LifecycleState) {
        self.state = state;
    }

    /// Emulated registers
    pub fn registers(&self) -> &SerialRegisters {
        &self.registers
    }

    /// Mutable access to the emulated registers
    pub fn registers_mut(&mut self) -> &mut SerialRegisters {
        &mut self.registers
    }

    /// Whether the legacy port-map entry is currently registered
    pub fn legacy_key_registered(&self) -> bool {
        self.legacy_key_registered
    }

    pub(crate) fn set_legacy_key_registered(&mut self, registered: bool) {
        self.legacy_key_registered = registered;
    }

    /// Identity of the physical device object, once resolved
    pub fn physical_device_identity(&self) -> Option<&str> {
        self.physical_device_identity.as_deref()
    }

    pub(crate) fn set_physical_device_identity(&mut self, identity: String) {
        self.physical_device_identity = Some(identity);
    }

    /// Resolved port name
    pub fn port_name(&self) -> Option<&PortName> {
        self.port_name.as_ref()
    }

    pub(crate) fn set_port_name(&mut self, port_name: PortName) {
        self.port_name = Some(port_name);
    }

    /// Published symbolic link name
    pub fn symbolic_link(&self) -> Option<&SymbolicLinkName> {
        self.symbolic_link.as_ref()
    }

    pub(crate) fn set_symbolic_link(&mut self, link: SymbolicLinkName) {
        self.symbolic_link = Some(link);
    }

    /// Serializable copy of the record for diagnostics
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            handle: self.handle.clone(),
            state: self.state,
            port_name: self.port_name.as_ref().map(|p| p.as_str().to_string()),
            symbolic_link: self.symbolic_link.as_ref().map(|l| l.as_str().to_string()),
            physical_device_identity: self.physical_device_identity.clone(),
            legacy_key_registered: self.legacy_key_registered,
            baud_rate: self.registers.baud_rate(),
            timeouts: self.registers.timeouts(),
        }
    }
}

/// Read-only view of a device record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Host device handle
    pub handle: DeviceHandle,
    /// Lifecycle state
    pub state: LifecycleState,
    /// Resolved port name
    pub port_name: Option<String>,
    /// Published symbolic link
    pub symbolic_link: Option<String>,
    /// Physical device identity
    pub physical_device_identity: Option<String>,
    /// Legacy port-map registration flag
    pub legacy_key_registered: bool,
    /// Emulated baud rate
    pub baud_rate: u32,
    /// Current timeouts
    pub timeouts: SerialTimeouts,
}
