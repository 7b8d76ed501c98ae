/*!
 * Emulated serial hardware registers and I/O timeouts.
 *
 * Nothing here touches real hardware. The values are stored so that
 * transport code can answer the queries serial clients make, and mutate
 * them in place when clients change line settings.
 */
use serde::{Deserialize, Serialize};

/// Read/write timeout policy of a port, moved as one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialTimeouts {
    /// Maximum time between two received bytes, in milliseconds
    pub read_interval: u32,
    /// Per-byte multiplier of the total read timeout
    pub read_total_multiplier: u32,
    /// Constant part of the total read timeout
    pub read_total_constant: u32,
    /// Per-byte multiplier of the total write timeout
    pub write_total_multiplier: u32,
    /// Constant part of the total write timeout
    pub write_total_constant: u32,
}

/// Emulated register file of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRegisters {
    baud_rate: u32,
    modem_control_register: u32,
    fifo_control_register: u32,
    line_control_register: u32,
    valid_data_mask: u8,
    timeouts: SerialTimeouts,
}

impl SerialRegisters {
    /// Zero-initialized register file
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulated baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Store a new baud rate. Not validated, nothing is programmed.
    pub fn set_baud_rate(&mut self, baud_rate: u32) {
        self.baud_rate = baud_rate;
    }

    /// Modem control register (MCR)
    pub fn modem_control_register(&self) -> u32 {
        self.modem_control_register
    }

    /// In-place access to the MCR
    pub fn modem_control_register_mut(&mut self) -> &mut u32 {
        &mut self.modem_control_register
    }

    /// FIFO control register (FCR)
    pub fn fifo_control_register(&self) -> u32 {
        self.fifo_control_register
    }

    /// In-place access to the FCR. Writes through the reference are what a
    /// later `fifo_control_register` returns.
    pub fn fifo_control_register_mut(&mut self) -> &mut u32 {
        &mut self.fifo_control_register
    }

    /// Line control register (LCR)
    pub fn line_control_register(&self) -> u32 {
        self.line_control_register
    }

    /// In-place access to the LCR
    pub fn line_control_register_mut(&mut self) -> &mut u32 {
        &mut self.line_control_register
    }

    /// Mask applied to received data bits
    pub fn valid_data_mask(&self) -> u8 {
        self.valid_data_mask
    }

    /// Set the data-bit mask
    pub fn set_valid_data_mask(&mut self, mask: u8) {
        self.valid_data_mask = mask;
    }

    /// Copy of the current timeouts
    pub fn timeouts(&self) -> SerialTimeouts {
        self.timeouts
    }

    /// Replace all five timeouts at once
    pub fn set_timeouts(&mut self, timeouts: SerialTimeouts) {
        self.timeouts = timeouts;
    }
}
