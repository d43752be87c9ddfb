//! # LoRa Error Handling
//!
//! This module defines the LoRaError enum, which represents the different error
//! types that can occur in the sx127x-lora crate.

use thiserror::Error;

use crate::radio::hal::HalError;

/// Represents the different error types that can occur in the driver.
#[derive(Debug, Error)]
pub enum LoRaError {
    /// The register bus failed. Not retried.
    #[error("Bus error: {0}")]
    Bus(#[from] HalError),

    /// REG_VERSION did not identify an SX127x during `begin`.
    #[error("No SX127x found: version register reads 0x{version:02X}")]
    ChipNotFound { version: u8 },

    /// A setting was out of range or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A synchronous operation did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The chip is busy with another operation.
    #[error("Radio busy: {0}")]
    Busy(String),

    /// Payload does not fit the chip FIFO.
    #[error("Packet too large: {len} bytes (max {max})")]
    PacketTooLarge { len: usize, max: usize },

    /// The dispatch worker could not be started.
    #[error("Dispatcher error: {0}")]
    Dispatcher(String),

    /// Writing diagnostics or reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl LoRaError {
    /// True for failures of the underlying bus
    pub fn is_bus_fault(&self) -> bool {
        matches!(self, LoRaError::Bus(_))
    }
}
