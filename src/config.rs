//! # Radio Configuration
//!
//! [`RadioConfig`] collects the board wiring and modem settings in one
//! serde structure so a deployment can keep them in a JSON file:
//!
//! ```json
//! {
//!   "frequency_hz": 868100000,
//!   "spreading_factor": 9,
//!   "bandwidth_hz": 125000,
//!   "dio0_pin": 25,
//!   "reset_pin": 22
//! }
//! ```
//!
//! Missing fields take their defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoRaError;
use crate::radio::config::{MAX_SPREADING_FACTOR, MIN_SPREADING_FACTOR};
use crate::radio::dispatcher::DEFAULT_WORKER_STACK_SIZE;
use crate::radio::modulation::PaOutput;

/// SX1276/77/78/79 tuning range
pub const MIN_FREQUENCY_HZ: u32 = 137_000_000;
pub const MAX_FREQUENCY_HZ: u32 = 1_020_000_000;

/// Smallest stack accepted for the dispatch worker
pub const MIN_WORKER_STACK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// SPI bus number (`/dev/spidev<bus>.<cs>`)
    pub spi_bus: u8,
    pub chip_select: u8,
    pub spi_clock_hz: u32,
    /// BCM pin wired to the chip's RESET, if any
    pub reset_pin: Option<u8>,
    /// BCM pin wired to DIO0; without it the driver can only poll
    pub dio0_pin: Option<u8>,

    pub frequency_hz: u32,
    pub tx_power_dbm: i8,
    pub pa_output: PaOutput,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub coding_rate_denominator: u8,
    pub preamble_length: u16,
    pub sync_word: u8,
    pub crc: bool,
    pub invert_iq: bool,

    /// Bound for a blocking transmit
    pub tx_timeout_ms: u64,
    pub worker_stack_size: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            chip_select: 0,
            spi_clock_hz: 8_000_000,
            reset_pin: None,
            dio0_pin: None,
            frequency_hz: 915_000_000,
            tx_power_dbm: 17,
            pa_output: PaOutput::PaBoost,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate_denominator: 5,
            preamble_length: 8,
            sync_word: 0x12,
            crc: false,
            invert_iq: false,
            tx_timeout_ms: 10_000,
            worker_stack_size: DEFAULT_WORKER_STACK_SIZE,
        }
    }
}

impl RadioConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LoRaError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::debug!("Loaded radio configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LoRaError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, LoRaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    /// Reject settings the chip cannot honour. Values the driver clamps
    /// silently at runtime are rejected here so a bad file fails loudly.
    pub fn validate(&self) -> Result<(), LoRaError> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&self.frequency_hz) {
            return Err(invalid(format!(
                "frequency {} Hz outside {MIN_FREQUENCY_HZ}..={MAX_FREQUENCY_HZ}",
                self.frequency_hz
            )));
        }
        if !(MIN_SPREADING_FACTOR..=MAX_SPREADING_FACTOR).contains(&self.spreading_factor) {
            return Err(invalid(format!(
                "spreading factor {} outside {MIN_SPREADING_FACTOR}..={MAX_SPREADING_FACTOR}",
                self.spreading_factor
            )));
        }
        if self.bandwidth_hz == 0 || self.bandwidth_hz > 500_000 {
            return Err(invalid(format!("bandwidth {} Hz", self.bandwidth_hz)));
        }
        if !(5..=8).contains(&self.coding_rate_denominator) {
            return Err(invalid(format!(
                "coding rate 4/{}",
                self.coding_rate_denominator
            )));
        }

        let power_range = match self.pa_output {
            PaOutput::Rfo => 0..=14,
            PaOutput::PaBoost => 2..=20,
        };
        if !power_range.contains(&self.tx_power_dbm) {
            return Err(invalid(format!(
                "TX power {} dBm not available on {:?}",
                self.tx_power_dbm, self.pa_output
            )));
        }

        if self.tx_timeout_ms == 0 {
            return Err(invalid("tx_timeout_ms must be positive".to_string()));
        }
        if self.worker_stack_size < MIN_WORKER_STACK_SIZE {
            return Err(invalid(format!(
                "worker stack {} bytes below {MIN_WORKER_STACK_SIZE}",
                self.worker_stack_size
            )));
        }
        if self.spi_clock_hz == 0 {
            return Err(invalid("spi_clock_hz must be positive".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> LoRaError {
    LoRaError::Configuration(message)
}
