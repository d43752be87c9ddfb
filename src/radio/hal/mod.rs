//! # Hardware Abstraction Layer for the SX127x
//!
//! The driver never talks to SPI or GPIO directly. It is handed two
//! collaborators:
//!
//! - a [`Hal`] giving register-level access to the chip over its bus, and
//! - an [`EventLine`] delivering rising edges of the DIO0 interrupt pin.
//!
//! Both are injected, so the same driver runs against the Raspberry Pi
//! implementation (feature `raspberry-pi`) or a simulated register file in
//! tests.

use thiserror::Error;

/// Errors that can occur during HAL operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HalError {
    #[error("SPI communication error")]
    Spi,

    #[error("GPIO operation error")]
    Gpio,

    #[error("Register access error")]
    Register,

    #[error("Timeout waiting for operation")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Register bus access to an SX127x chip.
///
/// Addresses are the 7-bit register addresses from the datasheet; the
/// implementation is responsible for setting the write bit on the wire.
/// A multi-byte transfer starting at `REG_FIFO` streams the FIFO, any other
/// start address walks consecutive registers.
pub trait Hal: Send {
    /// Read `buf.len()` bytes starting at `addr`
    fn read_register(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), HalError>;

    /// Write `data` starting at `addr`
    fn write_register(&mut self, addr: u8, data: &[u8]) -> Result<(), HalError>;

    /// Pulse the chip reset line.
    ///
    /// Boards without a wired reset keep the default no-op.
    fn reset(&mut self) -> Result<(), HalError> {
        Ok(())
    }
}

/// Handler run from the edge source's context on every rising edge.
pub type EdgeHandler = Box<dyn FnMut() + Send + 'static>;

/// Rising-edge interrupt source wired to the chip's DIO0 pin.
///
/// The handler is called from whatever context the platform delivers edges
/// in (an rppal interrupt thread, a test thread, ...). It must stay short;
/// the driver only uses it to wake its dispatch worker.
pub trait EventLine: Send {
    /// Start delivering rising edges to `handler`, replacing any previous one
    fn attach(&mut self, handler: EdgeHandler) -> Result<(), HalError>;

    /// Stop delivering edges
    fn detach(&mut self) -> Result<(), HalError>;
}

// Platform implementations
#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::{Dio0Line, RaspberryPiHal, RpiHalError};
