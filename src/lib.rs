//! # sx127x-lora - Interrupt-driven driver for Semtech SX127x LoRa transceivers
//!
//! The sx127x-lora crate drives SX1276/77/78/79 radios in LoRa mode over an
//! injected register bus, with packet reception, transmit completion and
//! channel activity detection reported through callbacks run from a
//! dedicated DIO0 dispatch thread.
//!
//! ## Features
//!
//! - Register-level access through the [`Hal`] trait, with a Raspberry Pi
//!   implementation behind the `raspberry-pi` feature
//! - Blocking and asynchronous transmit, polled and callback-driven receive
//! - Channel activity detection
//! - Modem configuration: frequency, spreading factor, bandwidth, coding rate,
//!   preamble, sync word, CRC, IQ inversion, low data rate optimisation,
//!   TX power, OCP and LNA gain
//! - JSON configuration files via [`RadioConfig`]
//! - A tokio-friendly [`PacketRadio`] facade
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! sx127x-lora = "0.1.0"
//! ```
//!
//! ```rust,ignore
//! use sx127x_lora::{init_logger, LoRa};
//!
//! init_logger();
//! let radio = LoRa::builder(hal).event_line(dio0).build();
//! radio.begin(915_000_000)?;
//!
//! radio.begin_packet(false)?;
//! radio.write_bytes(b"hello")?;
//! radio.end_packet(false)?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod radio;
pub mod util;

pub use crate::config::RadioConfig;
pub use crate::error::LoRaError;
pub use crate::logging::{init_logger, log_info};

// Driver surface
pub use radio::{
    Bandwidth, DispatchStats, DispatcherState, EdgeHandler, EventLine, Hal, HalError, HeaderMode,
    LoRa, LoRaBuilder, OperatingMode, PaOutput, SignalMetrics,
};

// Async facade
pub use radio::{AsyncLoRa, DriverInfo, PacketRadio, ReceivedPacket};
