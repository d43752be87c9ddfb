//! # Raspberry Pi HAL Implementation
//!
//! SPI register access and DIO0 edge delivery for an SX127x module wired to
//! a Raspberry Pi header, using the rppal crate.
//!
//! ## Hardware Setup
//!
//! ```text
//! Pi Pin │ BCM GPIO │ SX127x Pin │ Function
//! ───────┼──────────┼────────────┼─────────────
//! 19     │ GPIO 10  │ MOSI       │ SPI data out
//! 21     │ GPIO 9   │ MISO       │ SPI data in
//! 23     │ GPIO 11  │ SCK        │ SPI clock
//! 24     │ GPIO 8   │ NSS        │ Chip select (CE0)
//! 22     │ GPIO 25  │ DIO0       │ Interrupt (input)
//! 15     │ GPIO 22  │ RESET      │ Reset (output, optional)
//! ```
//!
//! SPI must be enabled in `/boot/config.txt` (`dtparam=spi=on`).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sx127x_lora::radio::hal::{Dio0Line, RaspberryPiHal};
//! use sx127x_lora::{LoRa, RadioConfig};
//!
//! let config = RadioConfig {
//!     dio0_pin: Some(25),
//!     reset_pin: Some(22),
//!     ..Default::default()
//! };
//! let hal = RaspberryPiHal::from_config(&config)?;
//! let dio0 = Dio0Line::new(25)?;
//! let radio = LoRa::builder(hal).event_line(dio0).config(&config).build();
//! radio.begin_with_config(&config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::thread;
use std::time::Duration;

use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{BitOrder, Bus, Error as SpiError, Mode, SlaveSelect, Spi};
use thiserror::Error;

use crate::config::RadioConfig;
use crate::radio::hal::{EdgeHandler, EventLine, Hal, HalError};

/// Errors specific to Raspberry Pi HAL implementation
#[derive(Error, Debug)]
pub enum RpiHalError {
    #[error("SPI initialization failed: {0}")]
    SpiInit(#[from] SpiError),

    #[error("GPIO initialization failed: {0}")]
    GpioInit(#[from] rppal::gpio::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Write bit of the SX127x SPI address byte
const SPI_WRITE: u8 = 0x80;

/// RESET low time, then time for the chip to come up
const RESET_PULSE: Duration = Duration::from_micros(100);
const RESET_STARTUP: Duration = Duration::from_millis(5);

/// SPI register bus to an SX127x
pub struct RaspberryPiHal {
    spi: Spi,
    reset_pin: Option<OutputPin>,
}

impl RaspberryPiHal {
    /// Open `/dev/spidev<spi_bus>.<chip_select>` in mode 0, MSB first.
    ///
    /// `reset_pin` is the BCM number of the pin driving RESET, if wired.
    pub fn new(
        spi_bus: u8,
        chip_select: u8,
        clock_hz: u32,
        reset_pin: Option<u8>,
    ) -> Result<Self, RpiHalError> {
        let bus = match spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            _ => {
                return Err(RpiHalError::InvalidConfig(format!(
                    "Invalid SPI bus {spi_bus}, only 0 and 1 are supported"
                )))
            }
        };
        let slave_select = match chip_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            _ => {
                return Err(RpiHalError::InvalidConfig(format!(
                    "Invalid chip select {chip_select}"
                )))
            }
        };

        let spi = Spi::new(bus, slave_select, clock_hz, Mode::Mode0)?;
        spi.set_bit_order(BitOrder::MsbFirst)?;

        let reset_pin = match reset_pin {
            Some(pin) => {
                let mut pin = Gpio::new()?.get(pin)?.into_output();
                pin.set_high();
                Some(pin)
            }
            None => None,
        };

        log::info!(
            "Raspberry Pi HAL on /dev/spidev{spi_bus}.{chip_select} at {clock_hz} Hz, reset {}",
            if reset_pin.is_some() { "wired" } else { "not wired" }
        );

        Ok(Self { spi, reset_pin })
    }

    pub fn from_config(config: &RadioConfig) -> Result<Self, RpiHalError> {
        Self::new(
            config.spi_bus,
            config.chip_select,
            config.spi_clock_hz,
            config.reset_pin,
        )
    }
}

impl Hal for RaspberryPiHal {
    fn read_register(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), HalError> {
        let mut tx = vec![0u8; buf.len() + 1];
        let mut rx = vec![0u8; buf.len() + 1];
        tx[0] = addr & !SPI_WRITE;

        self.spi.transfer(&mut rx, &tx).map_err(|e| {
            log::error!("SPI read of 0x{addr:02X} failed: {e}");
            HalError::Spi
        })?;

        buf.copy_from_slice(&rx[1..]);
        Ok(())
    }

    fn write_register(&mut self, addr: u8, data: &[u8]) -> Result<(), HalError> {
        let mut tx = Vec::with_capacity(data.len() + 1);
        tx.push(addr | SPI_WRITE);
        tx.extend_from_slice(data);

        self.spi.write(&tx).map_err(|e| {
            log::error!("SPI write of 0x{addr:02X} failed: {e}");
            HalError::Spi
        })?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), HalError> {
        if let Some(pin) = self.reset_pin.as_mut() {
            log::debug!("Pulsing SX127x RESET");
            pin.set_low();
            thread::sleep(RESET_PULSE);
            pin.set_high();
            thread::sleep(RESET_STARTUP);
        }
        Ok(())
    }
}

/// DIO0 rising edges delivered by rppal's interrupt thread
pub struct Dio0Line {
    pin: InputPin,
}

impl Dio0Line {
    pub fn new(bcm_pin: u8) -> Result<Self, RpiHalError> {
        let pin = Gpio::new()?.get(bcm_pin)?.into_input_pulldown();
        Ok(Self { pin })
    }

    pub fn from_config(config: &RadioConfig) -> Result<Self, RpiHalError> {
        let pin = config
            .dio0_pin
            .ok_or_else(|| RpiHalError::InvalidConfig("dio0_pin not set".to_string()))?;
        Self::new(pin)
    }
}

impl EventLine for Dio0Line {
    fn attach(&mut self, mut handler: EdgeHandler) -> Result<(), HalError> {
        self.pin
            .set_async_interrupt(Trigger::RisingEdge, move |_level| handler())
            .map_err(|e| {
                log::error!("Failed to enable DIO0 interrupt: {e}");
                HalError::Gpio
            })
    }

    fn detach(&mut self) -> Result<(), HalError> {
        self.pin.clear_async_interrupt().map_err(|e| {
            log::error!("Failed to disable DIO0 interrupt: {e}");
            HalError::Gpio
        })
    }
}
