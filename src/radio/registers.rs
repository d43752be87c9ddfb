//! # SX127x Register Map and Register Interface
//!
//! Register addresses, operating-mode bits and DIO mappings for the SX1276/77/78/79
//! in LoRa mode, plus [`RegisterInterface`], the thin layer every other component
//! uses to touch the chip.
//!
//! ## Register Map (LoRa mode, subset used by the driver)
//!
//! - 0x00: FIFO access
//! - 0x01: operating mode
//! - 0x06-0x08: carrier frequency
//! - 0x09-0x0C: PA, over-current protection, LNA
//! - 0x0D-0x13: FIFO pointers, IRQ flags, RX byte count
//! - 0x19-0x2C: packet status, modem configuration, frequency error, wideband RSSI
//! - 0x31-0x42: detection tuning, IQ inversion, sync word, DIO mapping, version

use crate::radio::hal::{Hal, HalError};

// =============================================================================
// Register Addresses
// =============================================================================

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_FRF_MSB: u8 = 0x06;
pub const REG_FRF_MID: u8 = 0x07;
pub const REG_FRF_LSB: u8 = 0x08;
pub const REG_PA_CONFIG: u8 = 0x09;
pub const REG_OCP: u8 = 0x0B;
pub const REG_LNA: u8 = 0x0C;
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const REG_IRQ_FLAGS: u8 = 0x12;
pub const REG_RX_NB_BYTES: u8 = 0x13;
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub const REG_RSSI_VALUE: u8 = 0x1B;
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub const REG_SYMB_TIMEOUT_LSB: u8 = 0x1F;
pub const REG_PREAMBLE_MSB: u8 = 0x20;
pub const REG_PREAMBLE_LSB: u8 = 0x21;
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub const REG_MODEM_CONFIG_3: u8 = 0x26;
pub const REG_FREQ_ERROR_MSB: u8 = 0x28;
pub const REG_FREQ_ERROR_MID: u8 = 0x29;
pub const REG_FREQ_ERROR_LSB: u8 = 0x2A;
pub const REG_RSSI_WIDEBAND: u8 = 0x2C;
pub const REG_DETECTION_OPTIMIZE: u8 = 0x31;
pub const REG_INVERTIQ: u8 = 0x33;
pub const REG_DETECTION_THRESHOLD: u8 = 0x37;
pub const REG_SYNC_WORD: u8 = 0x39;
pub const REG_INVERTIQ2: u8 = 0x3B;
pub const REG_DIO_MAPPING_1: u8 = 0x40;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PA_DAC: u8 = 0x4D;

/// Number of addressable registers dumped by diagnostics
pub const REGISTER_COUNT: u8 = 0x80;

// =============================================================================
// Operating Modes (REG_OP_MODE)
// =============================================================================

/// LoRa mode select; may only be changed while in sleep
pub const MODE_LONG_RANGE_MODE: u8 = 0x80;
pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STDBY: u8 = 0x01;
pub const MODE_TX: u8 = 0x03;
pub const MODE_RX_CONTINUOUS: u8 = 0x05;
pub const MODE_RX_SINGLE: u8 = 0x06;
pub const MODE_CAD: u8 = 0x07;

/// Mode bits of REG_OP_MODE
pub const MODE_MASK: u8 = 0x07;

// =============================================================================
// DIO0 Mapping (REG_DIO_MAPPING_1 bits 7-6)
// =============================================================================

pub const DIO0_RX_DONE: u8 = 0x00;
pub const DIO0_TX_DONE: u8 = 0x40;
pub const DIO0_CAD_DONE: u8 = 0x80;

// =============================================================================
// Field Values
// =============================================================================

pub const PA_BOOST: u8 = 0x80;
pub const PA_DAC_DEFAULT: u8 = 0x84;
pub const PA_DAC_HIGH_POWER: u8 = 0x87;

/// LNA boost for the high-frequency port
pub const LNA_BOOST_HF: u8 = 0x03;

/// MODEM_CONFIG_1 bit 0
pub const IMPLICIT_HEADER_ON: u8 = 0x01;
/// MODEM_CONFIG_2 bit 2
pub const RX_PAYLOAD_CRC_ON: u8 = 0x04;
/// MODEM_CONFIG_3 bit 2
pub const AGC_AUTO_ON: u8 = 0x04;
/// MODEM_CONFIG_3 bit 3
pub const LOW_DATA_RATE_OPTIMIZE: u8 = 0x08;

/// Expected REG_VERSION content for SX1276/77/78/79
pub const CHIP_VERSION: u8 = 0x12;

/// Largest payload the packet engine accepts
pub const MAX_PKT_LENGTH: usize = 255;

/// Single-byte and burst register access over a [`Hal`].
///
/// The interface itself is not locked; the driver keeps it inside the chip
/// mutex so one guard scope covers a whole multi-register sequence.
pub struct RegisterInterface<H: Hal> {
    hal: H,
}

impl<H: Hal> RegisterInterface<H> {
    pub fn new(hal: H) -> Self {
        Self { hal }
    }

    /// Read one register
    pub fn read(&mut self, addr: u8) -> Result<u8, HalError> {
        let mut buf = [0u8; 1];
        self.hal.read_register(addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Write one register
    pub fn write(&mut self, addr: u8, value: u8) -> Result<(), HalError> {
        self.hal.write_register(addr, &[value])
    }

    /// Read `len` bytes starting at `addr`
    pub fn burst_read(&mut self, addr: u8, len: usize) -> Result<Vec<u8>, HalError> {
        let mut buf = vec![0u8; len];
        self.burst_read_into(addr, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` starting at `addr`
    pub fn burst_read_into(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), HalError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.hal.read_register(addr, buf)
    }

    /// Write `data` starting at `addr`
    pub fn burst_write(&mut self, addr: u8, data: &[u8]) -> Result<(), HalError> {
        if data.is_empty() {
            return Ok(());
        }
        self.hal.write_register(addr, data)
    }

    /// Read-modify-write: replace the bits selected by `mask` with `bits`.
    ///
    /// Returns the value written.
    pub fn modify(&mut self, addr: u8, mask: u8, bits: u8) -> Result<u8, HalError> {
        let current = self.read(addr)?;
        let updated = (current & !mask) | (bits & mask);
        self.write(addr, updated)?;
        Ok(updated)
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Minimal SX127x register file for unit tests.

    use super::*;

    pub struct FakeBus {
        pub regs: [u8; 128],
        pub fifo: [u8; 256],
        pub fail: bool,
    }

    impl FakeBus {
        pub fn new() -> Self {
            let mut regs = [0u8; 128];
            regs[REG_VERSION as usize] = CHIP_VERSION;
            regs[REG_MODEM_CONFIG_1 as usize] = 0x72;
            regs[REG_MODEM_CONFIG_2 as usize] = 0x70;
            Self {
                regs,
                fifo: [0u8; 256],
                fail: false,
            }
        }
    }

    impl Hal for FakeBus {
        fn read_register(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), HalError> {
            if self.fail {
                return Err(HalError::Spi);
            }
            for (i, byte) in buf.iter_mut().enumerate() {
                if addr == REG_FIFO {
                    let ptr = self.regs[REG_FIFO_ADDR_PTR as usize];
                    *byte = self.fifo[ptr as usize];
                    self.regs[REG_FIFO_ADDR_PTR as usize] = ptr.wrapping_add(1);
                } else {
                    *byte = self.regs[(addr as usize + i) & 0x7F];
                }
            }
            Ok(())
        }

        fn write_register(&mut self, addr: u8, data: &[u8]) -> Result<(), HalError> {
            if self.fail {
                return Err(HalError::Spi);
            }
            for (i, &value) in data.iter().enumerate() {
                if addr == REG_FIFO {
                    let ptr = self.regs[REG_FIFO_ADDR_PTR as usize];
                    self.fifo[ptr as usize] = value;
                    self.regs[REG_FIFO_ADDR_PTR as usize] = ptr.wrapping_add(1);
                } else if addr == REG_IRQ_FLAGS {
                    self.regs[REG_IRQ_FLAGS as usize] &= !value;
                } else {
                    self.regs[(addr as usize + i) & 0x7F] = value;
                }
            }
            Ok(())
        }
    }
}
