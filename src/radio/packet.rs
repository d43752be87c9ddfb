//! # Packet Framing
//!
//! Cursor management over the SX127x 256-byte FIFO for both directions.
//!
//! ## Transmit
//!
//! ```text
//! begin:  FIFO_ADDR_PTR = 0, PAYLOAD_LENGTH = 0, cursor = 0
//! write:  FIFO <- bytes (auto-increment), PAYLOAD_LENGTH = cursor
//! ```
//!
//! ## Receive
//!
//! ```text
//! capture: length = RX_NB_BYTES (explicit) | PAYLOAD_LENGTH (implicit)
//!          FIFO_ADDR_PTR = FIFO_RX_CURRENT_ADDR, cursor = 0
//! read:    FIFO -> byte while cursor < length
//! ```
//!
//! The cursor never exceeds [`MAX_PKT_LENGTH`]; writes beyond it are truncated
//! and reads beyond the packet length yield nothing.

use serde::Serialize;

use crate::radio::hal::{Hal, HalError};
use crate::radio::modulation::{decode_frequency_error, decode_snr, rssi_offset};
use crate::radio::registers::*;

/// Link quality of the last received packet
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SignalMetrics {
    pub rssi_dbm: i16,
    pub snr_db: f32,
    pub frequency_error_hz: i32,
}

impl SignalMetrics {
    /// Read packet status registers for the packet just received
    pub fn capture<H: Hal>(
        regs: &mut RegisterInterface<H>,
        frequency_hz: u32,
        bandwidth_hz: u32,
    ) -> Result<Self, HalError> {
        let snr = regs.read(REG_PKT_SNR_VALUE)?;
        let rssi = regs.read(REG_PKT_RSSI_VALUE)?;
        let fei = regs.burst_read(REG_FREQ_ERROR_MSB, 3)?;

        Ok(Self {
            rssi_dbm: rssi as i16 - rssi_offset(frequency_hz),
            snr_db: decode_snr(snr),
            frequency_error_hz: decode_frequency_error(fei[0], fei[1], fei[2], bandwidth_hz),
        })
    }
}

/// Receive result latched by the interrupt worker until `parse_packet`
/// collects it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    Packet(usize),
    CrcError,
}

#[derive(Debug, Default)]
pub struct PacketFramer {
    cursor: usize,
    length: usize,
    pending: Option<RxOutcome>,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh outgoing packet
    pub fn begin<H: Hal>(&mut self, regs: &mut RegisterInterface<H>) -> Result<(), HalError> {
        regs.write(REG_FIFO_ADDR_PTR, 0)?;
        regs.write(REG_PAYLOAD_LENGTH, 0)?;
        self.cursor = 0;
        self.length = 0;
        Ok(())
    }

    /// Append payload bytes, returning how many fit.
    pub fn write<H: Hal>(
        &mut self,
        regs: &mut RegisterInterface<H>,
        data: &[u8],
    ) -> Result<usize, HalError> {
        let accepted = data.len().min(MAX_PKT_LENGTH - self.cursor);

        regs.burst_write(REG_FIFO, &data[..accepted])?;
        self.cursor += accepted;
        self.length = self.cursor;
        regs.write(REG_PAYLOAD_LENGTH, self.cursor as u8)?;

        Ok(accepted)
    }

    /// Point the FIFO at the packet just received and reset the cursor.
    ///
    /// Returns the packet length.
    pub fn capture_rx<H: Hal>(
        &mut self,
        regs: &mut RegisterInterface<H>,
        implicit: bool,
    ) -> Result<usize, HalError> {
        let length = if implicit {
            regs.read(REG_PAYLOAD_LENGTH)?
        } else {
            regs.read(REG_RX_NB_BYTES)?
        };
        let start = regs.read(REG_FIFO_RX_CURRENT_ADDR)?;
        regs.write(REG_FIFO_ADDR_PTR, start)?;

        self.cursor = 0;
        self.length = length as usize;
        Ok(self.length)
    }

    /// Bytes left to read in the current packet
    pub fn available(&self) -> usize {
        self.length.saturating_sub(self.cursor)
    }

    pub fn read_byte<H: Hal>(
        &mut self,
        regs: &mut RegisterInterface<H>,
    ) -> Result<Option<u8>, HalError> {
        if self.available() == 0 {
            return Ok(None);
        }
        let byte = regs.read(REG_FIFO)?;
        self.cursor += 1;
        Ok(Some(byte))
    }

    /// Next byte without consuming it
    pub fn peek<H: Hal>(&self, regs: &mut RegisterInterface<H>) -> Result<Option<u8>, HalError> {
        if self.available() == 0 {
            return Ok(None);
        }
        let ptr = regs.read(REG_FIFO_ADDR_PTR)?;
        let byte = regs.read(REG_FIFO)?;
        regs.write(REG_FIFO_ADDR_PTR, ptr)?;
        Ok(Some(byte))
    }

    /// Burst read into `buf`, bounded by the bytes left
    pub fn read_into<H: Hal>(
        &mut self,
        regs: &mut RegisterInterface<H>,
        buf: &mut [u8],
    ) -> Result<usize, HalError> {
        let count = buf.len().min(self.available());
        regs.burst_read_into(REG_FIFO, &mut buf[..count])?;
        self.cursor += count;
        Ok(count)
    }

    /// Drop whatever is left of the current packet
    pub fn discard(&mut self) {
        self.cursor = self.length;
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Remember a receive outcome for the next `parse_packet`.
    ///
    /// A CRC failure also empties the readable packet.
    pub fn latch(&mut self, outcome: RxOutcome) {
        if outcome == RxOutcome::CrcError {
            self.drop_packet();
        }
        self.pending = Some(outcome);
    }

    /// Forget the current packet entirely
    pub fn drop_packet(&mut self) {
        self.cursor = 0;
        self.length = 0;
    }

    pub fn take_pending(&mut self) -> Option<RxOutcome> {
        self.pending.take()
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::registers::fake::FakeBus;

    fn regs() -> RegisterInterface<FakeBus> {
        RegisterInterface::new(FakeBus::new())
    }

    #[test]
    fn test_write_updates_payload_length() {
        let mut regs = regs();
        let mut framer = PacketFramer::new();
        framer.begin(&mut regs).unwrap();

        assert_eq!(framer.write(&mut regs, b"he").unwrap(), 2);
        assert_eq!(framer.write(&mut regs, b"llo").unwrap(), 3);

        assert_eq!(regs.read(REG_PAYLOAD_LENGTH).unwrap(), 5);
        assert_eq!(&regs.hal_mut().fifo[..5], b"hello");
    }

    #[test]
    fn test_write_truncates_at_capacity() {
        let mut regs = regs();
        let mut framer = PacketFramer::new();
        framer.begin(&mut regs).unwrap();

        assert_eq!(framer.write(&mut regs, &[0xAA; 250]).unwrap(), 250);
        assert_eq!(framer.write(&mut regs, &[0xBB; 10]).unwrap(), 5);
        assert_eq!(framer.write(&mut regs, &[0xCC]).unwrap(), 0);
        assert_eq!(framer.length(), MAX_PKT_LENGTH);
        assert_eq!(regs.read(REG_PAYLOAD_LENGTH).unwrap(), 255);
    }

    #[test]
    fn test_begin_resets_cursor() {
        let mut regs = regs();
        let mut framer = PacketFramer::new();
        framer.begin(&mut regs).unwrap();
        framer.write(&mut regs, b"abc").unwrap();

        framer.begin(&mut regs).unwrap();
        assert_eq!(framer.length(), 0);
        assert_eq!(regs.read(REG_PAYLOAD_LENGTH).unwrap(), 0);
        assert_eq!(regs.read(REG_FIFO_ADDR_PTR).unwrap(), 0);
    }

    #[test]
    fn test_capture_and_read() {
        let mut regs = regs();
        regs.hal_mut().fifo[0x20..0x24].copy_from_slice(b"ping");
        regs.hal_mut().regs[REG_FIFO_RX_CURRENT_ADDR as usize] = 0x20;
        regs.hal_mut().regs[REG_RX_NB_BYTES as usize] = 4;

        let mut framer = PacketFramer::new();
        assert_eq!(framer.capture_rx(&mut regs, false).unwrap(), 4);
        assert_eq!(framer.peek(&mut regs).unwrap(), Some(b'p'));
        assert_eq!(framer.read_byte(&mut regs).unwrap(), Some(b'p'));

        let mut buf = [0u8; 8];
        assert_eq!(framer.read_into(&mut regs, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"ing");
        assert_eq!(framer.read_byte(&mut regs).unwrap(), None);
        assert_eq!(framer.peek(&mut regs).unwrap(), None);
    }

    #[test]
    fn test_implicit_capture_uses_payload_length() {
        let mut regs = regs();
        regs.hal_mut().regs[REG_PAYLOAD_LENGTH as usize] = 12;
        regs.hal_mut().regs[REG_RX_NB_BYTES as usize] = 3;

        let mut framer = PacketFramer::new();
        assert_eq!(framer.capture_rx(&mut regs, true).unwrap(), 12);
    }

    #[test]
    fn test_crc_latch_empties_packet() {
        let mut regs = regs();
        regs.hal_mut().regs[REG_RX_NB_BYTES as usize] = 4;
        let mut framer = PacketFramer::new();
        framer.capture_rx(&mut regs, false).unwrap();

        framer.latch(RxOutcome::CrcError);
        assert_eq!(framer.available(), 0);
        assert_eq!(framer.take_pending(), Some(RxOutcome::CrcError));
        assert_eq!(framer.take_pending(), None);
    }

    #[test]
    fn test_metrics_capture() {
        let mut regs = regs();
        {
            let bus = regs.hal_mut();
            bus.regs[REG_PKT_SNR_VALUE as usize] = 0x28;
            bus.regs[REG_PKT_RSSI_VALUE as usize] = 60;
            bus.regs[REG_FREQ_ERROR_MID as usize] = 0x10;
        }

        let metrics = SignalMetrics::capture(&mut regs, 915_000_000, 125_000).unwrap();
        assert_eq!(metrics.snr_db, 10.0);
        assert_eq!(metrics.rssi_dbm, -97);
        assert_eq!(metrics.frequency_error_hz, 536);

        let metrics = SignalMetrics::capture(&mut regs, 433_000_000, 125_000).unwrap();
        assert_eq!(metrics.rssi_dbm, -104);
    }
}
