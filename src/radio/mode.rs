//! # Operating Mode Control
//!
//! Tracks the SX127x operating mode and header mode, and performs the
//! register writes for each transition. The chip accepts any mode change at
//! any time; the only sequencing rule enforced here is that leaving Sleep
//! goes through Standby and waits for the oscillator to settle.

use std::thread;
use std::time::Duration;

use log::trace;

use crate::radio::hal::{Hal, HalError};
use crate::radio::registers::*;

/// Crystal oscillator start-up time after leaving sleep
pub const OSCILLATOR_SETTLE: Duration = Duration::from_micros(250);

/// SX127x operating modes in LoRa mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum OperatingMode {
    Sleep,
    Standby,
    Transmit,
    ReceiveContinuous,
    ReceiveSingle,
    ChannelActivityDetect,
}

impl OperatingMode {
    /// REG_OP_MODE value, LoRa bit included
    pub fn op_mode_bits(self) -> u8 {
        MODE_LONG_RANGE_MODE
            | match self {
                OperatingMode::Sleep => MODE_SLEEP,
                OperatingMode::Standby => MODE_STDBY,
                OperatingMode::Transmit => MODE_TX,
                OperatingMode::ReceiveContinuous => MODE_RX_CONTINUOUS,
                OperatingMode::ReceiveSingle => MODE_RX_SINGLE,
                OperatingMode::ChannelActivityDetect => MODE_CAD,
            }
    }

    /// Decode the mode bits of REG_OP_MODE.
    ///
    /// Frequency synthesis modes (2 and 4) have no counterpart and yield `None`.
    pub fn from_op_mode(value: u8) -> Option<Self> {
        match value & MODE_MASK {
            MODE_SLEEP => Some(OperatingMode::Sleep),
            MODE_STDBY => Some(OperatingMode::Standby),
            MODE_TX => Some(OperatingMode::Transmit),
            MODE_RX_CONTINUOUS => Some(OperatingMode::ReceiveContinuous),
            MODE_RX_SINGLE => Some(OperatingMode::ReceiveSingle),
            MODE_CAD => Some(OperatingMode::ChannelActivityDetect),
            _ => None,
        }
    }

    /// Modes that end with a DIO0 event or run until told otherwise
    pub fn is_active(self) -> bool {
        !matches!(self, OperatingMode::Sleep | OperatingMode::Standby)
    }
}

/// Packet header mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum HeaderMode {
    /// Length, coding rate and CRC presence carried in the packet header
    #[default]
    Explicit,
    /// Length agreed out of band and programmed in REG_PAYLOAD_LENGTH
    Implicit,
}

/// Mode state of one chip.
#[derive(Debug)]
pub struct ModeController {
    mode: OperatingMode,
    header: HeaderMode,
    ldo_override: Option<bool>,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            mode: OperatingMode::Sleep,
            header: HeaderMode::Explicit,
            ldo_override: None,
        }
    }

    pub fn current(&self) -> OperatingMode {
        self.mode
    }

    pub fn header_mode(&self) -> HeaderMode {
        self.header
    }

    /// Put the chip into `target`.
    ///
    /// The register is always written, even if the tracked mode already
    /// matches, so a chip that drifted (e.g. RX single timing out on its own)
    /// is brought back in line.
    pub fn enter<H: Hal>(
        &mut self,
        regs: &mut RegisterInterface<H>,
        target: OperatingMode,
    ) -> Result<(), HalError> {
        if self.mode == OperatingMode::Sleep && target.is_active() {
            regs.write(REG_OP_MODE, OperatingMode::Standby.op_mode_bits())?;
            self.set(OperatingMode::Standby);
            thread::sleep(OSCILLATOR_SETTLE);
        }

        regs.write(REG_OP_MODE, target.op_mode_bits())?;
        self.set(target);
        Ok(())
    }

    /// Record that an operation started in `from` has completed and the chip
    /// fell back to Standby on its own.
    ///
    /// Returns `true` only for the first completion; a second report for the
    /// same operation is ignored.
    pub fn finish(&mut self, from: OperatingMode) -> bool {
        if self.mode == from {
            self.set(OperatingMode::Standby);
            true
        } else {
            false
        }
    }

    /// Force the tracked mode after an external reset
    pub fn reset_to(&mut self, mode: OperatingMode) {
        self.set(mode);
        self.header = HeaderMode::Explicit;
    }

    pub fn set_header_mode<H: Hal>(
        &mut self,
        regs: &mut RegisterInterface<H>,
        header: HeaderMode,
    ) -> Result<(), HalError> {
        let bits = match header {
            HeaderMode::Explicit => 0,
            HeaderMode::Implicit => IMPLICIT_HEADER_ON,
        };
        regs.modify(REG_MODEM_CONFIG_1, IMPLICIT_HEADER_ON, bits)?;
        self.header = header;
        Ok(())
    }

    /// Caller-forced low data rate optimisation, `None` when automatic
    pub fn ldo_override(&self) -> Option<bool> {
        self.ldo_override
    }

    pub fn set_ldo_override(&mut self, value: Option<bool>) {
        self.ldo_override = value;
    }

    fn set(&mut self, mode: OperatingMode) {
        if self.mode != mode {
            trace!("Mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::registers::fake::FakeBus;

    #[test]
    fn test_op_mode_bits_round_trip() {
        for mode in [
            OperatingMode::Sleep,
            OperatingMode::Standby,
            OperatingMode::Transmit,
            OperatingMode::ReceiveContinuous,
            OperatingMode::ReceiveSingle,
            OperatingMode::ChannelActivityDetect,
        ] {
            let bits = mode.op_mode_bits();
            assert_eq!(bits & MODE_LONG_RANGE_MODE, MODE_LONG_RANGE_MODE);
            assert_eq!(OperatingMode::from_op_mode(bits), Some(mode));
        }
        assert_eq!(OperatingMode::from_op_mode(0x82), None);
    }

    #[test]
    fn test_leaving_sleep_passes_through_standby() {
        let mut regs = RegisterInterface::new(FakeBus::new());
        let mut mode = ModeController::new();

        mode.enter(&mut regs, OperatingMode::Transmit).unwrap();

        assert_eq!(mode.current(), OperatingMode::Transmit);
        assert_eq!(regs.read(REG_OP_MODE).unwrap(), 0x83);
    }

    #[test]
    fn test_finish_only_once() {
        let mut regs = RegisterInterface::new(FakeBus::new());
        let mut mode = ModeController::new();
        mode.enter(&mut regs, OperatingMode::Transmit).unwrap();

        assert!(mode.finish(OperatingMode::Transmit));
        assert_eq!(mode.current(), OperatingMode::Standby);
        assert!(!mode.finish(OperatingMode::Transmit));
    }

    #[test]
    fn test_finish_ignores_other_modes() {
        let mut regs = RegisterInterface::new(FakeBus::new());
        let mut mode = ModeController::new();
        mode.enter(&mut regs, OperatingMode::ReceiveContinuous).unwrap();

        assert!(!mode.finish(OperatingMode::Transmit));
        assert_eq!(mode.current(), OperatingMode::ReceiveContinuous);
    }

    #[test]
    fn test_header_mode_bit() {
        let mut regs = RegisterInterface::new(FakeBus::new());
        let mut mode = ModeController::new();

        mode.set_header_mode(&mut regs, HeaderMode::Implicit).unwrap();
        assert_eq!(regs.read(REG_MODEM_CONFIG_1).unwrap(), 0x73);
        assert_eq!(mode.header_mode(), HeaderMode::Implicit);

        mode.set_header_mode(&mut regs, HeaderMode::Explicit).unwrap();
        assert_eq!(regs.read(REG_MODEM_CONFIG_1).unwrap(), 0x72);
    }
}
