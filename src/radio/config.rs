//! # Modem Configuration
//!
//! Setters and getters for the LoRa modem parameters. Each one runs as a
//! single critical section on the chip.
//!
//! The chip accepts these writes in any mode, but their effect is only
//! defined in Sleep or Standby. Changing them while transmitting or
//! receiving is left to the caller and not guarded here.
//!
//! ## Register fields touched
//!
//! ```text
//! MODEM_CONFIG_1 (0x1D): BW[7:4]  CR[3:1]  ImplicitHeader[0]
//! MODEM_CONFIG_2 (0x1E): SF[7:4]  TxCont[3]  RxCrcOn[2]  SymbTimeout[9:8]
//! MODEM_CONFIG_3 (0x26): LowDataRateOptimize[3]  AgcAutoOn[2]
//! ```

use log::debug;

use crate::error::LoRaError;
use crate::radio::driver::{Chip, LoRa};
use crate::radio::hal::{Hal, HalError};
use crate::radio::mode::OperatingMode;
use crate::radio::modulation::{
    frequency_to_frf, low_data_rate_optimize_required, ocp_register, pa_settings, Bandwidth,
    PaOutput,
};
use crate::radio::registers::*;

pub const MIN_SPREADING_FACTOR: u8 = 6;
pub const MAX_SPREADING_FACTOR: u8 = 12;
pub const MAX_PREAMBLE_TIMEOUT: u16 = 0x3FF;
pub const MAX_GAIN: u8 = 6;

impl<H: Hal> Chip<H> {
    pub(crate) fn set_frequency(&mut self, hz: u32) -> Result<(), HalError> {
        let frf = frequency_to_frf(hz);
        self.regs.write(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.regs.write(REG_FRF_MID, (frf >> 8) as u8)?;
        self.regs.write(REG_FRF_LSB, frf as u8)?;
        self.frequency_hz = hz;
        Ok(())
    }

    pub(crate) fn spreading_factor(&mut self) -> Result<u8, HalError> {
        Ok(self.regs.read(REG_MODEM_CONFIG_2)? >> 4)
    }

    pub(crate) fn set_spreading_factor(&mut self, sf: u8) -> Result<(), HalError> {
        let sf = sf.clamp(MIN_SPREADING_FACTOR, MAX_SPREADING_FACTOR);

        // SF6 only works with its own detection settings
        if sf == 6 {
            self.regs.write(REG_DETECTION_OPTIMIZE, 0xC5)?;
            self.regs.write(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.regs.write(REG_DETECTION_OPTIMIZE, 0xC3)?;
            self.regs.write(REG_DETECTION_THRESHOLD, 0x0A)?;
        }

        self.regs.modify(REG_MODEM_CONFIG_2, 0xF0, sf << 4)?;
        self.apply_low_data_rate_optimize()
    }

    /// Bandwidth in Hz, `None` for a reserved register value
    pub(crate) fn bandwidth_hz(&mut self) -> Result<Option<u32>, HalError> {
        let index = self.regs.read(REG_MODEM_CONFIG_1)? >> 4;
        Ok(Bandwidth::from_index(index).map(Bandwidth::hz))
    }

    pub(crate) fn set_signal_bandwidth(&mut self, hz: u32) -> Result<(), HalError> {
        let bw = Bandwidth::from_hz(hz);
        self.regs.modify(REG_MODEM_CONFIG_1, 0xF0, bw.index() << 4)?;
        self.apply_low_data_rate_optimize()
    }

    pub(crate) fn set_coding_rate4(&mut self, denominator: u8) -> Result<(), HalError> {
        let cr = denominator.clamp(5, 8) - 4;
        self.regs.modify(REG_MODEM_CONFIG_1, 0x0E, cr << 1)?;
        Ok(())
    }

    pub(crate) fn set_preamble_length(&mut self, length: u16) -> Result<(), HalError> {
        self.regs.write(REG_PREAMBLE_MSB, (length >> 8) as u8)?;
        self.regs.write(REG_PREAMBLE_LSB, length as u8)
    }

    pub(crate) fn set_preamble_timeout(&mut self, symbols: u16) -> Result<(), HalError> {
        let symbols = symbols.min(MAX_PREAMBLE_TIMEOUT);
        self.regs.modify(REG_MODEM_CONFIG_2, 0x03, (symbols >> 8) as u8)?;
        self.regs.write(REG_SYMB_TIMEOUT_LSB, symbols as u8)
    }

    pub(crate) fn set_sync_word(&mut self, sync_word: u8) -> Result<(), HalError> {
        self.regs.write(REG_SYNC_WORD, sync_word)
    }

    pub(crate) fn set_crc(&mut self, enabled: bool) -> Result<(), HalError> {
        let bits = if enabled { RX_PAYLOAD_CRC_ON } else { 0 };
        self.regs.modify(REG_MODEM_CONFIG_2, RX_PAYLOAD_CRC_ON, bits)?;
        Ok(())
    }

    pub(crate) fn set_invert_iq(&mut self, inverted: bool) -> Result<(), HalError> {
        let (iq, iq2) = if inverted { (0x66, 0x19) } else { (0x27, 0x1D) };
        self.regs.write(REG_INVERTIQ, iq)?;
        self.regs.write(REG_INVERTIQ2, iq2)
    }

    /// Write the LDO bit from the caller override, or from the current
    /// spreading factor and bandwidth.
    pub(crate) fn apply_low_data_rate_optimize(&mut self) -> Result<(), HalError> {
        let enabled = match self.mode.ldo_override() {
            Some(forced) => forced,
            None => {
                let sf = self.spreading_factor()?;
                match self.bandwidth_hz()? {
                    Some(bw) => low_data_rate_optimize_required(sf, bw),
                    None => false,
                }
            }
        };

        let bits = if enabled { LOW_DATA_RATE_OPTIMIZE } else { 0 };
        self.regs.modify(REG_MODEM_CONFIG_3, LOW_DATA_RATE_OPTIMIZE, bits)?;
        Ok(())
    }

    pub(crate) fn low_data_rate_optimize(&mut self) -> Result<bool, HalError> {
        Ok(self.regs.read(REG_MODEM_CONFIG_3)? & LOW_DATA_RATE_OPTIMIZE != 0)
    }

    pub(crate) fn set_ocp(&mut self, ma: u8) -> Result<(), HalError> {
        self.regs.write(REG_OCP, ocp_register(ma))
    }

    pub(crate) fn set_tx_power(&mut self, level: i8, output: PaOutput) -> Result<(), HalError> {
        let pa = pa_settings(level, output);
        if let Some(ma) = pa.ocp_ma {
            self.set_ocp(ma)?;
        }
        if let Some(dac) = pa.pa_dac {
            self.regs.write(REG_PA_DAC, dac)?;
        }
        self.regs.write(REG_PA_CONFIG, pa.pa_config)
    }

    pub(crate) fn set_gain(&mut self, gain: u8) -> Result<(), HalError> {
        let gain = gain.min(MAX_GAIN);
        self.enter(OperatingMode::Standby)?;

        if gain == 0 {
            self.regs
                .modify(REG_MODEM_CONFIG_3, AGC_AUTO_ON, AGC_AUTO_ON)?;
        } else {
            self.regs.modify(REG_MODEM_CONFIG_3, AGC_AUTO_ON, 0)?;
            self.regs.write(REG_LNA, LNA_BOOST_HF | (gain << 5))?;
        }
        Ok(())
    }
}

impl<H: Hal + 'static> LoRa<H> {
    /// Carrier frequency in Hz
    pub fn set_frequency(&self, hz: u32) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_frequency(hz)?))
    }

    pub fn spreading_factor(&self) -> Result<u8, LoRaError> {
        self.with_chip(|chip| Ok(chip.spreading_factor()?))
    }

    /// Spreading factor, clamped to 6..=12. Re-evaluates low data rate
    /// optimisation.
    pub fn set_spreading_factor(&self, sf: u8) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_spreading_factor(sf)?))?;
        debug!("Spreading factor SF{}", sf.clamp(MIN_SPREADING_FACTOR, MAX_SPREADING_FACTOR));
        Ok(())
    }

    /// Signal bandwidth in Hz, `None` if the register holds a reserved value
    pub fn signal_bandwidth(&self) -> Result<Option<u32>, LoRaError> {
        self.with_chip(|chip| Ok(chip.bandwidth_hz()?))
    }

    /// Select the smallest bandwidth of at least `hz`. Re-evaluates low data
    /// rate optimisation.
    pub fn set_signal_bandwidth(&self, hz: u32) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_signal_bandwidth(hz)?))
    }

    /// Coding rate 4/`denominator`, clamped to 4/5..=4/8
    pub fn set_coding_rate4(&self, denominator: u8) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_coding_rate4(denominator)?))
    }

    pub fn set_preamble_length(&self, length: u16) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_preamble_length(length)?))
    }

    /// RX single timeout in symbols (up to 1023)
    pub fn set_preamble_timeout(&self, symbols: u16) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_preamble_timeout(symbols)?))
    }

    pub fn set_sync_word(&self, sync_word: u8) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_sync_word(sync_word)?))
    }

    pub fn enable_crc(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_crc(true)?))
    }

    pub fn disable_crc(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_crc(false)?))
    }

    /// Payload CRC generation and checking, as programmed in the modem
    pub fn crc_enabled(&self) -> Result<bool, LoRaError> {
        let config = self.with_chip(|chip| Ok(chip.regs.read(REG_MODEM_CONFIG_2)?))?;
        Ok(config & RX_PAYLOAD_CRC_ON != 0)
    }

    pub fn enable_invert_iq(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_invert_iq(true)?))
    }

    pub fn disable_invert_iq(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_invert_iq(false)?))
    }

    /// Force low data rate optimisation on
    pub fn enable_low_data_rate_optimize(&self) -> Result<(), LoRaError> {
        self.set_ldo_override(Some(true))
    }

    /// Force low data rate optimisation off
    pub fn disable_low_data_rate_optimize(&self) -> Result<(), LoRaError> {
        self.set_ldo_override(Some(false))
    }

    /// Derive low data rate optimisation from SF and bandwidth again
    pub fn auto_low_data_rate_optimize(&self) -> Result<(), LoRaError> {
        self.set_ldo_override(None)
    }

    pub fn low_data_rate_optimize(&self) -> Result<bool, LoRaError> {
        self.with_chip(|chip| Ok(chip.low_data_rate_optimize()?))
    }

    fn set_ldo_override(&self, value: Option<bool>) -> Result<(), LoRaError> {
        self.with_chip(|chip| {
            chip.mode.set_ldo_override(value);
            Ok(chip.apply_low_data_rate_optimize()?)
        })
    }

    /// Output power in dBm on the given PA pin
    pub fn set_tx_power(&self, level: i8, output: PaOutput) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_tx_power(level, output)?))
    }

    /// Over-current protection limit in mA
    pub fn set_ocp(&self, ma: u8) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_ocp(ma)?))
    }

    /// LNA gain: 0 enables AGC, 1 (max) to 6 (min) fix the gain.
    ///
    /// Moves the chip to Standby.
    pub fn set_gain(&self, gain: u8) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.set_gain(gain)?))
    }
}
