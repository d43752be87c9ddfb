//! # LoRa Modulation Parameters and Unit Conversions
//!
//! Pure conversions between user-facing units (Hz, dBm, mA) and SX127x
//! register encodings. Nothing in here touches the bus; the setters in
//! [`crate::radio::config`] write the values computed here.
//!
//! ## Symbol duration and low data rate optimisation
//!
//! A LoRa symbol lasts `2^SF / BW` seconds. When a symbol is longer than
//! 16 ms the receiver needs the low data rate optimisation bit
//! (MODEM_CONFIG_3 bit 3) to stay locked over the whole packet:
//!
//! ```text
//! SF \ BW    7.8k   62.5k   125k    250k   500k
//! SF7       16.4     2.0     1.0     0.5    0.3   ms
//! SF11     262.6    32.8    16.4     8.2    4.1   ms
//! SF12     525.1    65.5    32.8    16.4    8.2   ms
//! ```

use serde::{Deserialize, Serialize};

use crate::radio::config::{MAX_SPREADING_FACTOR, MIN_SPREADING_FACTOR};
use crate::radio::registers::{PA_BOOST, PA_DAC_DEFAULT, PA_DAC_HIGH_POWER};

/// Crystal oscillator frequency of the SX127x
pub const FXOSC_HZ: u64 = 32_000_000;

/// Symbol duration above which low data rate optimisation is required
pub const LDO_SYMBOL_THRESHOLD_MS: f64 = 16.0;

/// Frequencies below this use the low-frequency RSSI offset
pub const LF_HF_BOUNDARY_HZ: u32 = 525_000_000;

/// Signal bandwidth settings of MODEM_CONFIG_1 bits 7-4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bandwidth {
    Bw7_8kHz,
    Bw10_4kHz,
    Bw15_6kHz,
    Bw20_8kHz,
    Bw31_25kHz,
    Bw41_7kHz,
    Bw62_5kHz,
    Bw125kHz,
    Bw250kHz,
    Bw500kHz,
}

impl Bandwidth {
    const ALL: [Bandwidth; 10] = [
        Bandwidth::Bw7_8kHz,
        Bandwidth::Bw10_4kHz,
        Bandwidth::Bw15_6kHz,
        Bandwidth::Bw20_8kHz,
        Bandwidth::Bw31_25kHz,
        Bandwidth::Bw41_7kHz,
        Bandwidth::Bw62_5kHz,
        Bandwidth::Bw125kHz,
        Bandwidth::Bw250kHz,
        Bandwidth::Bw500kHz,
    ];

    /// Nominal bandwidth in Hz
    pub fn hz(self) -> u32 {
        match self {
            Bandwidth::Bw7_8kHz => 7_800,
            Bandwidth::Bw10_4kHz => 10_400,
            Bandwidth::Bw15_6kHz => 15_600,
            Bandwidth::Bw20_8kHz => 20_800,
            Bandwidth::Bw31_25kHz => 31_250,
            Bandwidth::Bw41_7kHz => 41_700,
            Bandwidth::Bw62_5kHz => 62_500,
            Bandwidth::Bw125kHz => 125_000,
            Bandwidth::Bw250kHz => 250_000,
            Bandwidth::Bw500kHz => 500_000,
        }
    }

    /// Register index (0..=9)
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Smallest supported bandwidth that is at least `hz`; anything above
    /// 250 kHz selects 500 kHz.
    pub fn from_hz(hz: u32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|bw| hz <= bw.hz())
            .unwrap_or(Bandwidth::Bw500kHz)
    }

    /// Decode a register index; reserved values yield `None`
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// Power amplifier output pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaOutput {
    /// RFO pin, up to 14 dBm
    Rfo,
    /// PA_BOOST pin, up to 20 dBm
    PaBoost,
}

impl Default for PaOutput {
    fn default() -> Self {
        PaOutput::PaBoost
    }
}

/// Register values produced by [`pa_settings`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaSettings {
    pub pa_config: u8,
    /// REG_PA_DAC value, only written for PA_BOOST
    pub pa_dac: Option<u8>,
    /// Over-current limit to program alongside, in mA
    pub ocp_ma: Option<u8>,
}

/// FRF register value for a carrier frequency: `hz * 2^19 / FXOSC`
pub fn frequency_to_frf(hz: u32) -> u32 {
    (((hz as u64) << 19) / FXOSC_HZ) as u32
}

/// Symbol duration in milliseconds.
///
/// The spreading factor is clamped to SF6..SF12 as the modem does.
pub fn symbol_duration_ms(spreading_factor: u8, bandwidth_hz: u32) -> f64 {
    if bandwidth_hz == 0 {
        return f64::INFINITY;
    }
    let sf = spreading_factor.clamp(MIN_SPREADING_FACTOR, MAX_SPREADING_FACTOR);
    (1u64 << sf) as f64 * 1000.0 / bandwidth_hz as f64
}

pub fn low_data_rate_optimize_required(spreading_factor: u8, bandwidth_hz: u32) -> bool {
    symbol_duration_ms(spreading_factor, bandwidth_hz) > LDO_SYMBOL_THRESHOLD_MS
}

/// OCP trim bits for a current limit in mA.
///
/// Limits above 240 mA saturate at trim 27.
pub fn ocp_trim(ma: u8) -> u8 {
    if ma <= 120 {
        ma.saturating_sub(45) / 5
    } else if ma <= 240 {
        ((ma as u16 + 30) / 10) as u8
    } else {
        27
    }
}

/// REG_OCP value (OCP enabled) for a current limit in mA
pub fn ocp_register(ma: u8) -> u8 {
    0x20 | (ocp_trim(ma) & 0x1F)
}

/// Encode an output power request.
///
/// RFO accepts 0..=14 dBm. PA_BOOST accepts 2..=20 dBm; levels above 17 dBm
/// enable the high power DAC and raise the current limit.
pub fn pa_settings(level: i8, output: PaOutput) -> PaSettings {
    match output {
        PaOutput::Rfo => {
            let level = level.clamp(0, 14) as u8;
            PaSettings {
                pa_config: 0x70 | level,
                pa_dac: None,
                ocp_ma: None,
            }
        }
        PaOutput::PaBoost => {
            let (level, pa_dac, ocp_ma) = if level > 17 {
                (level.min(20) - 3, PA_DAC_HIGH_POWER, 140)
            } else {
                (level.max(2), PA_DAC_DEFAULT, 100)
            };
            PaSettings {
                pa_config: PA_BOOST | (level as u8 - 2),
                pa_dac: Some(pa_dac),
                ocp_ma: Some(ocp_ma),
            }
        }
    }
}

/// Offset subtracted from raw RSSI readings
pub fn rssi_offset(frequency_hz: u32) -> i16 {
    if frequency_hz < LF_HF_BOUNDARY_HZ {
        164
    } else {
        157
    }
}

/// REG_PKT_SNR_VALUE is two's complement in quarter dB
pub fn decode_snr(raw: u8) -> f32 {
    (raw as i8) as f32 * 0.25
}

/// Decode the 20-bit frequency error estimate into Hz
pub fn decode_frequency_error(msb: u8, mid: u8, lsb: u8, bandwidth_hz: u32) -> i32 {
    let mut raw = (((msb & 0x0F) as i32) << 16) | ((mid as i32) << 8) | lsb as i32;
    if msb & 0x08 != 0 {
        raw -= 1 << 20;
    }

    let error = raw as f64 * (1u64 << 24) as f64 / FXOSC_HZ as f64;
    (error * (bandwidth_hz as f64 / 500_000.0)) as i32
}

#[cfg(test)]
#[path = "modulation_tests.rs"]
mod tests;
