//! Tests for LoRa unit conversions

use super::*;
use crate::radio::registers::{PA_DAC_DEFAULT, PA_DAC_HIGH_POWER};

#[test]
fn test_frf_for_common_bands() {
    // 915 MHz -> 0xE4C000, 868 MHz -> 0xD90000, 433 MHz -> 0x6C4000
    assert_eq!(frequency_to_frf(915_000_000), 0xE4_C0_00);
    assert_eq!(frequency_to_frf(868_000_000), 0xD9_00_00);
    assert_eq!(frequency_to_frf(433_000_000), 0x6C_40_00);
}

#[test]
fn test_bandwidth_from_hz_rounds_up() {
    assert_eq!(Bandwidth::from_hz(7_800), Bandwidth::Bw7_8kHz);
    assert_eq!(Bandwidth::from_hz(7_801), Bandwidth::Bw10_4kHz);
    assert_eq!(Bandwidth::from_hz(125_000), Bandwidth::Bw125kHz);
    assert_eq!(Bandwidth::from_hz(200_000), Bandwidth::Bw250kHz);
    assert_eq!(Bandwidth::from_hz(250_001), Bandwidth::Bw500kHz);
    assert_eq!(Bandwidth::from_hz(u32::MAX), Bandwidth::Bw500kHz);
}

#[test]
fn test_bandwidth_index_round_trip() {
    for index in 0..10 {
        let bw = Bandwidth::from_index(index).unwrap();
        assert_eq!(bw.index(), index);
    }
    assert_eq!(Bandwidth::from_index(10), None);
    assert_eq!(Bandwidth::from_index(15), None);
}

#[test]
fn test_symbol_duration() {
    assert!((symbol_duration_ms(7, 125_000) - 1.024).abs() < 1e-9);
    assert!((symbol_duration_ms(12, 125_000) - 32.768).abs() < 1e-9);
}

#[test]
fn test_symbol_duration_clamps_spreading_factor() {
    assert_eq!(symbol_duration_ms(200, 125_000), symbol_duration_ms(12, 125_000));
    assert_eq!(symbol_duration_ms(0, 125_000), symbol_duration_ms(6, 125_000));
    assert!(low_data_rate_optimize_required(u8::MAX, 125_000));
}

#[test]
fn test_ldo_threshold() {
    assert!(!low_data_rate_optimize_required(7, 125_000));
    assert!(!low_data_rate_optimize_required(10, 125_000));
    // 16.384 ms is just past the limit
    assert!(low_data_rate_optimize_required(11, 125_000));
    assert!(low_data_rate_optimize_required(12, 125_000));
    assert!(!low_data_rate_optimize_required(12, 500_000));
    assert!(low_data_rate_optimize_required(7, 7_800));
}

#[test]
fn test_ocp_trim() {
    assert_eq!(ocp_trim(45), 0);
    assert_eq!(ocp_trim(100), 11);
    assert_eq!(ocp_trim(120), 15);
    assert_eq!(ocp_trim(140), 17);
    assert_eq!(ocp_trim(240), 27);
    assert_eq!(ocp_trim(255), 27);
    assert_eq!(ocp_register(100), 0x2B);
    assert_eq!(ocp_register(140), 0x31);
}

#[test]
fn test_pa_settings_rfo() {
    let pa = pa_settings(14, PaOutput::Rfo);
    assert_eq!(pa.pa_config, 0x7E);
    assert_eq!(pa.pa_dac, None);

    assert_eq!(pa_settings(20, PaOutput::Rfo).pa_config, 0x7E);
    assert_eq!(pa_settings(-3, PaOutput::Rfo).pa_config, 0x70);
}

#[test]
fn test_pa_settings_boost() {
    let pa = pa_settings(17, PaOutput::PaBoost);
    assert_eq!(pa.pa_config, 0x8F);
    assert_eq!(pa.pa_dac, Some(PA_DAC_DEFAULT));
    assert_eq!(pa.ocp_ma, Some(100));

    let pa = pa_settings(20, PaOutput::PaBoost);
    assert_eq!(pa.pa_config, 0x8F);
    assert_eq!(pa.pa_dac, Some(PA_DAC_HIGH_POWER));
    assert_eq!(pa.ocp_ma, Some(140));

    // Clamped at both ends
    assert_eq!(pa_settings(30, PaOutput::PaBoost).pa_config, 0x8F);
    assert_eq!(pa_settings(0, PaOutput::PaBoost).pa_config, 0x80);
}

#[test]
fn test_rssi_offset_by_band() {
    assert_eq!(rssi_offset(433_000_000), 164);
    assert_eq!(rssi_offset(868_000_000), 157);
    assert_eq!(rssi_offset(915_000_000), 157);
}

#[test]
fn test_decode_snr() {
    assert_eq!(decode_snr(0x28), 10.0);
    assert_eq!(decode_snr(0xF6), -2.5);
}

#[test]
fn test_decode_frequency_error() {
    assert_eq!(decode_frequency_error(0x00, 0x10, 0x00, 125_000), 536);
    assert_eq!(decode_frequency_error(0x0F, 0xF0, 0x00, 125_000), -536);
    assert_eq!(decode_frequency_error(0x00, 0x00, 0x00, 125_000), 0);
}
