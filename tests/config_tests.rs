//! Loading radio configuration files.


use std::io::Write;

use mock_support::MockChip;
use sx127x_lora::radio::registers::*;
use sx127x_lora::{LoRa, LoRaError, PaOutput, RadioConfig};
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"{
            "spi_bus": 0,
            "chip_select": 1,
            "spi_clock_hz": 4000000,
            "reset_pin": 22,
            "dio0_pin": 25,
            "frequency_hz": 868100000,
            "tx_power_dbm": 14,
            "pa_output": "rfo",
            "spreading_factor": 10,
            "bandwidth_hz": 125000,
            "coding_rate_denominator": 8,
            "preamble_length": 10,
            "sync_word": 52,
            "crc": true,
            "invert_iq": true,
            "tx_timeout_ms": 4000,
            "worker_stack_size": 131072
        }"#,
    );

    let config = RadioConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.chip_select, 1);
    assert_eq!(config.reset_pin, Some(22));
    assert_eq!(config.dio0_pin, Some(25));
    assert_eq!(config.pa_output, PaOutput::Rfo);
    assert_eq!(config.sync_word, 0x34);
    assert_eq!(config.tx_timeout().as_millis(), 4000);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RadioConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, LoRaError::Io(_)));
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let file = write_config(r#"{"bandwidth_hz": 1000000}"#);
    let err = RadioConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, LoRaError::Configuration(_)));
}

#[test]
fn test_unparsable_file() {
    let file = write_config("frequency_hz = 868");
    let err = RadioConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, LoRaError::ConfigParse(_)));
}

#[test]
fn test_round_trip_through_file() {
    let config = RadioConfig {
        frequency_hz: 433_175_000,
        spreading_factor: 12,
        ..Default::default()
    };
    let file = write_config(&config.to_json_string().unwrap());

    assert_eq!(RadioConfig::from_json_file(file.path()).unwrap(), config);
}

#[test]
fn test_loaded_file_drives_the_radio() {
    let file = write_config(
        r#"{"frequency_hz": 433000000, "spreading_factor": 12, "invert_iq": true,
            "tx_power_dbm": 20, "tx_timeout_ms": 500}"#,
    );
    let config = RadioConfig::from_json_file(file.path()).unwrap();

    let chip = MockChip::new();
    let radio = LoRa::builder(chip.clone()).config(&config).build();
    radio.begin_with_config(&config).unwrap();

    assert_eq!(radio.frequency(), 433_000_000);
    assert_eq!(radio.spreading_factor().unwrap(), 12);
    assert!(radio.low_data_rate_optimize().unwrap());
    assert_eq!(chip.reg(REG_INVERTIQ), 0x66);
    assert_eq!(chip.reg(REG_PA_DAC), PA_DAC_HIGH_POWER);
    assert_eq!(radio.tx_timeout().as_millis(), 500);
}
