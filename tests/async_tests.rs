//! The tokio facade over the callback driver.


use std::thread;
use std::time::Duration;

use mock_support::{wait_until, MockChip, WAIT};
use sx127x_lora::radio::registers::*;
use sx127x_lora::{AsyncLoRa, LoRa, LoRaError, OperatingMode, PacketRadio};

fn async_radio(chip: &MockChip) -> AsyncLoRa<MockChip> {
    let radio = LoRa::builder(chip.clone())
        .event_line(chip.line())
        .tx_timeout(Duration::from_millis(500))
        .build();
    radio.begin(915_000_000).unwrap();
    AsyncLoRa::new(radio).unwrap()
}

/// Run `action` on the chip once its op mode reaches `mode`
fn when_mode(chip: &MockChip, mode: u8, action: impl FnOnce(&MockChip) + Send + 'static) {
    let chip = chip.clone();
    thread::spawn(move || {
        if wait_until(WAIT, || chip.op_mode() == mode) {
            action(&chip);
        }
    });
}

#[tokio::test]
async fn test_transmit_waits_for_tx_done() {
    let chip = MockChip::new();
    chip.set_auto_tx_done(true);
    let mut radio = async_radio(&chip);

    radio.transmit(b"ping").await.unwrap();
    radio.transmit(b"pong").await.unwrap();

    assert_eq!(chip.transmitted(), vec![b"ping".to_vec(), b"pong".to_vec()]);
    assert_eq!(radio.radio().mode(), OperatingMode::Standby);
}

#[tokio::test]
async fn test_transmit_timeout_returns_to_standby() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    let err = radio.transmit(b"lost").await.unwrap_err();
    assert!(matches!(err, LoRaError::Timeout(_)));
    assert_eq!(chip.op_mode(), MODE_STDBY);
}

#[tokio::test]
async fn test_transmit_rejects_oversized_payload() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    let err = radio.transmit(&[0u8; 256]).await.unwrap_err();
    assert!(matches!(err, LoRaError::PacketTooLarge { len: 256, max: 255 }));
    assert!(chip.transmitted().is_empty());
}

#[tokio::test]
async fn test_next_packet_delivers_payload_and_metrics() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    when_mode(&chip, MODE_RX_CONTINUOUS, |chip| {
        chip.inject_packet(b"telemetry", true)
    });

    let packet = radio.next_packet(WAIT).await.unwrap().unwrap();
    assert_eq!(packet.data, b"telemetry".to_vec());
    assert_eq!(packet.metrics.rssi_dbm, 80 - 157);
    assert_eq!(packet.metrics.snr_db, 5.0);
    assert_eq!(radio.radio().mode(), OperatingMode::ReceiveContinuous);
}

#[tokio::test]
async fn test_next_packet_times_out_quietly() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    let packet = radio.next_packet(Duration::from_millis(20)).await.unwrap();
    assert!(packet.is_none());
}

#[tokio::test]
async fn test_next_packet_skips_crc_errors() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);
    radio.radio().enable_crc().unwrap();

    when_mode(&chip, MODE_RX_CONTINUOUS, |chip| {
        chip.inject_packet(b"corrupt", false);
        thread::sleep(Duration::from_millis(20));
        chip.inject_packet(b"good", true);
    });

    let packet = radio.next_packet(WAIT).await.unwrap().unwrap();
    assert_eq!(packet.data, b"good".to_vec());
}

#[tokio::test]
async fn test_channel_clear_and_busy() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    when_mode(&chip, MODE_CAD, |chip| chip.complete_cad(false));
    assert!(radio.is_channel_clear(WAIT).await.unwrap());

    when_mode(&chip, MODE_CAD, |chip| chip.complete_cad(true));
    assert!(!radio.is_channel_clear(WAIT).await.unwrap());
}

#[tokio::test]
async fn test_channel_check_timeout() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    let err = radio
        .is_channel_clear(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, LoRaError::Timeout(_)));
    assert_eq!(radio.radio().mode(), OperatingMode::Standby);
}

#[tokio::test]
async fn test_power_modes_and_rssi() {
    let chip = MockChip::new();
    let mut radio = async_radio(&chip);

    radio.sleep().await.unwrap();
    assert_eq!(chip.op_mode(), MODE_SLEEP);
    radio.standby().await.unwrap();
    assert_eq!(chip.op_mode(), MODE_STDBY);

    chip.set_reg(REG_RSSI_VALUE, 60);
    assert_eq!(radio.rssi().await.unwrap(), 60 - 157);
}

#[tokio::test]
async fn test_driver_info() {
    let chip = MockChip::new();
    let radio = async_radio(&chip);

    let info = radio.driver_info();
    assert_eq!(info.name, "SX127x");
    assert_eq!(info.max_packet_size, 255);
    assert!(info
        .frequency_bands
        .iter()
        .any(|&(low, high)| (low..=high).contains(&915_000_000)));
}

#[test]
fn test_requires_event_line() {
    let chip = MockChip::new();
    let radio = LoRa::new(chip.clone());
    radio.begin(915_000_000).unwrap();

    let err = AsyncLoRa::new(radio).err().unwrap();
    assert!(matches!(err, LoRaError::Configuration(_)));
}

#[test]
fn test_drop_releases_line() {
    let chip = MockChip::new();
    let radio = async_radio(&chip);
    assert!(chip.line_attached());

    drop(radio);
    assert!(!chip.line_attached());
}
