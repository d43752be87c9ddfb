//! # Async Packet Radio Facade
//!
//! [`PacketRadio`] is a packet-level interface for async applications.
//! [`AsyncLoRa`] implements it on top of the callback-driven [`LoRa`] driver:
//! the DIO0 callbacks feed tokio channels, and each operation awaits the
//! matching channel under a timeout.
//!
//! ```rust,ignore
//! let mut radio = AsyncLoRa::new(lora)?;
//! radio.transmit(b"ping").await?;
//! if let Some(packet) = radio.next_packet(Duration::from_secs(5)).await? {
//!     println!("{:?} at {} dBm", packet.data, packet.metrics.rssi_dbm);
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

use crate::error::LoRaError;
use crate::radio::dispatcher::DispatcherState;
use crate::radio::driver::LoRa;
use crate::radio::hal::Hal;
use crate::radio::mode::OperatingMode;
use crate::radio::packet::SignalMetrics;
use crate::radio::registers::MAX_PKT_LENGTH;

/// A packet delivered by the receive callback
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    pub data: Vec<u8>,
    /// RSSI, SNR and frequency error captured with the packet
    pub metrics: SignalMetrics,
}

/// Information about the radio driver implementation
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
    /// Supported frequency bands in Hz
    pub frequency_bands: Vec<(u32, u32)>,
    pub max_packet_size: usize,
    pub spreading_factors: (u8, u8),
    /// Power range in dBm (min, max)
    pub power_range_dbm: (i8, i8),
    pub features: Vec<String>,
}

/// Packet-level radio interface for async code
#[async_trait]
pub trait PacketRadio: Send + Sync {
    /// Send one packet and wait for TX done
    async fn transmit(&mut self, data: &[u8]) -> Result<(), LoRaError>;

    /// Wait up to `wait` for the next packet, listening if not already.
    ///
    /// # Returns
    /// * `Ok(Some(packet))` - a packet with a good CRC arrived
    /// * `Ok(None)` - nothing arrived in time
    async fn next_packet(&mut self, wait: Duration) -> Result<Option<ReceivedPacket>, LoRaError>;

    /// Run channel activity detection.
    ///
    /// # Returns
    /// * `Ok(true)` - no LoRa preamble detected
    /// * `Ok(false)` - activity on the channel
    async fn is_channel_clear(&mut self, wait: Duration) -> Result<bool, LoRaError>;

    /// Current RSSI in dBm
    async fn rssi(&mut self) -> Result<i16, LoRaError>;

    async fn standby(&mut self) -> Result<(), LoRaError>;

    async fn sleep(&mut self) -> Result<(), LoRaError>;

    fn driver_info(&self) -> DriverInfo;
}

/// [`PacketRadio`] over an SX127x with a DIO0 event line
pub struct AsyncLoRa<H: Hal + 'static> {
    radio: LoRa<H>,
    packets: UnboundedReceiver<ReceivedPacket>,
    cad: UnboundedReceiver<bool>,
    tx_done: UnboundedReceiver<()>,
}

impl<H: Hal + 'static> AsyncLoRa<H> {
    /// Take over the driver's callbacks.
    ///
    /// The driver must be started with `begin` and built with an event line;
    /// without DIO0 dispatch nothing would ever complete.
    pub fn new(radio: LoRa<H>) -> Result<Self, LoRaError> {
        let (packet_tx, packets) = unbounded_channel();
        let (cad_tx, cad) = unbounded_channel();
        let (done_tx, tx_done) = unbounded_channel();

        radio.on_receive(move |radio, _len| match radio.read_packet() {
            Ok(data) => {
                let packet = ReceivedPacket {
                    data,
                    metrics: radio.signal_metrics(),
                };
                // Receiver gone means the facade was dropped
                let _ = packet_tx.send(packet);
            }
            Err(e) => warn!("Failed to read received packet: {e}"),
        })?;
        radio.on_cad_done(move |_, detected| {
            let _ = cad_tx.send(detected);
        })?;
        radio.on_tx_done(move |_| {
            let _ = done_tx.send(());
        })?;

        if radio.dispatcher_state() == DispatcherState::Unregistered {
            radio.clear_on_receive()?;
            radio.clear_on_cad_done()?;
            radio.clear_on_tx_done()?;
            return Err(LoRaError::Configuration(
                "async operation needs a DIO0 event line".to_string(),
            ));
        }

        Ok(Self {
            radio,
            packets,
            cad,
            tx_done,
        })
    }

    /// The underlying driver, for configuration
    pub fn radio(&self) -> &LoRa<H> {
        &self.radio
    }
}

impl<H: Hal + 'static> Drop for AsyncLoRa<H> {
    fn drop(&mut self) {
        for result in [
            self.radio.clear_on_receive(),
            self.radio.clear_on_cad_done(),
            self.radio.clear_on_tx_done(),
        ] {
            if let Err(e) = result {
                warn!("Failed to release callbacks: {e}");
            }
        }
    }
}

#[async_trait]
impl<H: Hal + 'static> PacketRadio for AsyncLoRa<H> {
    async fn transmit(&mut self, data: &[u8]) -> Result<(), LoRaError> {
        if data.len() > MAX_PKT_LENGTH {
            return Err(LoRaError::PacketTooLarge {
                len: data.len(),
                max: MAX_PKT_LENGTH,
            });
        }
        while self.tx_done.try_recv().is_ok() {}

        if !self.radio.begin_packet(false)? {
            return Err(LoRaError::Busy("transmission in progress".to_string()));
        }
        self.radio.write_bytes(data)?;
        self.radio.end_packet(true)?;

        let limit = self.radio.tx_timeout();
        match timeout(limit, self.tx_done.recv()).await {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(LoRaError::Dispatcher("TX done channel closed".to_string())),
            Err(_) => self.radio.abort_tx(limit),
        }
    }

    async fn next_packet(&mut self, wait: Duration) -> Result<Option<ReceivedPacket>, LoRaError> {
        if let Ok(packet) = self.packets.try_recv() {
            return Ok(Some(packet));
        }
        if self.radio.mode() != OperatingMode::ReceiveContinuous {
            self.radio.receive(0)?;
        }

        match timeout(wait, self.packets.recv()).await {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => Err(LoRaError::Dispatcher("receive channel closed".to_string())),
            Err(_) => {
                debug!("No packet within {wait:?}");
                Ok(None)
            }
        }
    }

    async fn is_channel_clear(&mut self, wait: Duration) -> Result<bool, LoRaError> {
        while self.cad.try_recv().is_ok() {}
        self.radio.channel_activity_detection()?;

        match timeout(wait, self.cad.recv()).await {
            Ok(Some(detected)) => Ok(!detected),
            Ok(None) => Err(LoRaError::Dispatcher("CAD channel closed".to_string())),
            Err(_) => {
                self.radio.idle()?;
                Err(LoRaError::Timeout(format!("CAD not done within {wait:?}")))
            }
        }
    }

    async fn rssi(&mut self) -> Result<i16, LoRaError> {
        self.radio.rssi()
    }

    async fn standby(&mut self) -> Result<(), LoRaError> {
        self.radio.idle()
    }

    async fn sleep(&mut self) -> Result<(), LoRaError> {
        self.radio.sleep()
    }

    fn driver_info(&self) -> DriverInfo {
        DriverInfo {
            name: "SX127x".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            frequency_bands: vec![
                (137_000_000, 175_000_000),
                (410_000_000, 525_000_000),
                (862_000_000, 1_020_000_000),
            ],
            max_packet_size: MAX_PKT_LENGTH,
            spreading_factors: (6, 12),
            power_range_dbm: (0, 20),
            features: vec![
                "LoRa".to_string(),
                "CAD".to_string(),
                "CRC".to_string(),
                "ImplicitHeader".to_string(),
            ],
        }
    }
}
