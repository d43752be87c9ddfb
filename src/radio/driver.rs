//! # SX127x LoRa Driver
//!
//! [`LoRa`] ties the register interface, mode controller, packet framer and
//! DIO0 dispatcher together behind one cloneable handle.
//!
//! ## Concurrency
//!
//! All chip state sits behind a single mutex. Every public operation takes it
//! once for its whole register sequence, so a caller-side operation and the
//! dispatch worker never interleave their bus traffic. Callbacks run on the
//! dispatch worker with that mutex released and receive a `&LoRa` they may
//! use freely, e.g. to call [`LoRa::parse_packet`] and read the payload.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sx127x_lora::radio::LoRa;
//!
//! let radio = LoRa::builder(hal).event_line(dio0).build();
//! radio.begin(868_000_000)?;
//!
//! radio.on_receive(|radio, len| {
//!     let mut buf = vec![0u8; len];
//!     let n = radio.read_bytes(&mut buf).unwrap_or(0);
//!     println!("{:?} RSSI {}", &buf[..n], radio.packet_rssi());
//! })?;
//! radio.receive(0)?;
//! ```

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::RadioConfig;
use crate::error::LoRaError;
use crate::radio::dispatcher::{
    CallbackSlot, DispatchStats, Dispatcher, DispatcherState, Signal, DEFAULT_WORKER_STACK_SIZE,
    WORKER_NAME,
};
use crate::radio::hal::{EventLine, Hal, HalError};
use crate::radio::irq::{IrqEvent, IrqFlags};
use crate::radio::lock;
use crate::radio::mode::{HeaderMode, ModeController, OperatingMode};
use crate::radio::modulation::{rssi_offset, PaOutput};
use crate::radio::packet::{PacketFramer, RxOutcome, SignalMetrics};
use crate::radio::registers::*;
use crate::util::logging::{log_frame_hex, span_dispatch, LogThrottle};

/// Default bound for a synchronous `end_packet`
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(10);

/// Default IRQ polling period for synchronous operations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Power programmed by `begin`
const DEFAULT_TX_POWER_DBM: i8 = 17;

pub type ReceiveCallback<H> = dyn FnMut(&LoRa<H>, usize) + Send;
pub type CadDoneCallback<H> = dyn FnMut(&LoRa<H>, bool) + Send;
pub type TxDoneCallback<H> = dyn FnMut(&LoRa<H>) + Send;

/// Everything guarded by the chip lock
pub(crate) struct Chip<H: Hal> {
    pub(crate) regs: RegisterInterface<H>,
    pub(crate) mode: ModeController,
    pub(crate) framer: PacketFramer,
    pub(crate) metrics: SignalMetrics,
    pub(crate) frequency_hz: u32,
    /// A transmission whose completion the dispatch worker will report
    pub(crate) tx_notify: bool,
    pub(crate) tx_timeout: Duration,
}

impl<H: Hal> Chip<H> {
    fn new(hal: H, tx_timeout: Duration) -> Self {
        Self {
            regs: RegisterInterface::new(hal),
            mode: ModeController::new(),
            framer: PacketFramer::new(),
            metrics: SignalMetrics::default(),
            frequency_hz: 0,
            tx_notify: false,
            tx_timeout,
        }
    }

    pub(crate) fn enter(&mut self, mode: OperatingMode) -> Result<(), HalError> {
        self.mode.enter(&mut self.regs, mode)
    }

    pub(crate) fn set_header_mode(&mut self, header: HeaderMode) -> Result<(), HalError> {
        self.mode.set_header_mode(&mut self.regs, header)
    }

    fn read_irq_flags(&mut self) -> Result<IrqFlags, HalError> {
        Ok(IrqFlags::from_bits_truncate(self.regs.read(REG_IRQ_FLAGS)?))
    }

    fn clear_irq_flags(&mut self, flags: IrqFlags) -> Result<(), HalError> {
        if flags.is_empty() {
            return Ok(());
        }
        self.regs.write(REG_IRQ_FLAGS, flags.bits())
    }

    /// Point the framer at a freshly received packet and refresh metrics
    fn capture_packet(&mut self) -> Result<usize, HalError> {
        let implicit = self.mode.header_mode() == HeaderMode::Implicit;
        let length = self.framer.capture_rx(&mut self.regs, implicit)?;
        let bandwidth = self.bandwidth_hz()?.unwrap_or(0);
        self.metrics = SignalMetrics::capture(&mut self.regs, self.frequency_hz, bandwidth)?;

        debug!(
            "RX {} bytes, RSSI {} dBm, SNR {:.2} dB",
            length, self.metrics.rssi_dbm, self.metrics.snr_db
        );
        Ok(length)
    }

    pub(crate) fn is_transmitting(&mut self) -> Result<bool, HalError> {
        let op_mode = OperatingMode::from_op_mode(self.regs.read(REG_OP_MODE)?);
        if op_mode == Some(OperatingMode::Transmit) {
            return Ok(true);
        }

        // Completion belongs to the dispatch worker when it was asked to report it
        if !self.tx_notify {
            let flags = self.read_irq_flags()?;
            if flags.contains(IrqFlags::TX_DONE) {
                self.clear_irq_flags(IrqFlags::TX_DONE)?;
            }
            self.mode.finish(OperatingMode::Transmit);
        }
        Ok(false)
    }

    /// Read, clear and act on the IRQ flags for one worker wake.
    ///
    /// Returns the events raised and the length of a received packet.
    fn service_irq(&mut self) -> Result<(Vec<IrqEvent>, usize), HalError> {
        let flags = self.read_irq_flags()?;
        self.clear_irq_flags(flags)?;
        if !flags.is_actionable() {
            return Ok((Vec::new(), 0));
        }

        let events = flags.classify();
        let mut rx_length = 0;

        for event in &events {
            match *event {
                IrqEvent::PacketReceived => {
                    rx_length = self.capture_packet()?;
                    self.framer.latch(RxOutcome::Packet(rx_length));
                    self.mode.finish(OperatingMode::ReceiveSingle);
                }
                IrqEvent::CrcError => {
                    self.framer.latch(RxOutcome::CrcError);
                    self.mode.finish(OperatingMode::ReceiveSingle);
                }
                IrqEvent::CadDone { .. } => {
                    self.mode.finish(OperatingMode::ChannelActivityDetect);
                }
                IrqEvent::TxDone => {
                    self.mode.finish(OperatingMode::Transmit);
                    self.tx_notify = false;
                }
                IrqEvent::Timeout => {
                    self.mode.finish(OperatingMode::ReceiveSingle);
                }
            }
        }

        Ok((events, rx_length))
    }
}

struct Inner<H: Hal + 'static> {
    chip: Mutex<Chip<H>>,
    line: Mutex<Option<Box<dyn EventLine>>>,
    dispatcher: Dispatcher,
    on_receive: CallbackSlot<ReceiveCallback<H>>,
    on_cad_done: CallbackSlot<CadDoneCallback<H>>,
    on_tx_done: CallbackSlot<TxDoneCallback<H>>,
    /// Count of TX completions reported by the worker
    tx_done: (Mutex<u64>, Condvar),
    poll_interval: Duration,
}

impl<H: Hal + 'static> Drop for Inner<H> {
    fn drop(&mut self) {
        self.dispatcher.disarm();
        if self.dispatcher.has_worker() {
            if let Some(line) = lock(&self.line).as_mut() {
                if let Err(e) = line.detach() {
                    warn!("Failed to detach DIO0 line: {e}");
                }
            }
        }
        self.dispatcher.shutdown();
    }
}

/// Builder for [`LoRa`]
pub struct LoRaBuilder<H: Hal + 'static> {
    hal: H,
    line: Option<Box<dyn EventLine>>,
    tx_timeout: Duration,
    poll_interval: Duration,
    worker_stack_size: usize,
}

impl<H: Hal + 'static> LoRaBuilder<H> {
    pub fn new(hal: H) -> Self {
        Self {
            hal,
            line: None,
            tx_timeout: DEFAULT_TX_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker_stack_size: DEFAULT_WORKER_STACK_SIZE,
        }
    }

    /// DIO0 edge source. Without one, callbacks never fire and the driver
    /// works by polling only.
    pub fn event_line(mut self, line: impl EventLine + 'static) -> Self {
        self.line = Some(Box::new(line));
        self
    }

    pub fn tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = bytes;
        self
    }

    /// Take timing settings from a configuration file
    pub fn config(self, config: &RadioConfig) -> Self {
        self.tx_timeout(config.tx_timeout())
            .worker_stack_size(config.worker_stack_size)
    }

    pub fn build(self) -> LoRa<H> {
        LoRa {
            inner: Arc::new(Inner {
                chip: Mutex::new(Chip::new(self.hal, self.tx_timeout)),
                line: Mutex::new(self.line),
                dispatcher: Dispatcher::new(self.worker_stack_size),
                on_receive: CallbackSlot::new(),
                on_cad_done: CallbackSlot::new(),
                on_tx_done: CallbackSlot::new(),
                tx_done: (Mutex::new(0), Condvar::new()),
                poll_interval: self.poll_interval,
            }),
        }
    }
}

/// Handle to one SX127x. Clones share the same chip.
pub struct LoRa<H: Hal + 'static> {
    inner: Arc<Inner<H>>,
}

impl<H: Hal + 'static> Clone for LoRa<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Hal + 'static> LoRa<H> {
    /// Driver without an event line
    pub fn new(hal: H) -> Self {
        LoRaBuilder::new(hal).build()
    }

    pub fn builder(hal: H) -> LoRaBuilder<H> {
        LoRaBuilder::new(hal)
    }

    /// Run `f` with exclusive access to the chip
    pub(crate) fn with_chip<T>(
        &self,
        f: impl FnOnce(&mut Chip<H>) -> Result<T, LoRaError>,
    ) -> Result<T, LoRaError> {
        let mut chip = lock(&self.inner.chip);
        f(&mut *chip)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Reset and identify the chip, switch it to LoRa mode and program
    /// defaults for `frequency_hz`. Leaves the chip in Standby.
    pub fn begin(&self, frequency_hz: u32) -> Result<(), LoRaError> {
        self.with_chip(|chip| {
            chip.regs.hal_mut().reset()?;

            let version = chip.regs.read(REG_VERSION)?;
            if version != CHIP_VERSION {
                return Err(LoRaError::ChipNotFound { version });
            }

            // LoRa mode can only be selected in sleep
            chip.mode.reset_to(OperatingMode::Sleep);
            chip.enter(OperatingMode::Sleep)?;

            chip.set_frequency(frequency_hz)?;
            chip.regs.write(REG_FIFO_TX_BASE_ADDR, 0)?;
            chip.regs.write(REG_FIFO_RX_BASE_ADDR, 0)?;

            let lna = chip.regs.read(REG_LNA)?;
            chip.regs.write(REG_LNA, lna | LNA_BOOST_HF)?;
            chip.regs.write(REG_MODEM_CONFIG_3, AGC_AUTO_ON)?;
            chip.set_tx_power(DEFAULT_TX_POWER_DBM, PaOutput::PaBoost)?;

            chip.framer = PacketFramer::new();
            chip.metrics = SignalMetrics::default();
            chip.tx_notify = false;
            chip.mode.set_ldo_override(None);

            chip.enter(OperatingMode::Standby)?;
            Ok(())
        })?;

        info!("SX127x ready at {frequency_hz} Hz");
        Ok(())
    }

    /// `begin` followed by every modem setting in `config`
    pub fn begin_with_config(&self, config: &RadioConfig) -> Result<(), LoRaError> {
        config.validate()?;
        self.begin(config.frequency_hz)?;

        self.with_chip(|chip| {
            chip.tx_timeout = config.tx_timeout();
            chip.set_tx_power(config.tx_power_dbm, config.pa_output)?;
            chip.set_spreading_factor(config.spreading_factor)?;
            chip.set_signal_bandwidth(config.bandwidth_hz)?;
            chip.set_coding_rate4(config.coding_rate_denominator)?;
            chip.set_preamble_length(config.preamble_length)?;
            chip.set_sync_word(config.sync_word)?;
            chip.set_crc(config.crc)?;
            chip.set_invert_iq(config.invert_iq)?;
            Ok(())
        })?;

        debug!("Applied radio configuration: {config:?}");
        Ok(())
    }

    /// Stop interrupt delivery and put the chip to sleep
    pub fn end(&self) -> Result<(), LoRaError> {
        self.unregister_interrupt_handler()?;
        self.sleep()?;
        info!("SX127x stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    /// Prepare a new outgoing packet.
    ///
    /// Returns `Ok(false)` without touching the FIFO while a transmission is
    /// still running.
    pub fn begin_packet(&self, implicit_header: bool) -> Result<bool, LoRaError> {
        self.with_chip(|chip| {
            if chip.is_transmitting()? {
                return Ok(false);
            }

            chip.enter(OperatingMode::Standby)?;
            chip.set_header_mode(if implicit_header {
                HeaderMode::Implicit
            } else {
                HeaderMode::Explicit
            })?;
            chip.framer.begin(&mut chip.regs)?;
            Ok(true)
        })
    }

    pub fn write(&self, byte: u8) -> Result<usize, LoRaError> {
        self.write_bytes(&[byte])
    }

    /// Append to the current packet. Returns the number of bytes accepted,
    /// which is short once the FIFO limit is reached.
    pub fn write_bytes(&self, data: &[u8]) -> Result<usize, LoRaError> {
        let accepted = self.with_chip(|chip| Ok(chip.framer.write(&mut chip.regs, data)?))?;

        log_frame_hex("TX", &data[..accepted]);
        if accepted < data.len() {
            debug!(
                "Packet full: accepted {accepted} of {} bytes",
                data.len()
            );
        }
        Ok(accepted)
    }

    /// Start transmitting the current packet.
    ///
    /// With `async_mode` the call returns immediately and completion is
    /// reported through [`LoRa::on_tx_done`] or observed with
    /// [`LoRa::is_transmitting`]. Otherwise it blocks until TX done or the
    /// TX timeout; on timeout the transmission is aborted to Standby.
    pub fn end_packet(&self, async_mode: bool) -> Result<(), LoRaError> {
        let dispatcher = &self.inner.dispatcher;
        let notify = dispatcher.is_armed()
            && self.inner.on_tx_done.is_set()
            && (async_mode || !dispatcher.is_worker_thread());

        let (generation, timeout, length) = self.with_chip(|chip| {
            if notify {
                chip.regs.write(REG_DIO_MAPPING_1, DIO0_TX_DONE)?;
            }
            chip.tx_notify = notify;

            let generation = *lock(&self.inner.tx_done.0);
            chip.enter(OperatingMode::Transmit)?;
            Ok((generation, chip.tx_timeout, chip.framer.length()))
        })?;

        debug!("TX started: {length} bytes");

        if async_mode {
            return Ok(());
        }

        if notify {
            self.wait_tx_notified(generation, timeout)
        } else {
            self.poll_tx_done(timeout)
        }
    }

    fn wait_tx_notified(&self, generation: u64, timeout: Duration) -> Result<(), LoRaError> {
        let (count, done) = &self.inner.tx_done;
        let deadline = Instant::now() + timeout;

        let mut current = lock(count);
        while *current == generation {
            let now = Instant::now();
            if now >= deadline {
                drop(current);
                return self.abort_tx(timeout);
            }
            current = done
                .wait_timeout(current, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        Ok(())
    }

    fn poll_tx_done(&self, timeout: Duration) -> Result<(), LoRaError> {
        let start = Instant::now();

        loop {
            let done = self.with_chip(|chip| {
                let flags = chip.read_irq_flags()?;
                if flags.contains(IrqFlags::TX_DONE) {
                    chip.clear_irq_flags(IrqFlags::TX_DONE)?;
                    chip.mode.finish(OperatingMode::Transmit);
                    return Ok(true);
                }
                Ok(false)
            })?;

            if done {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return self.abort_tx(timeout);
            }
            thread::sleep(self.inner.poll_interval);
        }
    }

    /// Drop an unfinished transmission back to Standby and report the timeout
    pub(crate) fn abort_tx(&self, timeout: Duration) -> Result<(), LoRaError> {
        self.with_chip(|chip| {
            chip.tx_notify = false;
            chip.enter(OperatingMode::Standby)?;
            Ok(())
        })?;

        warn!("TX not completed within {timeout:?}, aborted");
        Err(LoRaError::Timeout(format!(
            "TX not completed within {timeout:?}"
        )))
    }

    /// True while the chip is in TX mode.
    ///
    /// When it is not, a leftover TX done flag is cleared and the tracked
    /// mode returns to Standby, unless the dispatch worker owns that
    /// completion.
    pub fn is_transmitting(&self) -> Result<bool, LoRaError> {
        self.with_chip(|chip| Ok(chip.is_transmitting()?))
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Check for a received packet.
    ///
    /// A packet already captured by the dispatch worker is returned first.
    /// Otherwise the IRQ flags are polled: on RX done the packet is exposed
    /// for reading and its length returned; if nothing arrived the chip is
    /// put into single receive. `size > 0` selects implicit header mode with
    /// that payload length. A packet with a CRC error yields 0.
    pub fn parse_packet(&self, size: u8) -> Result<usize, LoRaError> {
        self.with_chip(|chip| {
            if size > 0 {
                chip.set_header_mode(HeaderMode::Implicit)?;
                chip.regs.write(REG_PAYLOAD_LENGTH, size)?;
            } else {
                chip.set_header_mode(HeaderMode::Explicit)?;
            }

            match chip.framer.take_pending() {
                Some(RxOutcome::Packet(length)) => return Ok(length),
                Some(RxOutcome::CrcError) => return Ok(0),
                None => {}
            }

            let flags = chip.read_irq_flags()?;
            chip.clear_irq_flags(flags)?;

            if flags.contains(IrqFlags::RX_DONE) && !flags.contains(IrqFlags::PAYLOAD_CRC_ERROR) {
                let length = chip.capture_packet()?;
                chip.enter(OperatingMode::Standby)?;
                return Ok(length);
            }

            if flags.contains(IrqFlags::RX_DONE) {
                debug!("Dropped packet with CRC error");
                chip.framer.drop_packet();
            }

            let op_mode = OperatingMode::from_op_mode(chip.regs.read(REG_OP_MODE)?);
            if op_mode != Some(OperatingMode::ReceiveSingle) {
                chip.regs.write(REG_FIFO_ADDR_PTR, 0)?;
                chip.enter(OperatingMode::ReceiveSingle)?;
            }
            Ok(0)
        })
    }

    /// Listen for packets.
    ///
    /// `size == 0` receives continuously with explicit headers; `size > 0`
    /// receives one packet of exactly `size` bytes with an implicit header.
    pub fn receive(&self, size: u8) -> Result<(), LoRaError> {
        self.with_chip(|chip| {
            chip.regs.write(REG_DIO_MAPPING_1, DIO0_RX_DONE)?;
            chip.framer.clear_pending();

            if size > 0 {
                chip.set_header_mode(HeaderMode::Implicit)?;
                chip.regs.write(REG_PAYLOAD_LENGTH, size)?;
                chip.enter(OperatingMode::ReceiveSingle)?;
            } else {
                chip.set_header_mode(HeaderMode::Explicit)?;
                chip.enter(OperatingMode::ReceiveContinuous)?;
            }
            Ok(())
        })
    }

    /// Bytes left to read in the last parsed packet
    pub fn available(&self) -> usize {
        lock(&self.inner.chip).framer.available()
    }

    /// Next payload byte, `None` past the end of the packet
    pub fn read(&self) -> Result<Option<u8>, LoRaError> {
        self.with_chip(|chip| Ok(chip.framer.read_byte(&mut chip.regs)?))
    }

    pub fn peek(&self) -> Result<Option<u8>, LoRaError> {
        self.with_chip(|chip| Ok(chip.framer.peek(&mut chip.regs)?))
    }

    /// Skip the rest of the current packet
    pub fn flush(&self) {
        lock(&self.inner.chip).framer.discard();
    }

    /// Read up to `buf.len()` payload bytes
    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<usize, LoRaError> {
        self.with_chip(|chip| Ok(chip.framer.read_into(&mut chip.regs, buf)?))
    }

    /// The rest of the current packet
    pub fn read_packet(&self) -> Result<Vec<u8>, LoRaError> {
        let data = self.with_chip(|chip| {
            let mut data = vec![0u8; chip.framer.available()];
            let count = chip.framer.read_into(&mut chip.regs, &mut data)?;
            data.truncate(count);
            Ok(data)
        })?;
        log_frame_hex("RX", &data);
        Ok(data)
    }

    /// RSSI of the last packet in dBm
    pub fn packet_rssi(&self) -> i16 {
        lock(&self.inner.chip).metrics.rssi_dbm
    }

    /// SNR of the last packet in dB
    pub fn packet_snr(&self) -> f32 {
        lock(&self.inner.chip).metrics.snr_db
    }

    /// Frequency error of the last packet in Hz
    pub fn packet_frequency_error(&self) -> i32 {
        lock(&self.inner.chip).metrics.frequency_error_hz
    }

    pub fn signal_metrics(&self) -> SignalMetrics {
        lock(&self.inner.chip).metrics
    }

    /// Current RSSI in dBm
    pub fn rssi(&self) -> Result<i16, LoRaError> {
        self.with_chip(|chip| {
            let raw = chip.regs.read(REG_RSSI_VALUE)?;
            Ok(raw as i16 - rssi_offset(chip.frequency_hz))
        })
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// Start channel activity detection; the result arrives through
    /// [`LoRa::on_cad_done`].
    pub fn channel_activity_detection(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| {
            chip.regs.write(REG_DIO_MAPPING_1, DIO0_CAD_DONE)?;
            chip.enter(OperatingMode::ChannelActivityDetect)?;
            Ok(())
        })
    }

    pub fn idle(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.enter(OperatingMode::Standby)?))
    }

    pub fn sleep(&self) -> Result<(), LoRaError> {
        self.with_chip(|chip| Ok(chip.enter(OperatingMode::Sleep)?))
    }

    pub fn mode(&self) -> OperatingMode {
        lock(&self.inner.chip).mode.current()
    }

    pub fn header_mode(&self) -> HeaderMode {
        lock(&self.inner.chip).mode.header_mode()
    }

    pub fn frequency(&self) -> u32 {
        lock(&self.inner.chip).frequency_hz
    }

    /// Bound applied to a blocking `end_packet`
    pub fn tx_timeout(&self) -> Duration {
        lock(&self.inner.chip).tx_timeout
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// A byte of wideband RSSI noise
    pub fn random(&self) -> Result<u8, LoRaError> {
        self.with_chip(|chip| Ok(chip.regs.read(REG_RSSI_WIDEBAND)?))
    }

    /// Print every register as `0xAA: 0xVV`, one per line
    pub fn dump_registers<W: Write>(&self, out: &mut W) -> Result<(), LoRaError> {
        let values = self.with_chip(|chip| {
            let mut values = Vec::with_capacity(REGISTER_COUNT as usize);
            for addr in 0..REGISTER_COUNT {
                values.push(chip.regs.read(addr)?);
            }
            Ok(values)
        })?;

        for (addr, value) in values.iter().enumerate() {
            writeln!(out, "0x{addr:02X}: 0x{value:02X}")?;
        }
        Ok(())
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.inner.dispatcher.state()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    /// Called with the packet length for every packet received with a good
    /// CRC. Registering arms DIO0 dispatch.
    pub fn on_receive<F>(&self, callback: F) -> Result<(), LoRaError>
    where
        F: FnMut(&LoRa<H>, usize) + Send + 'static,
    {
        self.inner.on_receive.replace(Some(Box::new(callback)));
        self.with_chip(|chip| Ok(chip.regs.write(REG_DIO_MAPPING_1, DIO0_RX_DONE)?))?;
        self.register_interrupt_handler()
    }

    /// Called when CAD finishes, with `true` if activity was detected
    pub fn on_cad_done<F>(&self, callback: F) -> Result<(), LoRaError>
    where
        F: FnMut(&LoRa<H>, bool) + Send + 'static,
    {
        self.inner.on_cad_done.replace(Some(Box::new(callback)));
        self.register_interrupt_handler()
    }

    /// Called once per completed transmission
    pub fn on_tx_done<F>(&self, callback: F) -> Result<(), LoRaError>
    where
        F: FnMut(&LoRa<H>) + Send + 'static,
    {
        self.inner.on_tx_done.replace(Some(Box::new(callback)));
        self.register_interrupt_handler()
    }

    pub fn clear_on_receive(&self) -> Result<(), LoRaError> {
        self.inner.on_receive.replace(None);
        self.release_if_unused()
    }

    pub fn clear_on_cad_done(&self) -> Result<(), LoRaError> {
        self.inner.on_cad_done.replace(None);
        self.release_if_unused()
    }

    pub fn clear_on_tx_done(&self) -> Result<(), LoRaError> {
        self.inner.on_tx_done.replace(None);
        self.release_if_unused()
    }

    fn release_if_unused(&self) -> Result<(), LoRaError> {
        let inner = &self.inner;
        if inner.on_receive.is_set() || inner.on_cad_done.is_set() || inner.on_tx_done.is_set() {
            return Ok(());
        }
        self.unregister_interrupt_handler()
    }

    /// Attach to DIO0 and start the dispatch worker if needed
    pub fn register_interrupt_handler(&self) -> Result<(), LoRaError> {
        let dispatcher = &self.inner.dispatcher;
        let mut slot = lock(&self.inner.line);

        if dispatcher.is_armed() {
            return Ok(());
        }
        let Some(line) = slot.as_mut() else {
            warn!("No DIO0 event line configured; callbacks will not fire");
            return Ok(());
        };

        let handle = Arc::downgrade(&self.inner);
        let signal = dispatcher.ensure_worker(move |wake| worker_loop(handle, wake))?;

        dispatcher.arm();
        if let Err(e) = line.attach(dispatcher.edge_handler(signal)) {
            dispatcher.disarm();
            return Err(e.into());
        }

        debug!("DIO0 dispatch armed");
        Ok(())
    }

    /// Detach from DIO0. A dispatch in progress completes; later edges are
    /// ignored.
    pub fn unregister_interrupt_handler(&self) -> Result<(), LoRaError> {
        let dispatcher = &self.inner.dispatcher;
        let mut slot = lock(&self.inner.line);

        if !dispatcher.is_armed() {
            return Ok(());
        }
        dispatcher.disarm();
        if let Some(line) = slot.as_mut() {
            line.detach()?;
        }

        debug!("DIO0 dispatch disarmed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn dispatch_once(&self, throttle: &mut LogThrottle) {
        let dispatcher = &self.inner.dispatcher;
        dispatcher.set_dispatching(true);
        dispatcher.record(|s| s.wakes += 1);
        let _span = span_dispatch(dispatcher.stats().wakes);

        let (events, rx_length) = match self.with_chip(|chip| Ok(chip.service_irq()?)) {
            Ok(serviced) => serviced,
            Err(e) => {
                dispatcher.record(|s| s.bus_errors += 1);
                if throttle.allow() {
                    error!("DIO0 dispatch failed: {e}");
                }
                dispatcher.set_dispatching(false);
                return;
            }
        };

        if events.is_empty() {
            dispatcher.record(|s| s.spurious += 1);
            debug!("Spurious DIO0 wake");
        }

        for event in events {
            match event {
                IrqEvent::CadDone { detected } => {
                    dispatcher.record(|s| s.cad_done += 1);
                    if let Some(handler) = self.inner.on_cad_done.capture() {
                        invoke("on_cad_done", || (*lock(&handler))(self, detected));
                    }
                }
                IrqEvent::PacketReceived => {
                    dispatcher.record(|s| s.rx += 1);
                    if let Some(handler) = self.inner.on_receive.capture() {
                        invoke("on_receive", || (*lock(&handler))(self, rx_length));
                        // The handler owns this packet whether or not it parsed it
                        lock(&self.inner.chip).framer.clear_pending();
                    }
                }
                IrqEvent::CrcError => {
                    dispatcher.record(|s| s.crc_errors += 1);
                    debug!("Discarded packet with CRC error");
                }
                IrqEvent::TxDone => {
                    dispatcher.record(|s| s.tx_done += 1);
                    if let Some(handler) = self.inner.on_tx_done.capture() {
                        invoke("on_tx_done", || (*lock(&handler))(self));
                    }
                    let (count, done) = &self.inner.tx_done;
                    *lock(count) += 1;
                    done.notify_all();
                }
                IrqEvent::Timeout => {
                    dispatcher.record(|s| s.timeouts += 1);
                    debug!("RX timeout");
                }
            }
        }

        dispatcher.set_dispatching(false);
    }
}

/// Run a user callback, keeping the worker alive if it panics
fn invoke(name: &str, callback: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("{name} callback panicked");
    }
}

fn worker_loop<H: Hal + 'static>(handle: Weak<Inner<H>>, wake: Receiver<Signal>) {
    let mut throttle = LogThrottle::new(1000, 5);

    while let Ok(Signal::Edge) = wake.recv() {
        let Some(inner) = handle.upgrade() else {
            break;
        };
        if !inner.dispatcher.is_armed() {
            continue;
        }
        LoRa { inner }.dispatch_once(&mut throttle);
    }

    debug!("{WORKER_NAME} worker exiting");
}
