//! # DIO0 Interrupt Dispatch
//!
//! Moves DIO0 notifications out of the edge source's context into a single
//! worker thread that owns all bus work for interrupts.
//!
//! ```text
//!  edge source             worker ("lora-dio0")            callback slots
//!  ───────────             ────────────────────            ──────────────
//!  rising edge ──try_send──▶ recv()
//!   (coalesced when          read + clear IRQ flags
//!    a wake is pending)      classify, update framer/mode
//!                            invoke matching slot ─────────▶ on_receive
//!                            loop                            on_cad_done
//!                                                            on_tx_done
//! ```
//!
//! The wake channel holds one pending notification. A second edge arriving
//! before the worker drains the first is folded into it; the worker's single
//! read of REG_IRQ_FLAGS then sees every flag raised so far and handles each
//! event class once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, warn};
use serde::Serialize;

use crate::error::LoRaError;
use crate::radio::hal::EdgeHandler;
use crate::radio::lock;

/// Name of the dispatch worker thread
pub const WORKER_NAME: &str = "lora-dio0";

/// Default worker stack size
pub const DEFAULT_WORKER_STACK_SIZE: usize = 64 * 1024;

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatcherState {
    /// No edge handler attached; edges are ignored
    Unregistered,
    /// Attached and waiting for an edge
    Armed,
    /// The worker is handling a wake
    Dispatching,
}

/// Message on the wake channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Edge,
    Shutdown,
}

/// Counters kept by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub wakes: u64,
    /// Wakes that found no actionable IRQ flag
    pub spurious: u64,
    pub rx: u64,
    pub crc_errors: u64,
    pub tx_done: u64,
    pub cad_done: u64,
    pub timeouts: u64,
    pub bus_errors: u64,
}

/// A replaceable, independently locked callback.
///
/// The handler sits behind its own mutex inside an `Arc`. Dispatch clones
/// the `Arc` under the slot lock and calls it after releasing that lock, so
/// replacing a handler never waits for a running callback, and the running
/// one finishes with the handler it started with.
pub struct CallbackSlot<F: ?Sized> {
    handler: Mutex<Option<Arc<Mutex<Box<F>>>>>,
}

impl<F: ?Sized> Default for CallbackSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> CallbackSlot<F> {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    /// Install or remove the handler. Returns whether one was set before.
    pub fn replace(&self, handler: Option<Box<F>>) -> bool {
        let mut slot = lock(&self.handler);
        let previous = slot.is_some();
        *slot = handler.map(|h| Arc::new(Mutex::new(h)));
        previous
    }

    pub fn is_set(&self) -> bool {
        lock(&self.handler).is_some()
    }

    /// Handler as of now, for one dispatch
    pub fn capture(&self) -> Option<Arc<Mutex<Box<F>>>> {
        lock(&self.handler).clone()
    }
}

struct Worker {
    signal: SyncSender<Signal>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

/// Worker ownership and arm state for one driver instance
pub struct Dispatcher {
    armed: Arc<AtomicBool>,
    dispatching: AtomicBool,
    worker: Mutex<Option<Worker>>,
    stats: Mutex<DispatchStats>,
    stack_size: usize,
}

impl Dispatcher {
    pub fn new(stack_size: usize) -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(false)),
            dispatching: AtomicBool::new(false),
            worker: Mutex::new(None),
            stats: Mutex::new(DispatchStats::default()),
            stack_size,
        }
    }

    /// Spawn the worker on first use and return its wake sender.
    ///
    /// `body` runs on the worker thread with the receiving end of the wake
    /// channel. Later calls reuse the running worker and ignore `body`.
    pub(crate) fn ensure_worker<F>(&self, body: F) -> Result<SyncSender<Signal>, LoRaError>
    where
        F: FnOnce(Receiver<Signal>) + Send + 'static,
    {
        let mut worker = lock(&self.worker);
        if let Some(worker) = worker.as_ref() {
            return Ok(worker.signal.clone());
        }

        let (signal, wake) = sync_channel(1);
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .stack_size(self.stack_size)
            .spawn(move || body(wake))
            .map_err(|e| LoRaError::Dispatcher(format!("failed to spawn {WORKER_NAME}: {e}")))?;

        debug!("Spawned {WORKER_NAME} worker ({} byte stack)", self.stack_size);

        let thread_id = handle.thread().id();
        *worker = Some(Worker {
            signal: signal.clone(),
            handle: Some(handle),
            thread_id,
        });
        Ok(signal)
    }

    /// Handler for the event line: wake the worker, nothing else.
    pub(crate) fn edge_handler(&self, signal: SyncSender<Signal>) -> EdgeHandler {
        let armed = Arc::clone(&self.armed);
        Box::new(move || {
            if !armed.load(Ordering::Acquire) {
                return;
            }
            // Full: a wake is already pending and will see this edge's flags
            let _ = signal.try_send(Signal::Edge);
        })
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> DispatcherState {
        if !self.is_armed() {
            DispatcherState::Unregistered
        } else if self.dispatching.load(Ordering::Acquire) {
            DispatcherState::Dispatching
        } else {
            DispatcherState::Armed
        }
    }

    pub(crate) fn set_dispatching(&self, active: bool) {
        self.dispatching.store(active, Ordering::Release);
    }

    /// True when called from the dispatch worker
    pub fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        lock(&self.worker)
            .as_ref()
            .map(|w| w.thread_id == current)
            .unwrap_or(false)
    }

    pub fn has_worker(&self) -> bool {
        lock(&self.worker).is_some()
    }

    pub fn stats(&self) -> DispatchStats {
        *lock(&self.stats)
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut DispatchStats)) {
        update(&mut lock(&self.stats));
    }

    /// Stop and join the worker.
    ///
    /// When the last driver handle is dropped from inside a callback this
    /// runs on the worker itself; the thread is then left to exit on its own
    /// once the wake channel disconnects.
    pub fn shutdown(&self) {
        self.disarm();
        let Some(mut worker) = lock(&self.worker).take() else {
            return;
        };

        // A full slot already holds a wake; the worker exits on it because
        // the driver is gone.
        let _ = worker.signal.try_send(Signal::Shutdown);

        if worker.thread_id == thread::current().id() {
            return;
        }

        if let Some(handle) = worker.handle.take() {
            if handle.join().is_err() {
                warn!("{WORKER_NAME} worker panicked");
            }
        }
    }
}
