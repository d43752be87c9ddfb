pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod hal;
pub mod irq;
pub mod mode;
pub mod modulation;
pub mod packet;
pub mod radio_driver;
pub mod registers;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use dispatcher::{DispatchStats, DispatcherState};
pub use driver::{LoRa, LoRaBuilder};
pub use hal::{EdgeHandler, EventLine, Hal, HalError};
pub use mode::{HeaderMode, OperatingMode};
pub use modulation::{Bandwidth, PaOutput};
pub use packet::SignalMetrics;
pub use radio_driver::{AsyncLoRa, DriverInfo, PacketRadio, ReceivedPacket};

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
