//! # Logging Helpers
//!
//! Rate limiting for log messages raised from the dispatch worker, payload
//! hex dumps and the optional `tracing` span around each dispatch.
//!
//! ```rust
//! use sx127x_lora::util::logging::LogThrottle;
//!
//! let mut throttle = LogThrottle::new(1000, 5); // 5 messages per second
//! if throttle.allow() {
//!     log::warn!("SPI read failed");
//! }
//! ```

use std::time::Instant;

/// Rate limiter for repeated log messages.
///
/// A fault on the bus tends to repeat on every DIO0 edge; the throttle
/// keeps the log readable while the condition persists.
#[derive(Debug)]
pub struct LogThrottle {
    /// Window length in milliseconds
    window_ms: u64,
    /// Messages allowed per window
    cap: u32,
    count: u32,
    t0: Instant,
}

impl LogThrottle {
    /// Allow `cap` messages every `window_ms` milliseconds
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            t0: Instant::now(),
        }
    }

    /// Returns `true` if the message should be logged.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count = self.count.saturating_add(1);
        self.count <= self.cap
    }

    /// Messages suppressed in the current window
    pub fn suppressed(&self) -> u32 {
        self.count.saturating_sub(self.cap)
    }

    /// Start a new window immediately
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
    }
}

/// Log a payload as hex at debug level, truncated to 64 bytes.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    const MAX_LOG_BYTES: usize = 64;

    if !log::log_enabled!(log::Level::Debug) {
        return;
    }

    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::format_hex_compact(shown);
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::debug!("{prefix}: {hex_str}{suffix}");
}

/// Span covering one DIO0 dispatch
#[cfg(feature = "tracing")]
pub fn span_dispatch(wake: u64) -> tracing::span::EnteredSpan {
    tracing::debug_span!("dispatch", wake = wake).entered()
}

#[cfg(not(feature = "tracing"))]
pub fn span_dispatch(_wake: u64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_throttle_basic() {
        let mut throttle = LogThrottle::new(1000, 3);

        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(throttle.allow());

        assert!(!throttle.allow());
        assert!(!throttle.allow());
        assert_eq!(throttle.suppressed(), 2);
    }

    #[test]
    fn test_log_throttle_reset() {
        let mut throttle = LogThrottle::new(1000, 2);

        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(!throttle.allow());

        throttle.reset();
        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(!throttle.allow());
    }

    #[test]
    fn test_log_throttle_window_expiry() {
        let mut throttle = LogThrottle::new(10, 1);
        assert!(throttle.allow());
        assert!(!throttle.allow());

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(throttle.allow());
    }

    #[test]
    fn test_log_frame_hex_long_payload() {
        // Must not panic on payloads longer than the display limit
        log_frame_hex("RX", &[0x55; 255]);
        log_frame_hex("TX", &[]);
    }
}
