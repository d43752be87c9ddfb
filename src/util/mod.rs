//! # Utility Modules
//!
//! Hex formatting and logging helpers shared by the driver and the CLI.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, format_hex_compact, pretty_hex, HexError};
pub use logging::{log_frame_hex, LogThrottle};
