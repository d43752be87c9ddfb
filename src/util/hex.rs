//! # Hex Helpers
//!
//! Hex formatting for payload logging and the CLI, built on the `hex` crate.
//!
//! ```rust
//! use sx127x_lora::util::hex::{decode_hex, format_hex_compact};
//!
//! let payload = decode_hex("de ad be ef").unwrap();
//! assert_eq!(format_hex_compact(&payload), "de ad be ef");
//! ```

use thiserror::Error;

/// Errors from parsing hex payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Decode a hex payload. Whitespace between bytes is ignored.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Space separated lowercase bytes, e.g. `"68 69"`
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Offset, hex and ASCII columns, `bytes_per_line` bytes per row
pub fn pretty_hex(data: &[u8], bytes_per_line: usize) -> String {
    let width = bytes_per_line.max(1);

    data.chunks(width)
        .enumerate()
        .map(|(row, chunk)| {
            let hex = hex::encode(chunk);
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!("{:04x}: {:<pad$} |{}|", row * width, hex, ascii, pad = width * 2)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_whitespace() {
        assert_eq!(decode_hex("68 69\t21").unwrap(), b"hi!".to_vec());
        assert_eq!(decode_hex("CAFE").unwrap(), vec![0xCA, 0xFE]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("   "), Err(HexError::EmptyString));
        assert_eq!(decode_hex("123"), Err(HexError::OddLength(3)));
        assert!(matches!(decode_hex("GG"), Err(HexError::DecodeError(_))));
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(b"hi"), "68 69");
        assert_eq!(format_hex_compact(&[]), "");
    }

    #[test]
    fn test_pretty_hex_rows() {
        let dump = pretty_hex(b"hello, lora\x01", 8);
        let lines: Vec<_> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0000: 68656c6c6f2c206c |hello, l|");
        assert!(lines[1].starts_with("0008: 6f726101"));
        assert!(lines[1].ends_with("|ora.|"));
    }
}
