//! # Common Utilities
//!
//! Small helpers shared across TallyDB crates.

use crate::error::{Error, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Lowercase hex encoding without prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char);
        out.push(HEX_DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode a hex string (with or without `0x` prefix) into `out`; the input
/// must encode exactly `out.len()` bytes.
pub fn hex_decode(s: &str, out: &mut [u8]) -> Result<()> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() != out.len() * 2 {
        return Err(Error::InvalidQuery {
            message: format!("expected {} hex chars, got {}", out.len() * 2, s.len()),
        });
    }

    let digits = s.as_bytes();
    for (i, slot) in out.iter_mut().enumerate() {
        let hi = hex_val(digits[i * 2])?;
        let lo = hex_val(digits[i * 2 + 1])?;
        *slot = (hi << 4) | lo;
    }
    Ok(())
}

fn hex_val(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::InvalidQuery { message: format!("invalid hex digit {:?}", c as char) }),
    }
}

/// Format bytes in human readable form.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exp = (bytes_f64.log2() / 10.0).floor() as usize;
    let unit_index = exp.min(UNITS.len() - 1);
    let size = bytes_f64 / (1024_f64).powi(unit_index as i32);

    if size >= 10.0 {
        format!("{:.0} {}", size, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Round up to the next power of 2.
pub fn next_power_of_two(n: u64) -> u64 {
    if n == 0 {
        1
    } else {
        (n - 1).next_power_of_two()
    }
}
