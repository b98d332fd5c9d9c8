//! Width-marked variable-length unsigned integers.
//!
//! A length is one marker byte naming the width of the value that follows,
//! then the value itself in little-endian:
//!
//! ```text
//! ┌────────────┬──────────────────┐
//! │ Marker (1B)│ Value            │
//! │ 0x01       │ u8               │
//! │ 0x02       │ u16 LE           │
//! │ 0x04       │ u32 LE           │
//! └────────────┴──────────────────┘
//! ```
//!
//! Writers always pick the smallest width that fits. Values above
//! `u32::MAX` have no encoding and are rejected at write time.

/// Marker for a one-byte value.
pub const WIDTH_U8: u8 = 1;

/// Marker for a two-byte little-endian value.
pub const WIDTH_U16: u8 = 2;

/// Marker for a four-byte little-endian value.
pub const WIDTH_U32: u8 = 4;

/// The wire size of `value` once length-encoded, marker byte included.
pub fn length_size(value: u32) -> usize {
    if value <= u8::MAX as u32 {
        2
    } else if value <= u16::MAX as u32 {
        3
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_size_widths() {
        assert_eq!(length_size(0), 2);
        assert_eq!(length_size(u8::MAX as u32), 2);
        assert_eq!(length_size(u8::MAX as u32 + 1), 3);
        assert_eq!(length_size(u16::MAX as u32), 3);
        assert_eq!(length_size(u16::MAX as u32 + 1), 5);
        assert_eq!(length_size(u32::MAX), 5);
    }
}
