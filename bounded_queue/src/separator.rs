//! Sentinel cells that frame records inside the ring.
//!
//! A separator is one little-endian `u32`:
//!
//! ```text
//!  31 30                                   0
//! +--+--------------------------------------+
//! |F |              size_field              |
//! +--+--------------------------------------+
//! ```
//!
//! - `Header(n)`: `F = 0`, `size_field = n > 0`
//! - `Footer`:    `F = 1`, `size_field = 0`
//! - `Empty`:     all zero (fresh, never written memory)
//!
//! Any other bit pattern is `Corrupt`. Only `Header` and `Footer` are valid;
//! a zero word is never mistaken for a zero-length header because zero-length
//! records cannot be encoded.

use crate::error::{Error, Result};

/// Width of one separator cell in bytes.
pub const SEPARATOR_SIZE: usize = 4;

/// Footer flag bit.
const FOOTER_BIT: u32 = 1 << 31;

/// Largest payload the size field can describe.
pub const MAX_PAYLOAD: usize = (FOOTER_BIT - 1) as usize;

/// Decoded separator cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// Zero-filled, never written.
    Empty,
    /// Start of a record carrying `n` payload bytes.
    Header(u32),
    /// End of written data.
    Footer,
    /// Footer flag combined with a non-zero size.
    Corrupt(u32),
}

impl Separator {
    /// Build a header for a payload of `len` bytes.
    ///
    /// Fails if the payload is empty or does not fit the 31-bit size field.
    pub fn header(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::EmptyPayload);
        }
        if len > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD,
            });
        }
        Ok(Separator::Header(len as u32))
    }

    /// Decode a raw cell value.
    #[inline]
    pub fn decode(word: u32) -> Self {
        let size = word & !FOOTER_BIT;
        match (word & FOOTER_BIT != 0, size) {
            (false, 0) => Separator::Empty,
            (false, n) => Separator::Header(n),
            (true, 0) => Separator::Footer,
            (true, _) => Separator::Corrupt(word),
        }
    }

    /// Encode into the raw cell value.
    #[inline]
    pub fn encode(self) -> u32 {
        match self {
            Separator::Empty => 0,
            Separator::Header(n) => n & !FOOTER_BIT,
            Separator::Footer => FOOTER_BIT,
            Separator::Corrupt(word) => word,
        }
    }

    /// A cell is valid iff it is a footer or a non-empty header.
    #[inline]
    pub fn is_valid(self) -> bool {
        matches!(self, Separator::Header(_) | Separator::Footer)
    }

    #[inline]
    pub fn is_footer(self) -> bool {
        self == Separator::Footer
    }

    /// Payload length if this is a header.
    #[inline]
    pub fn payload_size(self) -> Option<usize> {
        match self {
            Separator::Header(n) => Some(n as usize),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_word_is_empty_and_invalid() {
        let sep = Separator::decode(0);
        assert_eq!(sep, Separator::Empty);
        assert!(!sep.is_valid());
        assert!(!sep.is_footer());
        assert_eq!(sep.payload_size(), None);
    }

    #[test]
    fn test_header_encoding() {
        let sep = Separator::header(42).unwrap();
        assert_eq!(sep.encode(), 42);
        assert_eq!(Separator::decode(42), Separator::Header(42));
        assert!(sep.is_valid());
        assert_eq!(sep.payload_size(), Some(42));
    }

    #[test]
    fn test_footer_encoding() {
        assert_eq!(Separator::Footer.encode(), 0x8000_0000);
        let sep = Separator::decode(0x8000_0000);
        assert!(sep.is_footer());
        assert!(sep.is_valid());
        assert_eq!(sep.payload_size(), None);
    }

    #[test]
    fn test_footer_with_size_is_corrupt() {
        let sep = Separator::decode(0x8000_0010);
        assert_eq!(sep, Separator::Corrupt(0x8000_0010));
        assert!(!sep.is_valid());
        assert!(!sep.is_footer());
    }

    #[test]
    fn test_header_limits() {
        assert!(matches!(Separator::header(0), Err(Error::EmptyPayload)));
        assert_eq!(
            Separator::header(MAX_PAYLOAD).unwrap(),
            Separator::Header(0x7fff_ffff)
        );
        assert!(matches!(
            Separator::header(MAX_PAYLOAD + 1),
            Err(Error::PayloadTooLarge { size, max }) if size == MAX_PAYLOAD + 1 && max == MAX_PAYLOAD
        ));
    }
}
