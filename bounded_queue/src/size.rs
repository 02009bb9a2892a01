//! Human-readable byte sizes such as `64K` or `1g`.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A byte count parsed from `<digits>[K|M|G]` (powers of 1024, any case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bytes(pub u64);

impl Bytes {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl FromStr for Bytes {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, shift) = match s.as_bytes().last() {
            Some(b'k' | b'K') => (&s[..s.len() - 1], 10),
            Some(b'm' | b'M') => (&s[..s.len() - 1], 20),
            Some(b'g' | b'G') => (&s[..s.len() - 1], 30),
            Some(_) => (s, 0),
            None => return Err(Error::InvalidSize("empty size".into())),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidSize(format!("malformed size {:?}", s)));
        }
        let base: u64 = digits
            .parse()
            .map_err(|_| Error::InvalidSize(format!("size {:?} out of range", s)))?;
        let value = base
            .checked_mul(1u64 << shift)
            .ok_or_else(|| Error::InvalidSize(format!("size {:?} out of range", s)))?;
        if value == 0 {
            return Err(Error::InvalidSize("size must be non-zero".into()));
        }
        Ok(Bytes(value))
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        for (shift, suffix) in [(30, "G"), (20, "M"), (10, "K")] {
            let unit = 1u64 << shift;
            if v != 0 && v % unit == 0 {
                return write!(f, "{}{}", v / unit, suffix);
            }
        }
        write!(f, "{}", v)
    }
}
