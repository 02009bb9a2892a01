//! Connection-time exchange of ring coordinates.
//!
//! Each side sends a small fixed-layout blob as connection private data.
//! All integers are little-endian.
//!
//! ```text
//! ProducerSideInfo (16 bytes)        ConsumerSideInfo (24 bytes)
//! +0  remote_address     u64         +0  remote_address     u64
//! +8  remote_access_key  u32         +8  ring_size          u64
//! +12 reserved           u32         +16 remote_access_key  u32
//!                                    +20 reserved           u32
//! ```

use crate::error::{Error, Result};

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
fn check_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(Error::Handshake {
            expected,
            got: buf.len(),
        });
    }
    Ok(())
}

/// Sent by the producer: where the consumer writes credit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSideInfo {
    pub remote_address: u64,
    pub remote_access_key: u32,
}

impl ProducerSideInfo {
    pub const WIRE_SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..8].copy_from_slice(&self.remote_address.to_le_bytes());
        buf[8..12].copy_from_slice(&self.remote_access_key.to_le_bytes());
        buf
    }

    /// Decode from private data. Trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            remote_address: read_u64(buf, 0),
            remote_access_key: read_u32(buf, 8),
        })
    }
}

/// Sent by the consumer: where the producer writes records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSideInfo {
    pub remote_address: u64,
    pub ring_size: u64,
    pub remote_access_key: u32,
}

impl ConsumerSideInfo {
    pub const WIRE_SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..8].copy_from_slice(&self.remote_address.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ring_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.remote_access_key.to_le_bytes());
        buf
    }

    /// Decode from private data. Trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            remote_address: read_u64(buf, 0),
            ring_size: read_u64(buf, 8),
            remote_access_key: read_u32(buf, 16),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_info_layout() {
        let info = ProducerSideInfo {
            remote_address: 0x0102_0304_0506_0708,
            remote_access_key: 0xdead_beef,
        };
        let buf = info.encode();
        assert_eq!(&buf[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&buf[8..12], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);
        assert_eq!(ProducerSideInfo::decode(&buf).unwrap(), info);
    }

    #[test]
    fn test_consumer_info_layout() {
        let info = ConsumerSideInfo {
            remote_address: 0x7f00_0000_1000,
            ring_size: 65536,
            remote_access_key: 42,
        };
        let buf = info.encode();
        assert_eq!(&buf[8..16], &65536u64.to_le_bytes());
        assert_eq!(&buf[16..20], &42u32.to_le_bytes());

        let mut padded = buf.to_vec();
        padded.extend_from_slice(&[0xff; 8]);
        assert_eq!(ConsumerSideInfo::decode(&padded).unwrap(), info);
    }

    #[test]
    fn test_short_private_data_rejected() {
        assert!(matches!(
            ProducerSideInfo::decode(&[0u8; 8]),
            Err(Error::Handshake { expected: 16, got: 8 })
        ));
        assert!(matches!(
            ConsumerSideInfo::decode(&[0u8; 16]),
            Err(Error::Handshake { expected: 24, got: 16 })
        ));
    }
}
