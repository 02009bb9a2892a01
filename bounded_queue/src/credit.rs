//! Consumer progress reporting.
//!
//! The consumer periodically writes its `back` cursor into an 8-byte slot on
//! the producer side. The producer never reads the consumer's ring directly;
//! this slot is its only view of how much space has been freed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Producer-side slot the consumer writes its progress into.
///
/// The slot is 8-byte aligned so that a remote 8-byte write lands atomically.
#[derive(Debug, Default)]
#[repr(C, align(8))]
pub struct CreditSlot {
    back: AtomicU64,
}

impl CreditSlot {
    /// Wire size of a credit report.
    pub const SIZE: usize = 8;

    pub fn new() -> Self {
        Self::default()
    }

    /// Last consumer position that arrived.
    #[inline]
    pub fn known_back(&self) -> u64 {
        self.back.load(Ordering::Acquire)
    }

    /// Raw address for memory registration.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.back.as_ptr().cast()
    }

    /// Encode a consumer position for the wire.
    #[inline]
    pub fn encode(back: u64) -> [u8; Self::SIZE] {
        back.to_ne_bytes()
    }
}

/// Decides when the consumer owes the producer a report.
#[derive(Debug, Clone)]
pub struct CreditReporter {
    last_reported: u64,
    threshold: u64,
}

impl CreditReporter {
    pub fn new(threshold: u64) -> Self {
        Self {
            last_reported: 0,
            threshold,
        }
    }

    #[inline]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    #[inline]
    pub fn last_reported(&self) -> u64 {
        self.last_reported
    }

    /// True once more than `threshold` bytes were consumed since the last report.
    #[inline]
    pub fn is_due(&self, back: u64) -> bool {
        back.saturating_sub(self.last_reported) > self.threshold
    }

    /// True if any progress has not been reported yet.
    #[inline]
    pub fn has_unreported(&self, back: u64) -> bool {
        back > self.last_reported
    }

    #[inline]
    pub fn mark_reported(&mut self, back: u64) {
        self.last_reported = self.last_reported.max(back);
    }
}
