//! Producer and consumer over a [`Region`].
//!
//! Both sides keep a virtual (unwrapped) cursor that only ever grows; the
//! physical offset is the cursor modulo the ring size.
//!
//! A record is `header | payload | footer`. The producer leaves a footer right
//! after every record it writes; the next record's header overwrites it.
//!
//! ```text
//!      front
//!        |
//! -------+----------------------
//!  |H|+++|F|
//! ------------------------------
//!
//!              front
//!                |
//! ---------------+--------------
//!  |H|+++|H|++++|F|
//! ------------------------------
//! ```
//!
//! The consumer trusts a header at `back` only once the cell right after its
//! payload also holds a valid separator. Until then the record is treated as
//! still in flight. Locally the producer writes the footer, then the payload,
//! and the header last, so a consumer sharing the region never sees a header
//! ahead of its payload.
//!
//! A [`Producer`] and a [`Consumer`] may share one [`Region`] (a local SPSC
//! queue), which is why constructing either is `unsafe`: nothing but the
//! caller ties the producer's `known_back` to the consumer's real position.

use std::sync::Arc;

use crate::error::Result;
use crate::region::Region;
use crate::separator::{SEPARATOR_SIZE, Separator};

/// Bytes a record with `payload_len` payload bytes occupies, footer included.
#[inline]
pub fn framed_len(payload_len: usize) -> usize {
    2 * SEPARATOR_SIZE + payload_len
}

/// Free bytes between `front` and the last known consumer position.
#[inline]
pub fn free_space(size: u64, front: u64, known_back: u64) -> u64 {
    if known_back <= front {
        size.saturating_sub(front - known_back)
    } else {
        known_back - front
    }
}

/// Writing side of the ring.
#[derive(Debug)]
pub struct Producer {
    region: Arc<Region>,
    front: u64,
}

impl Producer {
    /// Create the writing side of `region`.
    ///
    /// # Safety
    /// At most one `Producer` may write `region`. If a [`Consumer`] reads the
    /// same region, every `known_back` passed to [`Producer::produce`] must be
    /// a value returned by that consumer's [`Consumer::back`].
    pub unsafe fn new(region: Arc<Region>) -> Self {
        Self { region, front: 0 }
    }

    /// Next write position (virtual).
    #[inline]
    pub fn front(&self) -> u64 {
        self.front
    }

    #[inline]
    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// Free space given the consumer position `known_back`.
    ///
    /// A `known_back` ahead of `front` cannot come from a consumer and is
    /// treated as `front`.
    #[inline]
    pub fn available(&self, known_back: u64) -> u64 {
        free_space(
            self.region.size() as u64,
            self.front,
            known_back.min(self.front),
        )
    }

    /// Append a record of `payload_len` bytes whose payload `fill` writes in
    /// place.
    ///
    /// Returns `Ok(None)` when the record does not fit in front of
    /// `known_back`; nothing is written in that case. Payloads the separator
    /// cannot describe are rejected before anything is written.
    pub fn produce<F>(&mut self, payload_len: usize, known_back: u64, fill: F) -> Result<Option<Record<'_>>>
    where
        F: FnOnce(&mut [u8]),
    {
        let header = Separator::header(payload_len)?;
        if framed_len(payload_len) as u64 > self.available(known_back) {
            return Ok(None);
        }

        let start = self.front;
        let end = start + (SEPARATOR_SIZE + payload_len) as u64;
        self.region.store_separator(end, Separator::Footer);
        // The payload lies between the cell at `start`, which still holds the
        // previous footer, and the new footer; no consumer reads it yet.
        fill(unsafe {
            self.region
                .slice_mut(start + SEPARATOR_SIZE as u64, payload_len)
        });
        self.region.store_separator(start, header);
        self.front = end;

        Ok(Some(Record {
            region: &self.region,
            start,
            payload_len,
        }))
    }
}

/// A record just framed by [`Producer::produce`].
#[derive(Debug)]
pub struct Record<'a> {
    region: &'a Region,
    start: u64,
    payload_len: usize,
}

impl Record<'_> {
    /// Virtual position of the header.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Physical offset of the header inside the ring.
    #[inline]
    pub fn offset(&self) -> usize {
        self.region.offset(self.start)
    }

    /// Framed length, header through footer.
    #[inline]
    pub fn framed_len(&self) -> usize {
        framed_len(self.payload_len)
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn payload(&self) -> &[u8] {
        unsafe { self.region.slice(self.start + SEPARATOR_SIZE as u64, self.payload_len) }
    }

    /// The whole framed record, as it must be transmitted.
    pub fn bytes(&self) -> &[u8] {
        unsafe { self.region.slice(self.start, self.framed_len()) }
    }
}

/// Reading side of the ring.
#[derive(Debug)]
pub struct Consumer {
    region: Arc<Region>,
    back: u64,
}

impl Consumer {
    /// Create the reading side of `region`.
    ///
    /// # Safety
    /// At most one `Consumer` may read `region`, and whoever writes it must
    /// follow the contract of [`Producer::new`].
    pub unsafe fn new(region: Arc<Region>) -> Self {
        Self { region, back: 0 }
    }

    /// Next read position (virtual).
    #[inline]
    pub fn back(&self) -> u64 {
        self.back
    }

    #[inline]
    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// Take the next complete record, if one has fully arrived.
    pub fn consume(&mut self) -> Option<Message<'_>> {
        let Separator::Header(n) = self.region.load_separator(self.back) else {
            return None;
        };
        let payload_len = n as usize;
        // A header longer than the ring cannot come from a producer.
        if framed_len(payload_len) > self.region.size() {
            return None;
        }

        let end = self.back + (SEPARATOR_SIZE + payload_len) as u64;
        if !self.region.load_separator(end).is_valid() {
            return None;
        }

        let start = self.back;
        self.back = end;
        Some(Message {
            region: &self.region,
            start,
            payload_len,
        })
    }
}

/// A record handed out by [`Consumer::consume`], read in place.
#[derive(Debug)]
pub struct Message<'a> {
    region: &'a Region,
    start: u64,
    payload_len: usize,
}

impl<'a> Message<'a> {
    /// Virtual position of the header.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }

    pub fn payload(&self) -> &'a [u8] {
        unsafe { self.region.slice(self.start + SEPARATOR_SIZE as u64, self.payload_len) }
    }
}
