//! Producer bound to a transport.
//!
//! Records are framed in a local staging ring that has the same size as the
//! peer's ring, then written one-sidedly to the same offset on the peer.
//! Because both rings are doubly mapped (and registered over `2 * size`), a
//! record that wraps is still a single write.
//!
//! Only every `signal_interval`th write asks for a completion. Each completion
//! therefore retires a whole batch from the in-flight count, which relies on
//! the transport completing writes in posting order.

use tracing::trace;

use crate::config::SenderConfig;
use crate::credit::CreditSlot;
use crate::error::{Error, Result};
use crate::handshake::{ConsumerSideInfo, ProducerSideInfo};
use crate::ring::Producer;
use crate::transport::{
    Completion, OneSidedQueue, RegisteredMemory, Sge, Transport, WriteRequest, WriteSource,
};

/// Sending half of a ring connection.
pub struct Sender<T: Transport> {
    // Field order is drop order: the queue goes before the registrations,
    // and the registrations before the memory they cover.
    queue: T::Queue,
    ring_mr: T::MemoryRegion,
    credit_mr: T::MemoryRegion,
    credit: Box<CreditSlot>,
    producer: Producer,
    remote: ConsumerSideInfo,
    config: SenderConfig,
    /// Writes posted so far; also the next wr_id.
    posted: u64,
    /// Writes not yet retired by a completion.
    in_flight: usize,
    completions: Vec<Completion>,
}

impl<T: Transport> Sender<T> {
    pub(crate) fn new(
        queue: T::Queue,
        ring_mr: T::MemoryRegion,
        credit_mr: T::MemoryRegion,
        credit: Box<CreditSlot>,
        producer: Producer,
        remote: ConsumerSideInfo,
        config: SenderConfig,
    ) -> Self {
        let completions = Vec::with_capacity(config.tx_depth);
        Self {
            queue,
            ring_mr,
            credit_mr,
            credit,
            producer,
            remote,
            config,
            posted: 0,
            in_flight: 0,
            completions,
        }
    }

    /// Frame a record of `len` bytes, let `fill` write the payload in place,
    /// and post it to the peer.
    ///
    /// Returns `Ok(false)` without writing anything when the send queue is at
    /// `tx_depth` or the ring has no room according to the last credit.
    pub fn send_with<F>(&mut self, len: usize, fill: F) -> Result<bool>
    where
        F: FnOnce(&mut [u8]),
    {
        if self.in_flight >= self.config.tx_depth {
            self.poll()?;
            if self.in_flight >= self.config.tx_depth {
                return Ok(false);
            }
        }

        let known_back = self.credit.known_back();
        let Some(record) = self.producer.produce(len, known_back, fill)? else {
            trace!(front = self.producer.front(), known_back, "ring full");
            return Ok(false);
        };

        let offset = record.offset() as u64;
        let framed = record.framed_len();
        let source = if framed <= self.config.max_inline {
            WriteSource::Inline(record.bytes())
        } else {
            WriteSource::Sge(Sge {
                addr: self.ring_mr.addr() + offset,
                len: framed as u32,
                lkey: self.ring_mr.lkey(),
            })
        };

        self.posted += 1;
        let wr = WriteRequest {
            wr_id: self.posted - 1,
            source,
            remote_addr: self.remote.remote_address + offset,
            rkey: self.remote.remote_access_key,
            signaled: self.posted % self.config.signal_interval as u64 == 0,
        };
        self.queue.post_write(&wr)?;
        self.in_flight += 1;
        Ok(true)
    }

    /// Copy `payload` into the ring and post it.
    #[inline]
    pub fn send(&mut self, payload: &[u8]) -> Result<bool> {
        self.send_with(payload.len(), |buf| buf.copy_from_slice(payload))
    }

    /// Drain completions. A failed completion is fatal to the connection.
    pub fn poll(&mut self) -> Result<usize> {
        self.completions.clear();
        let n = self
            .queue
            .poll(&mut self.completions, self.config.tx_depth)?;
        for c in &self.completions {
            if !c.is_success() {
                return Err(Error::Completion {
                    wr_id: c.wr_id,
                    status: c.status,
                });
            }
            self.in_flight = self.in_flight.saturating_sub(self.config.signal_interval);
        }
        Ok(n)
    }

    /// Coordinates the peer needs to report credit to this sender.
    pub fn local_info(&self) -> ProducerSideInfo {
        ProducerSideInfo {
            remote_address: self.credit_mr.addr(),
            remote_access_key: self.credit_mr.rkey(),
        }
    }

    #[inline]
    pub fn front(&self) -> u64 {
        self.producer.front()
    }

    /// Last consumer position reported by the peer.
    #[inline]
    pub fn known_back(&self) -> u64 {
        self.credit.known_back()
    }

    /// Free bytes according to the last credit.
    #[inline]
    pub fn available(&self) -> u64 {
        self.producer.available(self.credit.known_back())
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn posted(&self) -> u64 {
        self.posted
    }

    #[inline]
    pub fn ring_size(&self) -> usize {
        self.producer.region().size()
    }

    #[inline]
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }
}

impl<T: Transport> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("front", &self.producer.front())
            .field("known_back", &self.credit.known_back())
            .field("posted", &self.posted)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
