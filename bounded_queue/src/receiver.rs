//! Consumer bound to a transport.
//!
//! The receiver reads records straight out of its ring, which the peer
//! fills with one-sided writes. The only traffic it generates is the credit
//! report: an 8-byte inline write of its read cursor into the peer's
//! [`CreditSlot`](crate::credit::CreditSlot), sent once the cursor has moved
//! more than the report threshold.

use tracing::trace;

use crate::config::ReceiverConfig;
use crate::credit::{CreditReporter, CreditSlot};
use crate::error::{Error, Result};
use crate::handshake::{ConsumerSideInfo, ProducerSideInfo};
use crate::ring::Consumer;
use crate::transport::{Completion, OneSidedQueue, RegisteredMemory, Transport, WriteRequest, WriteSource};

/// Receiving half of a ring connection.
pub struct Receiver<T: Transport> {
    queue: T::Queue,
    ring_mr: T::MemoryRegion,
    consumer: Consumer,
    remote: ProducerSideInfo,
    reporter: CreditReporter,
    config: ReceiverConfig,
    /// Credit writes posted so far; also the next wr_id.
    reports: u64,
    /// Credit writes awaiting completion.
    outstanding: usize,
    /// Calls to `receive`, for periodic completion draining.
    ticks: usize,
    completions: Vec<Completion>,
}

impl<T: Transport> Receiver<T> {
    pub(crate) fn new(
        queue: T::Queue,
        ring_mr: T::MemoryRegion,
        consumer: Consumer,
        remote: ProducerSideInfo,
        threshold: u64,
        config: ReceiverConfig,
    ) -> Self {
        let completions = Vec::with_capacity(config.max_outstanding_reports);
        Self {
            queue,
            ring_mr,
            consumer,
            remote,
            reporter: CreditReporter::new(threshold),
            config,
            reports: 0,
            outstanding: 0,
            ticks: 0,
            completions,
        }
    }

    /// Hand the next complete record to `f`.
    ///
    /// Returns `Ok(None)` if no complete record is present. Credit is
    /// reported after `f` returns, so the payload slice is never exposed
    /// to the producer while it is borrowed.
    pub fn receive<F, R>(&mut self, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.config.poll_interval == 0 {
            self.poll()?;
        }

        let result = self.consumer.consume().map(|msg| f(msg.payload()));
        let back = self.consumer.back();
        // A report deferred at the outstanding limit stays due and is retried
        // on every call, idle or not.
        let due = self.reporter.is_due(back)
            || (result.is_none() && self.config.report_when_idle && self.reporter.has_unreported(back));
        if due {
            self.report(back)?;
        }
        Ok(result)
    }

    /// Copy the next complete record into a new vector.
    pub fn receive_vec(&mut self) -> Result<Option<Vec<u8>>> {
        self.receive(|payload| payload.to_vec())
    }

    /// Report the current cursor now if any progress is unreported.
    pub fn report_credit(&mut self) -> Result<bool> {
        let back = self.consumer.back();
        if !self.reporter.has_unreported(back) {
            return Ok(false);
        }
        self.report(back)
    }

    fn report(&mut self, back: u64) -> Result<bool> {
        if self.outstanding >= self.config.max_outstanding_reports {
            self.poll()?;
            if self.outstanding >= self.config.max_outstanding_reports {
                trace!(back, outstanding = self.outstanding, "credit report deferred");
                return Ok(false);
            }
        }

        let bytes = CreditSlot::encode(back);
        let wr = WriteRequest {
            wr_id: self.reports,
            source: WriteSource::Inline(&bytes),
            remote_addr: self.remote.remote_address,
            rkey: self.remote.remote_access_key,
            signaled: true,
        };
        self.queue.post_write(&wr)?;
        self.reports += 1;
        self.outstanding += 1;
        self.reporter.mark_reported(back);
        trace!(back, "reported credit");
        Ok(true)
    }

    /// Drain completions of credit writes. A failed completion is fatal.
    pub fn poll(&mut self) -> Result<usize> {
        self.completions.clear();
        let n = self
            .queue
            .poll(&mut self.completions, self.config.max_outstanding_reports)?;
        for c in &self.completions {
            if !c.is_success() {
                return Err(Error::Completion {
                    wr_id: c.wr_id,
                    status: c.status,
                });
            }
        }
        self.outstanding = self.outstanding.saturating_sub(n);
        Ok(n)
    }

    /// Coordinates the peer needs to write into this receiver's ring.
    pub fn local_info(&self) -> ConsumerSideInfo {
        ConsumerSideInfo {
            remote_address: self.ring_mr.addr(),
            ring_size: self.consumer.region().size() as u64,
            remote_access_key: self.ring_mr.rkey(),
        }
    }

    #[inline]
    pub fn back(&self) -> u64 {
        self.consumer.back()
    }

    /// Cursor value most recently sent to the producer.
    #[inline]
    pub fn last_reported(&self) -> u64 {
        self.reporter.last_reported()
    }

    #[inline]
    pub fn report_threshold(&self) -> u64 {
        self.reporter.threshold()
    }

    #[inline]
    pub fn ring_size(&self) -> usize {
        self.consumer.region().size()
    }

    #[inline]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }
}

impl<T: Transport> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("back", &self.consumer.back())
            .field("last_reported", &self.reporter.last_reported())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}
