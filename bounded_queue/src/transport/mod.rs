//! One-sided write transport interface.
//!
//! The ring only needs three things from a transport: registering memory so
//! the peer may write into it, posting writes into the peer's registered
//! memory, and reporting completions for signaled writes. RDMA reliable
//! connections are the model; [`loopback`] is an in-process implementation.
//!
//! Sentinel framing is only correct if writes posted on one queue land in
//! posting order and a write never exposes its leading bytes before the rest.
//! Transports state this through [`Transport::guarantees_in_order_delivery`],
//! and session setup refuses transports that do not.

use bitflags::bitflags;

use crate::error::Result;

pub mod loopback;

bitflags! {
    /// Memory access flags for registration.
    ///
    /// Local read access is always enabled.
    /// `REMOTE_WRITE` requires `LOCAL_WRITE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// Enable local write access.
        const LOCAL_WRITE = 1;

        /// Enable remote write access.
        const REMOTE_WRITE = 2;

        /// Enable remote read access.
        const REMOTE_READ = 4;

        /// Enable remote atomic operations.
        const REMOTE_ATOMIC = 8;
    }
}

/// A registered memory range.
pub trait RegisteredMemory {
    fn addr(&self) -> u64;
    fn len(&self) -> usize;
    /// Key for using this range as a local source.
    fn lkey(&self) -> u32;
    /// Key the peer uses to write into this range.
    fn rkey(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scatter/gather element referencing registered local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sge {
    pub addr: u64,
    pub len: u32,
    pub lkey: u32,
}

/// Where the bytes of a write come from.
#[derive(Debug, Clone, Copy)]
pub enum WriteSource<'a> {
    /// Copied into the request at post time.
    Inline(&'a [u8]),
    /// Read from registered memory when the transport processes the request.
    Sge(Sge),
}

impl WriteSource<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            WriteSource::Inline(data) => data.len(),
            WriteSource::Sge(sge) => sge.len as usize,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A one-sided write work request.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub wr_id: u64,
    pub source: WriteSource<'a>,
    pub remote_addr: u64,
    pub rkey: u32,
    /// Produce a completion for this request.
    pub signaled: bool,
}

/// Work completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    LocalProtectionError,
    RemoteAccessError,
    /// Request discarded because the queue had already failed.
    FlushError,
}

/// A work completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub wr_id: u64,
    pub status: CompletionStatus,
}

impl Completion {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }
}

/// A send queue able to post one-sided writes.
pub trait OneSidedQueue {
    /// Post a write. Inline sources are copied before this returns.
    fn post_write(&mut self, wr: &WriteRequest<'_>) -> Result<()>;

    /// Move up to `max` completions into `out`; returns how many were added.
    fn poll(&mut self, out: &mut Vec<Completion>, max: usize) -> Result<usize>;
}

/// A one-sided write transport.
pub trait Transport {
    type MemoryRegion: RegisteredMemory;
    type Queue: OneSidedQueue;

    /// Writes on one queue become visible in posting order, each as a whole.
    fn guarantees_in_order_delivery(&self) -> bool;

    /// Register `len` bytes at `addr`.
    ///
    /// # Safety
    /// The range must stay mapped and valid for as long as the returned
    /// region lives.
    unsafe fn register(
        &self,
        addr: *mut u8,
        len: usize,
        access: AccessFlags,
    ) -> Result<Self::MemoryRegion>;

    fn create_queue(&self) -> Result<Self::Queue>;
}
