//! In-process transport.
//!
//! A [`Fabric`] stands in for the network: it holds every registered memory
//! range under an access key, and [`LoopbackQueue`] performs each posted write
//! immediately by copying into the target range. Registrations made through
//! one fabric (or its clones) are reachable from every queue of that fabric.
//!
//! Delivery is synchronous and in posting order. Within a write the first
//! four bytes are stored last, after a release fence, so a reader polling a
//! leading separator never observes it ahead of the bytes behind it.

use std::collections::{HashMap, VecDeque};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use super::{
    AccessFlags, Completion, CompletionStatus, OneSidedQueue, RegisteredMemory, Transport,
    WriteRequest, WriteSource,
};
use crate::error::{Error, Result};
use crate::separator::SEPARATOR_SIZE;

#[derive(Debug, Clone, Copy)]
struct Registration {
    addr: u64,
    len: usize,
    access: AccessFlags,
}

impl Registration {
    #[inline]
    fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.addr
            && (addr - self.addr)
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.len as u64)
    }
}

#[derive(Debug)]
struct FabricInner {
    regions: RwLock<HashMap<u32, Registration>>,
    next_key: AtomicU32,
}

/// Registry shared by all endpoints of an in-process connection.
#[derive(Debug, Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FabricInner {
                regions: RwLock::new(HashMap::new()),
                next_key: AtomicU32::new(1),
            }),
        }
    }

    /// Number of live registrations.
    pub fn registered_regions(&self) -> usize {
        self.inner
            .regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for Fabric {
    type MemoryRegion = MemoryRegion;
    type Queue = LoopbackQueue;

    fn guarantees_in_order_delivery(&self) -> bool {
        true
    }

    unsafe fn register(&self, addr: *mut u8, len: usize, access: AccessFlags) -> Result<MemoryRegion> {
        if addr.is_null() || len == 0 {
            return Err(Error::Registration(format!(
                "cannot register {} bytes at {:p}",
                len, addr
            )));
        }
        if access.intersects(AccessFlags::REMOTE_WRITE | AccessFlags::REMOTE_ATOMIC)
            && !access.contains(AccessFlags::LOCAL_WRITE)
        {
            return Err(Error::Registration(
                "remote write access requires LOCAL_WRITE".into(),
            ));
        }

        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            addr: addr as u64,
            len,
            access,
        };
        self.inner
            .regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, registration);

        Ok(MemoryRegion {
            fabric: self.inner.clone(),
            addr: registration.addr,
            len,
            key,
        })
    }

    fn create_queue(&self) -> Result<LoopbackQueue> {
        Ok(LoopbackQueue {
            fabric: self.inner.clone(),
            completions: VecDeque::new(),
            failed: false,
        })
    }
}

/// A registration on a [`Fabric`]; deregistered on drop.
#[derive(Debug)]
pub struct MemoryRegion {
    fabric: Arc<FabricInner>,
    addr: u64,
    len: usize,
    key: u32,
}

impl RegisteredMemory for MemoryRegion {
    #[inline]
    fn addr(&self) -> u64 {
        self.addr
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn lkey(&self) -> u32 {
        self.key
    }

    #[inline]
    fn rkey(&self) -> u32 {
        self.key
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        self.fabric
            .regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Send queue of a [`Fabric`].
#[derive(Debug)]
pub struct LoopbackQueue {
    fabric: Arc<FabricInner>,
    completions: VecDeque<Completion>,
    failed: bool,
}

impl LoopbackQueue {
    /// True once a request failed; the queue then rejects further posts.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn fail(&mut self, wr_id: u64, status: CompletionStatus) {
        warn!(wr_id, ?status, "loopback write failed");
        self.failed = true;
        self.completions.push_back(Completion { wr_id, status });
    }
}

impl OneSidedQueue for LoopbackQueue {
    fn post_write(&mut self, wr: &WriteRequest<'_>) -> Result<()> {
        if self.failed {
            return Err(Error::QueueError);
        }

        let failure = {
            let regions = self
                .fabric
                .regions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match resolve(&regions, wr) {
                Ok(src) => {
                    // Both ranges belong to live registrations, which cannot
                    // be removed while the read lock is held.
                    unsafe { place(src, wr.remote_addr as *mut u8, wr.source.len()) };
                    None
                }
                Err(status) => Some(status),
            }
        };
        if let Some(status) = failure {
            self.fail(wr.wr_id, status);
            return Ok(());
        }

        if wr.signaled {
            self.completions.push_back(Completion {
                wr_id: wr.wr_id,
                status: CompletionStatus::Success,
            });
        }
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<Completion>, max: usize) -> Result<usize> {
        let n = max.min(self.completions.len());
        out.extend(self.completions.drain(..n));
        Ok(n)
    }
}

/// Check a request against the registry and return its source pointer.
fn resolve(
    regions: &HashMap<u32, Registration>,
    wr: &WriteRequest<'_>,
) -> std::result::Result<*const u8, CompletionStatus> {
    let len = wr.source.len();
    let src = match wr.source {
        WriteSource::Inline(data) => data.as_ptr(),
        WriteSource::Sge(sge) => match regions.get(&sge.lkey) {
            Some(reg) if reg.contains(sge.addr, len) => sge.addr as *const u8,
            _ => return Err(CompletionStatus::LocalProtectionError),
        },
    };
    match regions.get(&wr.rkey) {
        Some(reg)
            if reg.access.contains(AccessFlags::REMOTE_WRITE)
                && reg.contains(wr.remote_addr, len) =>
        {
            Ok(src)
        }
        _ => Err(CompletionStatus::RemoteAccessError),
    }
}

/// Copy `len` bytes so that the leading word becomes visible last.
///
/// # Safety
/// `src` must be readable and `dst` writable for `len` bytes, and the two
/// ranges must not overlap.
unsafe fn place(src: *const u8, dst: *mut u8, len: usize) {
    unsafe {
        if len == 8 && (dst as usize) % 8 == 0 {
            let value = ptr::read_unaligned(src as *const u64);
            (*(dst as *const AtomicU64)).store(value, Ordering::Release);
        } else if len > SEPARATOR_SIZE {
            ptr::copy_nonoverlapping(
                src.add(SEPARATOR_SIZE),
                dst.add(SEPARATOR_SIZE),
                len - SEPARATOR_SIZE,
            );
            fence(Ordering::Release);
            let head = ptr::read_unaligned(src as *const [u8; SEPARATOR_SIZE]);
            ptr::write_volatile(dst as *mut [u8; SEPARATOR_SIZE], head);
        } else {
            ptr::copy_nonoverlapping(src, dst, len);
        }
    }
}
