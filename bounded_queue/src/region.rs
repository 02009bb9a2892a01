//! Doubly mapped ring memory.
//!
//! The same `size` bytes of shared memory are mapped twice, back to back:
//!
//! ```text
//!  base                base+size            base+2*size
//!   |-------------------|--------------------|
//!   |  physical pages   |  same pages again  |
//! ```
//!
//! Any range of up to `size` bytes starting inside `[0, size)` is therefore
//! contiguous in the address space, so records that straddle the physical end
//! of the ring are read and written without splitting.

use std::ffi::CString;
use std::io;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, MmapAdvise, ProtFlags, madvise, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use tracing::debug;

use crate::error::{Error, Result};
use crate::separator::{SEPARATOR_SIZE, Separator};

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(0);

/// System page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 { page as usize } else { 4096 }
}

/// A page-aligned ring of `size` bytes, visible twice in a `2 * size` mapping.
///
/// Addressing always goes through a virtual cursor; the byte at cursor `c`
/// lives at `base + (c mod size)`. The memory is zero-filled on creation.
pub struct Region {
    base: NonNull<u8>,
    size: usize,
}

// Safety: the mapping is plain shared memory; access discipline (one writer,
// one reader) is enforced by Producer/Consumer.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map a new ring of at least `size` bytes (rounded up to the page size).
    pub fn allocate(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidSize("ring size must be non-zero".into()));
        }
        let page = page_size();
        let size = size
            .checked_next_multiple_of(page)
            .ok_or_else(|| Error::InvalidSize(format!("ring size {} overflows", size)))?;
        let raw_size = size
            .checked_mul(2)
            .ok_or_else(|| Error::InvalidSize(format!("ring size {} overflows", size)))?;

        let name = CString::new(format!(
            "/bounded_queue_{}_{}",
            std::process::id(),
            NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed)
        ))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let fd = shm_open(
            name.as_c_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        // The name is only needed to obtain the descriptor.
        let _ = shm_unlink(name.as_c_str());

        ftruncate(&fd, size as i64)?;

        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;
        let raw_len = NonZeroUsize::new(raw_size)
            .ok_or_else(|| Error::InvalidSize("ring size must be non-zero".into()))?;
        let half_len = NonZeroUsize::new(size)
            .ok_or_else(|| Error::InvalidSize("ring size must be non-zero".into()))?;

        // Reserve 2*size, then place the file again over the upper half.
        let first = unsafe { mmap(None, raw_len, prot, MapFlags::MAP_SHARED, &fd, 0)? };
        let upper = NonZeroUsize::new(first.as_ptr() as usize + size);
        let second = unsafe {
            mmap(
                upper,
                half_len,
                prot,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                &fd,
                0,
            )
        };
        if let Err(e) = second {
            unsafe {
                let _ = munmap(first, raw_size);
            }
            return Err(e.into());
        }

        debug!(size, raw_size, addr = first.as_ptr() as usize, "mapped ring region");

        Ok(Self {
            base: first.cast(),
            size,
        })
    }

    /// Ring size in bytes (the queue size, not the mapping size).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the doubled mapping.
    #[inline]
    pub fn raw_size(&self) -> usize {
        self.size * 2
    }

    /// Address of the mapping, for memory registration.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    /// Physical offset of a virtual cursor.
    #[inline]
    pub fn offset(&self, cursor: u64) -> usize {
        (cursor % self.size as u64) as usize
    }

    /// Ask the kernel to back the mapping with transparent huge pages.
    pub fn advise_hugepages(&self) -> Result<()> {
        unsafe {
            madvise(self.base.cast(), self.raw_size(), MmapAdvise::MADV_HUGEPAGE)?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub(crate) fn ptr_at(&self, cursor: u64) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.offset(cursor)) }
    }

    /// Read the separator cell at `cursor`.
    #[inline]
    pub(crate) fn load_separator(&self, cursor: u64) -> Separator {
        let raw = unsafe { std::ptr::read_volatile(self.ptr_at(cursor) as *const [u8; SEPARATOR_SIZE]) };
        fence(Ordering::Acquire);
        Separator::decode(u32::from_le_bytes(raw))
    }

    /// Write the separator cell at `cursor`.
    #[inline]
    pub(crate) fn store_separator(&self, cursor: u64, sep: Separator) {
        fence(Ordering::Release);
        unsafe {
            std::ptr::write_volatile(
                self.ptr_at(cursor) as *mut [u8; SEPARATOR_SIZE],
                sep.encode().to_le_bytes(),
            );
        }
    }

    /// View `len` bytes starting at `cursor`.
    ///
    /// # Safety
    /// `len <= size`, and no one may write the range while the slice lives.
    #[inline]
    pub(crate) unsafe fn slice(&self, cursor: u64, len: usize) -> &[u8] {
        debug_assert!(len <= self.size);
        unsafe { std::slice::from_raw_parts(self.ptr_at(cursor), len) }
    }

    /// Mutable view of `len` bytes starting at `cursor`.
    ///
    /// # Safety
    /// `len <= size`, and the caller must be the only one touching the range.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, cursor: u64, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.size);
        unsafe { std::slice::from_raw_parts_mut(self.ptr_at(cursor), len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.base.cast(), self.raw_size());
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("size", &self.size)
            .finish()
    }
}
