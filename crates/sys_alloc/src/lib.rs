//! Virtual-memory reservations for the belt heap.
//!
//! The collector reserves one large, page-aligned, anonymous mapping per heap
//! and carves it into belts itself; this crate is the thin platform layer that
//! obtains and releases that mapping (`mmap` on Unix, `VirtualAlloc` on
//! Windows). Nothing here knows about cells, belts, or grips.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows this is the `VirtualAlloc` granularity (typically 64KB); on
/// Unix it equals the page size. Reservation hint addresses should be
/// aligned to this value.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// One contiguous page-aligned span of anonymous virtual memory.
///
/// The span is readable and writable for its whole lifetime and is returned
/// to the OS when the reservation is dropped. The heap that owns a
/// reservation is responsible for ensuring no pointer into the span outlives
/// it.
pub struct HeapReservation {
    inner: os::MapInner,
}

impl HeapReservation {
    /// Reserve `len` bytes of zeroed anonymous memory at an OS-chosen address.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping cannot be established, and
    /// `InvalidInput` if `len` is zero.
    pub fn reserve(len: usize) -> io::Result<Self> {
        Self::reserve_impl(0, len)
    }

    /// Reserve `len` bytes, asking the OS to place the mapping at `hint`.
    ///
    /// The hint is best-effort: the OS may place the mapping elsewhere. For
    /// the best chance of success, `hint` should be aligned to
    /// [`allocation_granularity`] and the range `[hint, hint + len)` unused.
    ///
    /// # Errors
    ///
    /// Returns the OS error if no mapping can be established at all, and
    /// `InvalidInput` if `len` is zero.
    pub fn reserve_at(hint: usize, len: usize) -> io::Result<Self> {
        Self::reserve_impl(hint, len)
    }

    fn reserve_impl(hint: usize, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "reservation length must be greater than 0",
            ));
        }
        // SAFETY: len is non-zero and the mapping is anonymous; the returned
        // span is owned by the HeapReservation and unmapped exactly once on
        // drop.
        let inner = unsafe { os::MapInner::map_anon(hint, len)? };
        Ok(Self { inner })
    }

    /// The start of the reserved span. Always page-aligned.
    #[must_use]
    pub fn base(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// The length of the reserved span in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the reservation is empty (never true for a live reservation).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

// SAFETY: the reservation is a plain span of memory; all synchronization of
// accesses into it is the owning heap's responsibility.
unsafe impl Send for HeapReservation {}
unsafe impl Sync for HeapReservation {}
