//! Heap-backed DMA allocator.
//!
//! Serves DMA regions from the global allocator and hands out synthetic
//! bus addresses from a bump counter. Suitable for hosts, simulators and
//! platforms with an identity-mapped, cache-coherent bus.

use core::ptr::NonNull;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use portable_atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{DmaAddr, DmaAllocator, DmaRegion, DMA_ALIGN};

/// First synthetic bus address handed out.
const BUS_BASE: u32 = 0x4000_0000;

/// Heap-backed [`DmaAllocator`] with allocation accounting.
pub struct HeapDma {
    /// Next synthetic bus address
    next_bus: AtomicU32,
    /// Maximum bytes in use at once, `usize::MAX` for no limit
    limit: usize,
    /// Statistics counters
    stats: HeapDmaStats,
}

#[derive(Debug, Default)]
struct HeapDmaStats {
    /// Number of regions allocated
    allocated: AtomicUsize,
    /// Number of regions freed
    freed: AtomicUsize,
    /// Bytes currently allocated
    bytes_in_use: AtomicUsize,
}

impl Default for HeapDma {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapDma {
    pub const fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Allocator that fails once `limit` bytes are in use.
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            next_bus: AtomicU32::new(BUS_BASE),
            limit,
            stats: HeapDmaStats {
                allocated: AtomicUsize::new(0),
                freed: AtomicUsize::new(0),
                bytes_in_use: AtomicUsize::new(0),
            },
        }
    }

    /// Get statistics about the allocator.
    ///
    /// Returns `(allocated, freed, bytes_in_use)`.
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.allocated.load(Ordering::Acquire),
            self.stats.freed.load(Ordering::Acquire),
            self.stats.bytes_in_use.load(Ordering::Acquire),
        )
    }

    /// Number of regions currently allocated.
    pub fn live_regions(&self) -> usize {
        let (allocated, freed, _) = self.stats();
        allocated - freed
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), DMA_ALIGN).ok()
    }

    /// Take `size` bytes of bus address space, or `None` once the 32-bit
    /// bus is exhausted.
    fn bus_range(&self, size: usize) -> Option<DmaAddr> {
        // Keep bus addresses 8-byte aligned and non-overlapping.
        let span = size.checked_add(DMA_ALIGN - 1)? & !(DMA_ALIGN - 1);
        let span = u32::try_from(span).ok()?.max(DMA_ALIGN as u32);

        self.next_bus
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| next.checked_add(span))
            .ok()
            .map(DmaAddr)
    }

    fn reserve(&self, size: usize) -> bool {
        self.stats
            .bytes_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.limit)
            })
            .is_ok()
    }
}

unsafe impl DmaAllocator for HeapDma {
    fn alloc(&self, size: usize) -> Option<DmaRegion> {
        let layout = Self::layout(size)?;
        let bus = self.bus_range(size)?;

        if !self.reserve(size) {
            return None;
        }

        let memory = unsafe { alloc_zeroed(layout) };
        let Some(memory) = NonNull::new(memory) else {
            self.stats.bytes_in_use.fetch_sub(size, Ordering::AcqRel);
            return None;
        };

        self.stats.allocated.fetch_add(1, Ordering::AcqRel);

        Some(unsafe { DmaRegion::from_raw_parts(memory, bus, size) })
    }

    unsafe fn free(&self, region: DmaRegion) {
        if let Some(layout) = Self::layout(region.size()) {
            unsafe { dealloc(region.cpu_ptr().as_ptr(), layout) };
        }

        self.stats.bytes_in_use.fetch_sub(region.size(), Ordering::AcqRel);
        self.stats.freed.fetch_add(1, Ordering::AcqRel);
    }
}
