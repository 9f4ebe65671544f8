//! DMA memory seam.
//!
//! Display list bodies and headers are read by the device through DMA, so
//! every buffer has two faces: a CPU pointer the driver writes through and
//! a bus address the hardware is programmed with. The platform supplies a
//! [`DmaAllocator`]; [`HeapDma`] backs it with the global allocator for
//! hosts and simulation.

pub mod heap_dma;

pub use heap_dma::HeapDma;

use core::fmt;
use core::ptr::NonNull;

/// Minimum alignment of every region handed out by a [`DmaAllocator`].
pub const DMA_ALIGN: usize = 8;

/// Device-visible (bus) address of DMA memory.
///
/// The display list hardware takes 32-bit addresses in both its header
/// fields and its address registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DmaAddr(pub u32);

impl DmaAddr {
    /// Address `offset` bytes further on.
    pub const fn offset(self, offset: usize) -> Self {
        DmaAddr(self.0.wrapping_add(offset as u32))
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A block of DMA-coherent memory.
#[derive(Debug)]
pub struct DmaRegion {
    cpu: NonNull<u8>,
    dma: DmaAddr,
    size: usize,
}

impl DmaRegion {
    /// Describe memory returned by a platform allocator.
    ///
    /// # Safety
    ///
    /// - `cpu` must be valid for reads and writes of `size` bytes and
    ///   aligned to [`DMA_ALIGN`]
    /// - `dma` must be the bus address of the same memory
    /// - the memory must stay valid until the region is given back to the
    ///   allocator that produced it
    pub unsafe fn from_raw_parts(cpu: NonNull<u8>, dma: DmaAddr, size: usize) -> Self {
        debug_assert_eq!(cpu.as_ptr() as usize % DMA_ALIGN, 0);
        Self { cpu, dma, size }
    }

    /// CPU-side pointer to the start of the region.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu
    }

    /// Bus address of the start of the region.
    pub fn dma_addr(&self) -> DmaAddr {
        self.dma
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

// The region is plain memory owned by whoever holds the value.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

/// Platform DMA allocator.
///
/// # Safety
///
/// Implementations must only return regions that satisfy the contract of
/// [`DmaRegion::from_raw_parts`]. `free` may sleep; the display list code
/// never calls it with the manager lock held or from the interrupt
/// handler.
pub unsafe trait DmaAllocator: Send + Sync {
    /// Allocate `size` bytes of DMA-coherent memory.
    ///
    /// Returns `None` when the request cannot be satisfied.
    fn alloc(&self, size: usize) -> Option<DmaRegion>;

    /// Return a region to the allocator.
    ///
    /// # Safety
    ///
    /// `region` must have been returned by `alloc` on this allocator and
    /// must not be accessed afterwards, by the CPU or the device.
    unsafe fn free(&self, region: DmaRegion);
}
