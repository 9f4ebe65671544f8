//! Display list bodies (entry buffers).

use core::fmt;
use core::ptr::NonNull;

use alloc::sync::Arc;

use crate::errors::{DlError, DlResult};
use crate::mem::{DmaAddr, DmaAllocator, DmaRegion};

/// Size in bytes of one register write as stored in a body.
pub const DL_ENTRY_SIZE: usize = core::mem::size_of::<DlEntry>();

/// One register write, in the layout the device reads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlEntry {
    /// Register address
    pub addr: u32,
    /// Value to write
    pub data: u32,
}

/// A display list body: register writes backed by DMA memory.
///
/// The body owns its DMA region and frees it when dropped. Dropping may
/// sleep in the platform allocator, so bodies that leave a display list
/// in interrupt context are handed to the garbage collector instead.
pub struct DlBody {
    region: DmaRegion,
    dma: Arc<dyn DmaAllocator>,
    /// Maximum number of entries
    capacity: usize,
    /// Entries written since the last reset
    num_entries: usize,
}

impl DlBody {
    /// Allocate a standalone body able to hold `num_entries` writes.
    ///
    /// The body belongs to the caller until it is attached to a list with
    /// [`DlList::add_fragment`](crate::dl::DlList::add_fragment).
    pub fn new(dma: &Arc<dyn DmaAllocator>, num_entries: usize) -> DlResult<Self> {
        Self::allocate(dma, num_entries, 0)
    }

    /// Allocate room for `capacity` entries followed by `extra` bytes.
    pub(crate) fn allocate(
        dma: &Arc<dyn DmaAllocator>,
        capacity: usize,
        extra: usize,
    ) -> DlResult<Self> {
        let size = capacity * DL_ENTRY_SIZE + extra;
        let region = dma.alloc(size).ok_or(DlError::OutOfMemory { size })?;

        Ok(Self {
            region,
            dma: Arc::clone(dma),
            capacity,
            num_entries: 0,
        })
    }

    /// Append a register write.
    ///
    /// Writing past the capacity is a caller bug: it is reported and the
    /// write is discarded.
    #[inline]
    pub fn write(&mut self, addr: u32, data: u32) {
        if self.num_entries >= self.capacity {
            log::error!(
                "display list body {} full ({} entries), dropping write {:#06x}",
                self.dma_addr(),
                self.capacity,
                addr
            );
            debug_assert!(false, "display list body overflow");
            return;
        }

        // SAFETY: num_entries < capacity and the region holds capacity entries.
        unsafe {
            self.entries_ptr()
                .as_ptr()
                .add(self.num_entries)
                .write_volatile(DlEntry { addr, data });
        }
        self.num_entries += 1;
    }

    /// Forget all written entries. Memory is not cleared.
    pub fn reset(&mut self) {
        self.num_entries = 0;
    }

    /// Free the body and its DMA memory.
    ///
    /// Only needed for bodies that were never attached to a list. Must not
    /// be called from interrupt context.
    pub fn release(self) {
        drop(self);
    }

    /// Number of entries written.
    pub fn len(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bus address of the first entry.
    pub fn dma_addr(&self) -> DmaAddr {
        self.region.dma_addr()
    }

    /// Bytes of entries the device has to process.
    pub fn size_bytes(&self) -> u32 {
        (self.num_entries * DL_ENTRY_SIZE) as u32
    }

    /// Read back entry `index`.
    pub fn entry(&self, index: usize) -> Option<DlEntry> {
        if index >= self.num_entries {
            return None;
        }

        // SAFETY: index < num_entries <= capacity.
        Some(unsafe { self.entries_ptr().as_ptr().add(index).read_volatile() })
    }

    /// Iterate over the written entries.
    pub fn entries(&self) -> impl Iterator<Item = DlEntry> + '_ {
        (0..self.num_entries).filter_map(move |i| self.entry(i))
    }

    /// CPU pointer to the bytes that follow the entry array.
    pub(crate) fn extra_ptr(&self) -> NonNull<u8> {
        // SAFETY: the region is capacity * DL_ENTRY_SIZE + extra bytes long.
        unsafe {
            NonNull::new_unchecked(
                self.region.cpu_ptr().as_ptr().add(self.capacity * DL_ENTRY_SIZE),
            )
        }
    }

    /// Bus address of the bytes that follow the entry array.
    pub(crate) fn extra_dma(&self) -> DmaAddr {
        self.region.dma_addr().offset(self.capacity * DL_ENTRY_SIZE)
    }

    fn entries_ptr(&self) -> NonNull<DlEntry> {
        self.region.cpu_ptr().cast()
    }
}

impl Drop for DlBody {
    fn drop(&mut self) {
        // SAFETY: the region is read out exactly once, here, and never
        // touched again; it came from self.dma.
        unsafe {
            let region = core::ptr::read(&self.region);
            self.dma.free(region);
        }
    }
}

impl fmt::Debug for DlBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlBody")
            .field("dma", &self.dma_addr())
            .field("capacity", &self.capacity)
            .field("num_entries", &self.num_entries)
            .finish()
    }
}
