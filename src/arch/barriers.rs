//! Memory barriers for CPU writes that a DMA master will read.
//!
//! Display list bodies and headers live in write-combined memory. Every
//! store to them must be visible to the device before the register write
//! that points the device at them.

pub struct MemoryBarriers;

impl MemoryBarriers {
    /// Order all prior memory writes before any later device register write.
    #[inline(always)]
    pub fn dma_write_barrier() {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("dsb st", options(nostack, preserves_flags));
        }

        #[cfg(not(target_arch = "aarch64"))]
        core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
    }
}
