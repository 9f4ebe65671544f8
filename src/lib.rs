#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! Double-buffered display list engine for DMA-fed video hardware.
//!
//! A display list is a batch of register writes the device fetches by DMA
//! and applies at frame boundaries. This crate prepares those batches,
//! hands them to the device and tracks them until the device is done,
//! racing safely against the frame end interrupt.
//!
//! # Target Hardware
//!
//! - **Device**: Renesas R-Car VSP1 display list unit (register map in
//!   [`hw::DlRegisterMap::VSP1`]); other layouts through a custom map or a
//!   custom [`DlHardware`]
//! - **Environment**: `no_std` + `alloc`, bare-metal or inside a kernel
//!
//! # Features
//!
//! - `std`: implement `std::error::Error` for [`DlError`]
//!
//! # Quick Start
//!
//! ```ignore
//! use vsp_dl::{DlManager, DlConfig, DlRegisters, PollingWorkQueue};
//!
//! let gc = Arc::new(PollingWorkQueue::new());
//! let dlm: DlManager<_> = DlManager::builder()
//!     .config(DlConfig::for_pipeline(1, false))
//!     .build(DlRegisters::new(mmio), dma, gc.clone())?;
//!
//! dlm.setup_hardware();
//!
//! let mut dl = dlm.get().ok_or(Busy)?;
//! dl.write(RPF_SRCM_ADDR_Y, frame.addr);
//! dlm.commit(dl, false)?;
//!
//! // frame end interrupt handler
//! let flags = dlm.on_frame_end_interrupt();
//!
//! // worker thread
//! gc.run_pending();
//! ```
//!
//! # Architecture
//!
//! - [`DlBody`]: register writes in DMA memory
//! - [`DlList`]: a primary body, fragments and chained lists, described
//!   to the device by a [`DlHeader`] in header mode
//! - [`DlManager`]: list pool and active/queued/pending pipeline slots
//! - [`gc`]: deferred freeing of fragments outside interrupt context

// Core modules
pub mod arch;
pub mod dl;
pub mod errors;
pub mod gc;
pub mod hw;
pub mod manager;
pub mod mem;
pub mod sync;

#[cfg(test)]
mod tests;

#[cfg(any(test, feature = "std"))]
extern crate std;

extern crate alloc;

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, DefaultArch, NoOpArch};

// Display lists
pub use dl::{DlBody, DlEntry, DlHeader, DlList, DlListId, HeaderFlags, DL_NUM_ENTRIES};

// Manager
pub use manager::{
    DlConfig, DlManager, DlManagerBuilder, DlStatsSnapshot, FrameEndFlags, PipelineSnapshot,
};

// Hardware
pub use hw::{AddressingMode, CyclingMode, DlHardware, DlRegisters, RegisterIo};

// Memory management
pub use mem::{DmaAddr, DmaAllocator, DmaRegion, HeapDma};

// Garbage collection
pub use gc::{GcWork, PollingWorkQueue, WorkQueue};

// Errors
pub use errors::{DlError, DlResult, Rejected};
