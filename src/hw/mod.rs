//! Hardware seam of the display list engine.
//!
//! The manager never touches registers directly. It asks a [`DlHardware`]
//! three things: whether the last program is still waiting to be taken by
//! the device, to program a new list, and to set the display list unit up
//! once. [`DlRegisters`] implements those on top of plain 32-bit register
//! access; tests substitute a scripted implementation to open and close
//! the commit/interrupt race window at will.

pub mod regs;

pub use regs::{DlRegisterMap, DlRegisters};

use crate::mem::DmaAddr;

/// 32-bit register access provided by the platform.
pub trait RegisterIo: Send + Sync {
    /// Read the register at byte offset `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Write `value` to the register at byte offset `addr`.
    fn write(&self, addr: u32, value: u32);
}

/// How the device locates display list bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// The device reads a header in memory that describes up to eight
    /// bodies and links to the next header. Fragments and chains work.
    Header,
    /// The device is pointed at a single body through registers.
    Headerless,
}

/// What the device does after finishing a display list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclingMode {
    /// Stop and wait to be restarted (mem-to-mem pipelines).
    SingleShot,
    /// Reload the current list every frame until a new one is programmed
    /// (display pipelines).
    Continuous,
}

/// Which display list unit a manager drives, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlChannel {
    /// Pipeline output index
    pub index: u32,
    /// Addressing mode of this output
    pub mode: AddressingMode,
}

/// A display list as the device is told about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwProgram {
    /// Header mode: address of the list header
    Header { header: DmaAddr },
    /// Headerless mode: address and byte size of the single body
    Headerless { body: DmaAddr, size: u32 },
}

/// Display list hardware capability.
///
/// Methods are called with the manager lock held, possibly from the frame
/// end interrupt handler, and must not block.
pub trait DlHardware: Send + Sync {
    /// Whether the device has yet to take the last program on `channel`.
    ///
    /// While this is true a new program would race with the device.
    fn update_pending(&self, channel: DlChannel) -> bool;

    /// Point the device at a display list.
    fn enqueue(&self, channel: DlChannel, program: HwProgram);

    /// One-time setup of the display list unit.
    fn setup(&self, cycling: CyclingMode);
}
