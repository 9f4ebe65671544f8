//! Architecture abstraction for interrupt masking.
//!
//! The display list manager shares its lock with the frame end interrupt
//! handler. On the CPU that takes the lock, local interrupts must be masked
//! for as long as the lock is held, otherwise the handler could spin on a
//! lock its own CPU already owns.

/// Architecture abstraction trait.
///
/// Implemented once per supported CPU architecture. All methods act on the
/// current CPU only.
pub trait Arch {
    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    ///
    /// Returns `true` if interrupts are enabled, `false` otherwise.
    fn interrupts_enabled() -> bool;
}

/// A no-op architecture implementation for hosts and tests.
///
/// Interrupts are simulated by plain calls on other threads, so there is
/// nothing to mask.
pub struct NoOpArch;

impl Arch for NoOpArch {
    fn enable_interrupts() {}

    fn disable_interrupts() {}

    fn interrupts_enabled() -> bool {
        true
    }
}

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

pub mod barriers;

#[cfg(target_arch = "aarch64")]
pub use aarch64::Aarch64Arch as DefaultArch;

#[cfg(not(target_arch = "aarch64"))]
pub use NoOpArch as DefaultArch;
