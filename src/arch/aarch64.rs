//! AArch64 (ARM64) interrupt masking.
//!
//! Only the IRQ bit of DAIF is touched. FIQ, SError and debug exceptions
//! stay as the platform configured them.

use super::Arch;
use core::arch::asm;

/// DAIF.I, the IRQ mask bit as read through `mrs daif`.
const DAIF_IRQ: u64 = 1 << 7;

pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    fn enable_interrupts() {
        unsafe {
            asm!(
                "msr daifclr, #2",
                options(nomem, nostack)
            );
        }
    }

    fn disable_interrupts() {
        unsafe {
            asm!(
                "msr daifset, #2",
                options(nomem, nostack)
            );
        }
    }

    fn interrupts_enabled() -> bool {
        let daif: u64;
        unsafe {
            asm!(
                "mrs {daif}, daif",
                daif = out(reg) daif,
                options(nostack, readonly)
            );
        }
        (daif & DAIF_IRQ) == 0
    }
}
