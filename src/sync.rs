//! Interrupt-safe spin lock.
//!
//! [`IrqMutex`] is the lock the display list manager shares with its frame
//! end interrupt handler. Taking it masks local interrupts first and then
//! spins; dropping the guard unlocks first and then restores the previous
//! interrupt state. Nested use from within the handler (where interrupts
//! are already masked) leaves them masked on release.

use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::arch::Arch;

/// Spin mutex that keeps local interrupts masked while held.
pub struct IrqMutex<T, A: Arch> {
    inner: spin::Mutex<T>,
    _arch: PhantomData<fn() -> A>,
}

/// Guard returned by [`IrqMutex::lock`].
pub struct IrqMutexGuard<'a, T, A: Arch> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    restore_interrupts: bool,
    _arch: PhantomData<fn() -> A>,
}

impl<T, A: Arch> IrqMutex<T, A> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
            _arch: PhantomData,
        }
    }

    /// Mask local interrupts and acquire the lock.
    pub fn lock(&self) -> IrqMutexGuard<'_, T, A> {
        let restore_interrupts = A::interrupts_enabled();
        A::disable_interrupts();

        IrqMutexGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            restore_interrupts,
            _arch: PhantomData,
        }
    }

    /// Consume the mutex and return the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T, A: Arch> Deref for IrqMutexGuard<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, A: Arch> DerefMut for IrqMutexGuard<'_, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, A: Arch> Drop for IrqMutexGuard<'_, T, A> {
    fn drop(&mut self) {
        // Unlock before unmasking, or the handler may spin on our lock.
        unsafe { ManuallyDrop::drop(&mut self.guard) };

        if self.restore_interrupts {
            A::enable_interrupts();
        }
    }
}
