//! Interrupt-state bookkeeping and the IRQ-save spinlock.
//!
//! Three tools, from coarse to fine:
//!
//! * [`IrqGuard`] disables interrupts for a scope and restores the previous
//!   state on drop.
//! * [`RawIrqSpin`] is a spinlock whose lock word also records whether
//!   interrupts were enabled when it was acquired; releasing it restores
//!   exactly that state. Wrapped as [`IrqSpinLock`](crate::IrqSpinLock).
//! * [`IrqState`] is the nesting counter for code that needs to toggle the
//!   interrupt flag in both directions and get back to where it started.

use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_hal::IrqControl;

/// RAII guard that disables interrupts on creation and restores them on drop.
pub struct IrqGuard<I: IrqControl> {
    were_enabled: bool,
    _irq: PhantomData<fn() -> I>,
}

impl<I: IrqControl> Default for IrqGuard<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: IrqControl> IrqGuard<I> {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = I::irq_enabled();
        if enabled {
            I::disable_irq();
        }
        Self {
            were_enabled: enabled,
            _irq: PhantomData,
        }
    }
}

impl<I: IrqControl> Drop for IrqGuard<I> {
    fn drop(&mut self) {
        if self.were_enabled {
            I::enable_irq();
        }
    }
}

/// Nesting state for [`IrqState::enable_irqsave`] / [`IrqState::disable_irqsave`].
///
/// Starts at zero. A call that finds the flag the "wrong" way flips it and
/// leaves the count alone; a call that finds it already the way it wants
/// scores a point for its side instead. Matching calls in reverse order
/// therefore restore the outermost state, no matter which side went first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(i8);

impl IrqState {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Current nesting balance; positive means enables are ahead.
    #[must_use]
    pub const fn depth(self) -> i8 {
        self.0
    }

    pub fn enable_irqsave<I: IrqControl>(&mut self) {
        if self.0 == 0 && !I::irq_enabled() {
            I::enable_irq();
        } else {
            self.0 += 1;
        }
    }

    pub fn disable_irqsave<I: IrqControl>(&mut self) {
        if self.0 == 0 && I::irq_enabled() {
            I::disable_irq();
        } else {
            self.0 -= 1;
        }
    }
}

const LOCKED: u32 = 1;
const IRQ_EN: u32 = 1 << 31;

/// Spinlock that saves the interrupt flag in its lock word.
pub struct RawIrqSpin<I> {
    word: AtomicU32,
    _irq: PhantomData<fn() -> I>,
}

impl<I> Default for RawIrqSpin<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> RawIrqSpin<I> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            _irq: PhantomData,
        }
    }

    /// Racy peek, only meaningful as a hint.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) & LOCKED != 0
    }

    /// Whether the current holder had interrupts enabled when it locked.
    #[inline]
    pub fn saved_irq_enabled(&self) -> bool {
        self.word.load(Ordering::Relaxed) & IRQ_EN != 0
    }
}

impl<I: IrqControl> RawIrqSpin<I> {
    /// Disables interrupts, then spins until the lock is taken.
    pub fn lock_irqsave(&self) {
        let saved = Self::capture();
        while self
            .word
            .compare_exchange_weak(0, saved, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.word.load(Ordering::Relaxed) != 0 {
                spin_loop();
            }
        }
    }

    /// Single attempt; interrupts are left untouched on failure.
    pub fn try_lock_irqsave(&self) -> bool {
        let saved = Self::capture();
        if self
            .word
            .compare_exchange(0, saved, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return true;
        }
        if saved & IRQ_EN != 0 {
            I::enable_irq();
        }
        false
    }

    /// Releases the lock and re-enables interrupts if they were enabled at acquisition.
    ///
    /// # Safety
    /// The lock must be held by the caller, on this core.
    pub unsafe fn unlock_irqsave(&self) {
        let word = self.word.swap(0, Ordering::Release);
        debug_assert!(word & LOCKED != 0, "unlock of a free irqsave lock");
        if word & IRQ_EN != 0 {
            I::enable_irq();
        }
    }

    fn capture() -> u32 {
        let enabled = I::irq_enabled();
        I::disable_irq();
        if enabled { LOCKED | IRQ_EN } else { LOCKED }
    }
}

impl<I: IrqControl> RawLock for RawIrqSpin<I> {
    fn raw_lock(&self) {
        self.lock_irqsave();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock_irqsave()
    }
}

impl<I: IrqControl> RawUnlock for RawIrqSpin<I> {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock_irqsave() }
    }
}
