//! Multi-core acknowledgement lists.
//!
//! A coordinator `commit`s the set of cores it expects to hear from and keeps
//! the checklist's lock until it `wait`s (or `release`s). Participants check
//! off with [`Checklist::down`], a lock-free bit clear. Holding the lock is
//! what makes `is_clear`/`is_full` meaningful.

use crate::irq::RawIrqSpin;
use crate::{CoreMask, MASK_WORDS, SpinTimeout};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_hal::IrqControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChecklistError {
    /// Locked by another coordinator, or still waiting for check-ins.
    #[error("checklist is busy")]
    Busy,
}

pub struct Checklist<I> {
    lock: RawIrqSpin<I>,
    bits: [AtomicU64; MASK_WORDS],
    size: AtomicUsize,
}

impl<I> Default for Checklist<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Checklist<I> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: RawIrqSpin::new(),
            bits: [const { AtomicU64::new(0) }; MASK_WORDS],
            size: AtomicUsize::new(0),
        }
    }

    /// Checks `core` off. Safe to call from any core without the lock.
    pub fn down(&self, core: usize) {
        if core < crate::MAX_CORES {
            self.bits[core / 64].fetch_and(!(1 << (core % 64)), Ordering::AcqRel);
        }
    }

    pub fn is_clear(&self) -> bool {
        self.bits.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }

    pub fn is_full(&self) -> bool {
        self.snapshot().is_full()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Cores that did not check off yet.
    pub fn snapshot(&self) -> CoreMask {
        let mut mask = CoreMask::new(self.size.load(Ordering::Acquire));
        for core in 0..mask.size() {
            if self.bits[core / 64].load(Ordering::Acquire) & (1 << (core % 64)) != 0 {
                mask.set(core);
            }
        }
        mask
    }
}

impl<I: IrqControl> Checklist<I> {
    /// Takes the checklist for a new epoch and arms it with `mask`.
    ///
    /// On success the caller holds the checklist's lock (with interrupts
    /// disabled) until [`Checklist::wait`] or [`Checklist::release`].
    ///
    /// # Errors
    /// [`ChecklistError::Busy`] if another coordinator holds the lock or
    /// the previous epoch still has cores outstanding.
    pub fn commit(&self, mask: &CoreMask) -> Result<(), ChecklistError> {
        if self.lock.is_locked() || !self.is_clear() {
            return Err(ChecklistError::Busy);
        }
        if !self.lock.try_lock_irqsave() {
            return Err(ChecklistError::Busy);
        }
        if !self.is_clear() {
            unsafe { self.lock.unlock_irqsave() };
            return Err(ChecklistError::Busy);
        }

        self.size.store(mask.size(), Ordering::Relaxed);
        for (word, &bits) in self.bits.iter().zip(mask.words()) {
            word.store(bits, Ordering::Release);
        }
        Ok(())
    }

    /// Retries [`Checklist::commit`] until the checklist is ours.
    pub fn commit_wait(&self, mask: &CoreMask) {
        while self.commit(mask).is_err() {
            spin_loop();
        }
    }

    /// Commits `mask` and immediately gives up the lock; nobody waits for
    /// the check-ins, but the checklist stays busy until they all happened.
    ///
    /// # Errors
    /// See [`Checklist::commit`].
    pub fn commit_nowait(&self, mask: &CoreMask) -> Result<(), ChecklistError> {
        self.commit(mask)?;
        self.release();
        Ok(())
    }

    /// Spins until every committed core checked off, then releases the lock.
    pub fn wait(&self) {
        while !self.is_clear() {
            spin_loop();
        }
        self.release();
    }

    /// Like [`Checklist::wait`] but gives up after `spins` iterations, in
    /// which case the lock stays held.
    ///
    /// # Errors
    /// [`SpinTimeout`] if cores are still outstanding.
    pub fn wait_bounded(&self, spins: u64) -> Result<(), SpinTimeout> {
        for _ in 0..spins {
            if self.is_clear() {
                self.release();
                return Ok(());
            }
            spin_loop();
        }
        if self.is_clear() {
            self.release();
            return Ok(());
        }
        log::warn!(
            "checklist still waiting on {} cores after {spins} spins",
            self.snapshot().count()
        );
        Err(SpinTimeout { spins })
    }

    /// Gives up the lock taken by a successful commit.
    pub fn release(&self) {
        debug_assert!(self.lock.is_locked(), "release of an uncommitted checklist");
        // SAFETY: a successful commit on this core holds the lock.
        unsafe { self.lock.unlock_irqsave() };
    }
}
