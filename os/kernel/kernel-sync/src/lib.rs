//! # Kernel synchronization primitives
//!
//! Everything here spins; nothing ever yields. The interrupt-aware pieces
//! are generic over [`kernel_hal::IrqControl`] so the same code runs on bare
//! metal and on the simulated platform.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod barrier;
mod checklist;
mod condvar;
mod freeze_cell;
mod hash_lock;
pub mod irq;
mod mask;
mod mutex;
mod poke;
mod raw_spin;
mod sync_once_cell;

pub use barrier::Barrier;
pub use checklist::{Checklist, ChecklistError};
pub use condvar::SpinCondvar;
pub use freeze_cell::{AlreadyFrozen, FreezeCell};
pub use hash_lock::{HashLock, HashLockGuard};
pub use irq::{IrqGuard, IrqState, RawIrqSpin};
pub use mask::{CoreMask, MASK_WORDS};
pub use mutex::{Mutex, MutexGuard};
pub use poke::Poke;
pub use raw_spin::RawSpin;
pub use sync_once_cell::SyncOnceCell;

/// Upper bound on the number of cores any structure in the kernel tracks.
pub const MAX_CORES: usize = 64;

/// Plain test-and-test-and-set spinlock.
pub type SpinLock<T> = Mutex<T, RawSpin>;

/// Spinlock that disables interrupts while held and restores the state
/// observed at acquisition when released.
pub type IrqSpinLock<T, I> = Mutex<T, RawIrqSpin<I>>;

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The lock must be held by the caller.
    unsafe fn raw_unlock(&self);
}

/// A bounded spin gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("condition not met after {spins} spins")]
pub struct SpinTimeout {
    pub spins: u64,
}
