use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU64, Ordering};

/// Spinning condition variable.
///
/// A waiter samples the sequence number while still holding the lock, so a
/// notification issued after the waiter unlocked is never missed.
pub struct SpinCondvar {
    seq: AtomicU64,
}

impl Default for SpinCondvar {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinCondvar {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
        }
    }

    /// Unlocks `guard`, spins until notified, and re-locks.
    pub fn wait<'a, T, R>(&self, guard: MutexGuard<'a, T, R>) -> MutexGuard<'a, T, R>
    where
        R: RawLock + RawUnlock,
    {
        let mutex: &'a Mutex<T, R> = MutexGuard::mutex(&guard);
        let seen = self.seq.load(Ordering::Acquire);
        drop(guard);
        while self.seq.load(Ordering::Acquire) == seen {
            spin_loop();
        }
        mutex.lock()
    }

    /// Re-locks and re-checks until `done` holds.
    pub fn wait_until<'a, T, R>(
        &self,
        mut guard: MutexGuard<'a, T, R>,
        mut done: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T, R>
    where
        R: RawLock + RawUnlock,
    {
        while !done(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    pub fn notify_all(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
    }
}
