use crate::SpinLock;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A write after [`FreezeCell::freeze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cell is frozen")]
pub struct AlreadyFrozen;

/// Boot-phase singleton: mutable through [`FreezeCell::update`] until
/// frozen, then shared read-only without any locking.
pub struct FreezeCell<T> {
    writer: SpinLock<bool>,
    frozen: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: writes are serialized by `writer` and end before `frozen` is published.
unsafe impl<T: Send + Sync> Sync for FreezeCell<T> {}

impl<T> FreezeCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            writer: SpinLock::<bool>::new(false),
            frozen: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `f` on the value while the cell is still writable.
    ///
    /// # Errors
    /// [`AlreadyFrozen`] once [`FreezeCell::freeze`] happened.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, AlreadyFrozen> {
        let frozen = self.writer.lock();
        if *frozen {
            return Err(AlreadyFrozen);
        }
        // SAFETY: not frozen, so no shared reference exists, and `writer` excludes other writers.
        Ok(f(unsafe { &mut *self.value.get() }))
    }

    /// Ends the write phase and returns the now immutable value.
    pub fn freeze(&self) -> &T {
        let mut frozen = self.writer.lock();
        *frozen = true;
        self.frozen.store(true, Ordering::Release);
        drop(frozen);
        // SAFETY: frozen; no writer can run any more.
        unsafe { &*self.value.get() }
    }

    /// The value, once frozen.
    pub fn get(&self) -> Option<&T> {
        if self.frozen.load(Ordering::Acquire) {
            // SAFETY: frozen; no writer can run any more.
            Some(unsafe { &*self.value.get() })
        } else {
            None
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}
