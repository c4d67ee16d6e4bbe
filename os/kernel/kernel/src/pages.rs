use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_hal::PAGE_SIZE;

/// Bump allocation over a fixed address range. Ranges are never reused.
pub struct PagePool {
    next: AtomicUsize,
    end: usize,
}

impl PagePool {
    /// A pool over `[base, base + len)`, starting at the first page boundary.
    #[must_use]
    pub const fn new(base: usize, len: usize) -> Self {
        Self {
            next: AtomicUsize::new(base.next_multiple_of(PAGE_SIZE)),
            end: base + len,
        }
    }

    /// Reserves `size` bytes aligned to `align`, a power of two.
    pub fn reserve(&self, size: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        let mut next = self.next.load(Ordering::Relaxed);
        loop {
            let start = next.checked_next_multiple_of(align)?;
            let stop = start.checked_add(size)?;
            if stop > self.end {
                log::warn!("boot pool exhausted: {size} bytes requested");
                return None;
            }
            match self
                .next
                .compare_exchange_weak(next, stop, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(start),
                Err(seen) => next = seen,
            }
        }
    }

    /// Reserves `count` contiguous pages.
    pub fn pages(&self, count: usize) -> Option<usize> {
        self.reserve(count.checked_mul(PAGE_SIZE)?, PAGE_SIZE)
    }

    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.next.load(Ordering::Relaxed))
    }
}
