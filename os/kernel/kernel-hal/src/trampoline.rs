//! Shared state between the boot core and cores executing the startup trampoline.
//!
//! The header sits at [`TrampolineHeader::OFFSET`] inside the trampoline page.
//! Its layout is shared with the real-mode startup code, so fields only ever
//! grow at the end.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Physical address of the page the startup code is copied to.
///
/// The Startup-IPI vector names the page number, i.e. `TRAMPOLINE_PAGE >> 12`.
pub const TRAMPOLINE_PAGE: u64 = 0x1000;

/// Entry point a freshly started core calls while holding the boot lock.
///
/// Receives [`TrampolineHeader::context`] and returns the top of the core's
/// own kernel stack, which the trampoline switches to before releasing the
/// shared stack.
pub type ApEntry = extern "C" fn(context: *const ()) -> u64;

#[repr(C)]
#[derive(Debug, Default)]
pub struct TrampolineHeader {
    /// Serializes cores through the shared stack. Nonzero while held.
    pub boot_lock: AtomicU32,
    /// Cores that entered the trampoline but did not yet leave the shared stack.
    pub semaphore: AtomicU32,
    /// Top of the shared transient stack.
    pub stack_top: AtomicU64,
    entry: AtomicU64,
    context: AtomicU64,
    /// Physical address of the boot page tables (bare metal only).
    pub page_table: AtomicU64,
}

impl TrampolineHeader {
    /// Byte offset of the header within the trampoline page.
    pub const OFFSET: usize = 8;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            boot_lock: AtomicU32::new(0),
            semaphore: AtomicU32::new(0),
            stack_top: AtomicU64::new(0),
            entry: AtomicU64::new(0),
            context: AtomicU64::new(0),
            page_table: AtomicU64::new(0),
        }
    }

    /// Publishes the entry point and its context argument.
    pub fn set_entry(&self, entry: ApEntry, context: *const ()) {
        self.context.store(context as u64, Ordering::Relaxed);
        self.entry.store(entry as usize as u64, Ordering::Release);
    }

    /// The entry point published by [`TrampolineHeader::set_entry`], if any.
    #[must_use]
    pub fn entry(&self) -> Option<ApEntry> {
        let raw = self.entry.load(Ordering::Acquire);
        if raw == 0 {
            return None;
        }
        // SAFETY: the only nonzero value ever stored is an `ApEntry`.
        #[allow(clippy::cast_possible_truncation)]
        Some(unsafe { core::mem::transmute::<usize, ApEntry>(raw as usize) })
    }

    #[must_use]
    pub fn context(&self) -> *const () {
        self.context.load(Ordering::Acquire) as *const ()
    }

    /// Spins until the boot lock is acquired.
    pub fn acquire_boot_lock(&self) {
        loop {
            if self.try_acquire_boot_lock() {
                return;
            }
            while self.boot_lock.load(Ordering::Relaxed) != 0 {
                spin_loop();
            }
        }
    }

    #[must_use]
    pub fn try_acquire_boot_lock(&self) -> bool {
        self.boot_lock.swap(1, Ordering::Acquire) == 0
    }

    pub fn release_boot_lock(&self) {
        self.boot_lock.store(0, Ordering::Release);
    }

    /// Cores currently between trampoline entry and their switch to a private stack.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.semaphore.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn stack_top(context: *const ()) -> u64 {
        context as u64 + 0x1000
    }

    #[test]
    fn header_layout_matches_startup_code() {
        assert_eq!(core::mem::offset_of!(TrampolineHeader, boot_lock), 0);
        assert_eq!(core::mem::offset_of!(TrampolineHeader, semaphore), 4);
        assert_eq!(core::mem::offset_of!(TrampolineHeader, stack_top), 8);
        assert_eq!(core::mem::offset_of!(TrampolineHeader, entry), 16);
        assert_eq!(core::mem::offset_of!(TrampolineHeader, context), 24);
        assert_eq!(core::mem::offset_of!(TrampolineHeader, page_table), 32);
    }

    #[test]
    fn entry_round_trips_through_the_header() {
        let header = TrampolineHeader::new();
        assert!(header.entry().is_none());

        header.set_entry(stack_top, 0x2000 as *const ());
        let entry = header.entry().expect("entry published");
        assert_eq!(entry(header.context()), 0x3000);
    }

    #[test]
    fn boot_lock_is_exclusive() {
        let header = TrampolineHeader::new();
        assert!(header.try_acquire_boot_lock());
        assert!(!header.try_acquire_boot_lock());
        header.release_boot_lock();
        header.acquire_boot_lock();
        assert_eq!(header.boot_lock.load(Ordering::Relaxed), 1);
    }
}
