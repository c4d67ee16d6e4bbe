use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use kernel_hal::CycleCounter;

/// Alarm callback. Runs without the chain lock held, in the context that
/// triggered the chain (usually the timer interrupt).
pub type AlarmFn = fn(&'static AlarmWaiter);

pub(crate) struct Links {
    pub(crate) prev: *const AlarmWaiter,
    pub(crate) next: *const AlarmWaiter,
}

/// One pending piece of deferred work.
pub struct AlarmWaiter {
    wake_up_time: AtomicU64,
    func: AlarmFn,
    data: AtomicUsize,
    on_chain: AtomicBool,
    // Only touched under the lock of the chain the waiter is on.
    links: UnsafeCell<Links>,
}

// Safety: `links` is only accessed under the owning chain's lock.
unsafe impl Sync for AlarmWaiter {}

impl AlarmWaiter {
    /// A waiter with no deadline yet (`u64::MAX`).
    #[must_use]
    pub const fn new(func: AlarmFn, data: usize) -> Self {
        Self {
            wake_up_time: AtomicU64::new(u64::MAX),
            func,
            data: AtomicUsize::new(data),
            on_chain: AtomicBool::new(false),
            links: UnsafeCell::new(Links {
                prev: ptr::null(),
                next: ptr::null(),
            }),
        }
    }

    pub fn wake_up_time(&self) -> u64 {
        self.wake_up_time.load(Ordering::Acquire)
    }

    /// Sets the absolute deadline. Only while the waiter is not on a chain.
    pub fn set_abs(&self, time: u64) {
        debug_assert!(!self.is_pending(), "deadline changed on a pending waiter");
        self.wake_up_time.store(time, Ordering::Release);
    }

    /// Sets the deadline `usec` microseconds from now.
    pub fn set_rel(&self, clock: &impl CycleCounter, usec: u64) {
        let now = clock.read_tsc();
        self.set_abs(now.saturating_add(usec_to_cycles(clock, usec)));
    }

    /// Pushes the previous deadline back by `usec` microseconds, for
    /// drift-free periodic alarms.
    pub fn set_inc(&self, clock: &impl CycleCounter, usec: u64) {
        let base = self.wake_up_time();
        self.set_abs(base.saturating_add(usec_to_cycles(clock, usec)));
    }

    pub fn data(&self) -> usize {
        self.data.load(Ordering::Acquire)
    }

    pub fn set_data(&self, data: usize) {
        self.data.store(data, Ordering::Release);
    }

    /// Whether the waiter sits on a chain and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.on_chain.load(Ordering::Acquire)
    }

    pub(crate) fn fire(&'static self) {
        (self.func)(self);
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        self.on_chain.store(pending, Ordering::Release);
    }

    /// # Safety
    /// The caller holds the lock of the chain this waiter is (being put) on.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn links(&self) -> &mut Links {
        unsafe { &mut *self.links.get() }
    }
}

impl core::fmt::Debug for AlarmWaiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlarmWaiter")
            .field("wake_up_time", &self.wake_up_time())
            .field("data", &self.data())
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

fn usec_to_cycles(clock: &impl CycleCounter, usec: u64) -> u64 {
    usec.saturating_mul(clock.tsc_freq() / 1_000_000)
}
