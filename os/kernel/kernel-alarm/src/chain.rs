use crate::TimerSource;
use crate::waiter::AlarmWaiter;
use core::ptr;
use kernel_hal::IrqControl;
use kernel_sync::{IrqSpinLock, MutexGuard, RawIrqSpin, SpinCondvar};

struct Chain {
    head: *const AlarmWaiter,
    tail: *const AlarmWaiter,
    earliest: u64,
    latest: u64,
    /// Waiter whose callback is executing, null if none.
    running: *const AlarmWaiter,
}

// Safety: the pointers all come from `&'static AlarmWaiter`.
unsafe impl Send for Chain {}

impl Chain {
    const fn new() -> Self {
        Self {
            head: ptr::null(),
            tail: ptr::null(),
            earliest: u64::MAX,
            latest: 0,
            running: ptr::null(),
        }
    }

    /// Sorted insert after every waiter with an equal deadline. Returns
    /// whether `waiter` became the head.
    fn insert(&mut self, waiter: &'static AlarmWaiter) -> bool {
        let time = waiter.wake_up_time();
        let new: *const AlarmWaiter = waiter;

        // Fast path for the common "later than everything" case.
        let mut next = if !self.tail.is_null() && time >= self.latest {
            ptr::null()
        } else {
            self.head
        };
        while let Some(node) = unsafe { next.as_ref() } {
            if node.wake_up_time() > time {
                break;
            }
            next = unsafe { node.links() }.next;
        }

        let prev = match unsafe { next.as_ref() } {
            Some(node) => unsafe { node.links() }.prev,
            None => self.tail,
        };
        {
            let links = unsafe { waiter.links() };
            links.prev = prev;
            links.next = next;
        }
        match unsafe { prev.as_ref() } {
            Some(node) => unsafe { node.links() }.next = new,
            None => self.head = new,
        }
        match unsafe { next.as_ref() } {
            Some(node) => unsafe { node.links() }.prev = new,
            None => self.tail = new,
        }
        waiter.set_pending(true);
        self.reset_times();
        ptr::eq(self.head, new)
    }

    /// Returns whether `waiter` was the head.
    fn unlink(&mut self, waiter: &AlarmWaiter) -> bool {
        let was_head = ptr::eq(self.head, waiter);
        let links = unsafe { waiter.links() };
        match unsafe { links.prev.as_ref() } {
            Some(node) => unsafe { node.links() }.next = links.next,
            None => self.head = links.next,
        }
        match unsafe { links.next.as_ref() } {
            Some(node) => unsafe { node.links() }.prev = links.prev,
            None => self.tail = links.prev,
        }
        links.prev = ptr::null();
        links.next = ptr::null();
        waiter.set_pending(false);
        self.reset_times();
        was_head
    }

    fn reset_times(&mut self) {
        match (unsafe { self.head.as_ref() }, unsafe { self.tail.as_ref() }) {
            (Some(head), Some(tail)) => {
                self.earliest = head.wake_up_time();
                self.latest = tail.wake_up_time();
            }
            _ => {
                self.earliest = u64::MAX;
                self.latest = 0;
            }
        }
    }

    fn first_due(&self, now: u64) -> Option<&'static AlarmWaiter> {
        let head = unsafe { self.head.as_ref() }?;
        (head.wake_up_time() <= now).then_some(head)
    }

    fn is_running(&self, waiter: &AlarmWaiter) -> bool {
        ptr::eq(self.running, waiter)
    }
}

/// Deadline-ordered chain of alarms driving one hardware timer.
///
/// Usually one per core, fed by that core's timer interrupt. The lock
/// disables interrupts, so the chain may be touched from any context.
pub struct TimerChain<S, I> {
    chain: IrqSpinLock<Chain, I>,
    fired: SpinCondvar,
    source: S,
}

impl<S, I> TimerChain<S, I> {
    pub const fn new(source: S) -> Self {
        Self {
            chain: IrqSpinLock::new(Chain::new()),
            fired: SpinCondvar::new(),
            source,
        }
    }

    pub const fn source(&self) -> &S {
        &self.source
    }
}

type ChainGuard<'a, I> = MutexGuard<'a, Chain, RawIrqSpin<I>>;

impl<S: TimerSource, I: IrqControl> TimerChain<S, I> {
    /// Puts `waiter` on the chain; it fires once its deadline passed.
    ///
    /// # Panics
    /// If `waiter` is already pending on a chain.
    pub fn set_alarm(&self, waiter: &'static AlarmWaiter) {
        let mut chain = self.chain.lock();
        assert!(!waiter.is_pending(), "alarm waiter set twice");
        if chain.insert(waiter) {
            self.rearm(&chain);
        }
    }

    /// Takes `waiter` off the chain.
    ///
    /// Returns `true` if it was pending and will not fire. Returns `false`
    /// if it already fired or was never set; if its callback is executing
    /// right now, this first waits for the callback to return. A callback
    /// must therefore never unset its own waiter.
    pub fn unset_alarm(&self, waiter: &'static AlarmWaiter) -> bool {
        let mut chain = self.chain.lock();
        if waiter.is_pending() {
            if chain.unlink(waiter) {
                self.rearm(&chain);
            }
            return true;
        }
        drop(self.wait_not_running(chain, waiter));
        false
    }

    /// Moves `waiter` to absolute deadline `time` without a window in which
    /// it could fire at its old deadline.
    ///
    /// Never waits for a running callback, so a callback may re-arm its own
    /// waiter this way.
    pub fn reset_alarm_abs(&self, waiter: &'static AlarmWaiter, time: u64) {
        let mut chain = self.chain.lock();
        let mut rearm = false;
        if waiter.is_pending() {
            rearm = chain.unlink(waiter);
        }
        waiter.set_abs(time);
        rearm |= chain.insert(waiter);
        if rearm {
            self.rearm(&chain);
        }
    }

    /// Fires every waiter whose deadline passed, earliest first, then arms
    /// the timer for whatever is left.
    ///
    /// Callbacks run without the chain lock and may set alarms, including
    /// their own.
    pub fn trigger(&self) {
        let now = self.source.now();
        let mut chain = self.chain.lock();
        while let Some(waiter) = chain.first_due(now) {
            chain.unlink(waiter);
            chain.running = waiter;
            drop(chain);

            log::trace!("alarm due at {} fired at {now}", waiter.wake_up_time());
            waiter.fire();

            chain = self.chain.lock();
            chain.running = ptr::null();
            self.fired.notify_all();
        }
        self.rearm(&chain);
    }

    /// Deadline of the first waiter, `u64::MAX` when empty.
    pub fn earliest(&self) -> u64 {
        self.chain.lock().earliest
    }

    /// Deadline of the last waiter, `0` when empty.
    pub fn latest(&self) -> u64 {
        self.chain.lock().latest
    }

    pub fn is_empty(&self) -> bool {
        self.chain.lock().head.is_null()
    }

    pub fn len(&self) -> usize {
        let chain = self.chain.lock();
        let mut count = 0;
        let mut node = chain.head;
        while let Some(waiter) = unsafe { node.as_ref() } {
            count += 1;
            node = unsafe { waiter.links() }.next;
        }
        count
    }

    /// Logs the chain, one line per waiter.
    pub fn dump(&self) {
        let chain = self.chain.lock();
        log::info!(
            "chain is{} empty, earliest {:#x}, latest {:#x}",
            if chain.head.is_null() { "" } else { " not" },
            chain.earliest,
            chain.latest
        );
        let mut node = chain.head;
        while let Some(waiter) = unsafe { node.as_ref() } {
            log::info!(
                "  waiter {:p}, time {:#x}, data {:#x}",
                waiter,
                waiter.wake_up_time(),
                waiter.data()
            );
            node = unsafe { waiter.links() }.next;
        }
    }

    fn wait_not_running<'a>(
        &self,
        chain: ChainGuard<'a, I>,
        waiter: &AlarmWaiter,
    ) -> ChainGuard<'a, I> {
        self.fired.wait_until(chain, |chain| !chain.is_running(waiter))
    }

    fn rearm(&self, chain: &Chain) {
        if chain.head.is_null() {
            self.source.disarm();
        } else {
            self.source.arm(chain.earliest);
        }
    }
}
