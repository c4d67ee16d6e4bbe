use crate::IrqSpinLock;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering, fence};
use kernel_hal::IrqControl;

struct Count {
    init: usize,
    current: usize,
}

/// Reusable rendezvous for a fixed number of participants.
///
/// Waiters spin on a one-bit generation flag, never on the count, so a fast
/// participant re-entering the next round cannot be mistaken for a late one
/// of the current round.
pub struct Barrier<I> {
    count: IrqSpinLock<Count, I>,
    ready: AtomicBool,
}

impl<I> Barrier<I> {
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self {
            count: IrqSpinLock::<Count, I>::new(Count {
                init: count,
                current: count,
            }),
            ready: AtomicBool::new(false),
        }
    }

    /// The generation flag; flips once per completed round.
    pub fn generation(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl<I: IrqControl> Barrier<I> {
    /// Re-sizes the barrier. Only valid while nobody is waiting.
    pub fn reinit(&self, count: usize) {
        let mut c = self.count.lock();
        c.init = count;
        c.current = count;
    }

    /// Blocks until `count` participants arrived. Returns `true` on the one
    /// participant that completed the round.
    pub fn wait(&self) -> bool {
        let local = self.ready.load(Ordering::Acquire);

        let mut c = self.count.lock();
        c.current -= 1;
        if c.current > 0 {
            drop(c);
            while self.ready.load(Ordering::Acquire) == local {
                spin_loop();
            }
            return false;
        }
        c.current = c.init;
        drop(c);

        fence(Ordering::SeqCst);
        self.ready.store(!local, Ordering::Release);
        true
    }
}
