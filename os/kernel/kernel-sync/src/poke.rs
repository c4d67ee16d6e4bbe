use core::sync::atomic::{AtomicBool, Ordering};

/// Runs a function at least once after every poke, never concurrently with
/// itself, without ever blocking a poker.
///
/// Whoever finds the function idle runs it, and keeps re-running it as long
/// as somebody poked during the previous run. Everybody else just records
/// that another run is needed and leaves.
pub struct Poke<F> {
    need_to_run: AtomicBool,
    run_in_progress: AtomicBool,
    func: F,
}

impl<F> Poke<F> {
    pub const fn new(func: F) -> Self {
        Self {
            need_to_run: AtomicBool::new(false),
            run_in_progress: AtomicBool::new(false),
            func,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_in_progress.load(Ordering::Acquire)
    }

    pub fn poke<A: ?Sized>(&self, arg: &A)
    where
        F: Fn(&A),
    {
        self.need_to_run.store(true, Ordering::SeqCst);
        loop {
            if self.run_in_progress.swap(true, Ordering::SeqCst) {
                return;
            }
            self.need_to_run.store(false, Ordering::SeqCst);
            (self.func)(arg);
            self.run_in_progress.store(false, Ordering::SeqCst);

            if !self.need_to_run.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}
