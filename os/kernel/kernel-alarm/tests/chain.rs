use kernel_alarm::{AlarmWaiter, TimerChain, TimerSource};
use kernel_hal::CycleCounter;
use kernel_hal::sim::{SimIrq, SimPlatform};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Armed {
    At(u64),
    Off,
}

#[derive(Default)]
struct FakeTimer {
    now: AtomicU64,
    history: Mutex<Vec<Armed>>,
}

impl FakeTimer {
    fn set_now(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    fn last(&self) -> Option<Armed> {
        self.history.lock().unwrap().last().copied()
    }

    fn arm_count(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl TimerSource for FakeTimer {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn arm(&self, deadline: u64) {
        self.history.lock().unwrap().push(Armed::At(deadline));
    }

    fn disarm(&self) {
        self.history.lock().unwrap().push(Armed::Off);
    }
}

type Chain = TimerChain<FakeTimer, SimIrq>;

fn chain() -> Chain {
    TimerChain::new(FakeTimer::default())
}

fn waiter(func: fn(&'static AlarmWaiter), data: usize, time: u64) -> &'static AlarmWaiter {
    let waiter = Box::leak(Box::new(AlarmWaiter::new(func, data)));
    waiter.set_abs(time);
    waiter
}

fn noop(_: &'static AlarmWaiter) {}

#[test]
fn empty_chain_reports_sentinels() {
    let chain = chain();
    assert!(chain.is_empty());
    assert_eq!(chain.earliest(), u64::MAX);
    assert_eq!(chain.latest(), 0);
    assert_eq!(chain.len(), 0);
}

#[test]
fn fires_in_deadline_order() {
    static FIRED: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(w: &'static AlarmWaiter) {
        FIRED.lock().unwrap().push(w.data());
    }

    let chain = chain();
    for time in [5, 1, 3] {
        chain.set_alarm(waiter(record, time, time as u64));
    }
    assert_eq!(chain.earliest(), 1);
    assert_eq!(chain.latest(), 5);
    assert_eq!(chain.len(), 3);

    chain.source().set_now(10);
    chain.trigger();
    assert_eq!(*FIRED.lock().unwrap(), [1, 3, 5]);
    assert!(chain.is_empty());
    assert_eq!(chain.source().last(), Some(Armed::Off));
}

#[test]
fn equal_deadlines_fire_in_insertion_order() {
    static FIRED: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(w: &'static AlarmWaiter) {
        FIRED.lock().unwrap().push(w.data());
    }

    let chain = chain();
    chain.set_alarm(waiter(record, 1, 20));
    chain.set_alarm(waiter(record, 2, 10));
    chain.set_alarm(waiter(record, 3, 20));
    chain.set_alarm(waiter(record, 4, 10));

    chain.source().set_now(20);
    chain.trigger();
    assert_eq!(*FIRED.lock().unwrap(), [2, 4, 1, 3]);
}

#[test]
fn trigger_leaves_future_waiters_and_rearms() {
    static FIRED: AtomicU64 = AtomicU64::new(0);
    fn count(_: &'static AlarmWaiter) {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    let chain = chain();
    chain.set_alarm(waiter(count, 0, 100));
    chain.set_alarm(waiter(count, 0, 200));
    let late = waiter(count, 0, 300);
    chain.set_alarm(late);

    chain.source().set_now(200);
    chain.trigger();
    assert_eq!(FIRED.load(Ordering::SeqCst), 2);
    assert_eq!(chain.len(), 1);
    assert!(late.is_pending());
    assert_eq!(chain.earliest(), 300);
    assert_eq!(chain.source().last(), Some(Armed::At(300)));
}

#[test]
fn only_a_new_head_rearms_the_timer() {
    let chain = chain();
    chain.set_alarm(waiter(noop, 0, 50));
    assert_eq!(chain.source().last(), Some(Armed::At(50)));
    let armed = chain.source().arm_count();

    chain.set_alarm(waiter(noop, 0, 80));
    assert_eq!(chain.source().arm_count(), armed);

    chain.set_alarm(waiter(noop, 0, 20));
    assert_eq!(chain.source().last(), Some(Armed::At(20)));
}

#[test]
fn unset_pending_alarm() {
    let chain = chain();
    let first = waiter(noop, 0, 10);
    let second = waiter(noop, 0, 30);
    chain.set_alarm(first);
    chain.set_alarm(second);

    assert!(chain.unset_alarm(first));
    assert!(!first.is_pending());
    assert_eq!(chain.earliest(), 30);
    assert_eq!(chain.source().last(), Some(Armed::At(30)));

    assert!(chain.unset_alarm(second));
    assert!(chain.is_empty());
    assert_eq!(chain.source().last(), Some(Armed::Off));

    assert!(!chain.unset_alarm(second));
}

#[test]
fn unset_after_firing_reports_false() {
    let chain = chain();
    let w = waiter(noop, 0, 5);
    chain.set_alarm(w);
    chain.source().set_now(5);
    chain.trigger();
    assert!(!chain.unset_alarm(w));
}

#[test]
fn unset_waits_for_a_running_callback() {
    static RELEASE: AtomicBool = AtomicBool::new(false);
    static ENTERED: AtomicBool = AtomicBool::new(false);
    static FINISHED: AtomicBool = AtomicBool::new(false);
    fn slow(_: &'static AlarmWaiter) {
        ENTERED.store(true, Ordering::SeqCst);
        while !RELEASE.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        FINISHED.store(true, Ordering::SeqCst);
    }

    let chain: &'static Chain = Box::leak(Box::new(chain()));
    let w = waiter(slow, 0, 1);
    chain.set_alarm(w);
    chain.source().set_now(1);

    let firing = thread::spawn(move || chain.trigger());
    while !ENTERED.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    let unsetting = thread::spawn(move || {
        let removed = chain.unset_alarm(w);
        (removed, FINISHED.load(Ordering::SeqCst))
    });
    thread::sleep(Duration::from_millis(20));
    assert!(!unsetting.is_finished());

    RELEASE.store(true, Ordering::SeqCst);
    let (removed, finished) = unsetting.join().unwrap();
    assert!(!removed);
    assert!(finished, "unset returned while the callback still ran");
    firing.join().unwrap();
}

#[test]
fn callback_may_rearm_itself() {
    static CHAIN: Mutex<Option<&'static Chain>> = Mutex::new(None);
    static RUNS: AtomicU64 = AtomicU64::new(0);
    fn periodic(w: &'static AlarmWaiter) {
        if RUNS.fetch_add(1, Ordering::SeqCst) == 0 {
            let chain = CHAIN.lock().unwrap().unwrap();
            w.set_abs(w.wake_up_time() + 100);
            chain.set_alarm(w);
        }
    }

    let chain: &'static Chain = Box::leak(Box::new(chain()));
    *CHAIN.lock().unwrap() = Some(chain);
    let w = waiter(periodic, 0, 100);
    chain.set_alarm(w);

    chain.source().set_now(150);
    chain.trigger();
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    assert!(w.is_pending());
    assert_eq!(chain.source().last(), Some(Armed::At(200)));

    chain.source().set_now(200);
    chain.trigger();
    assert_eq!(RUNS.load(Ordering::SeqCst), 2);
    assert!(chain.is_empty());
}

#[test]
fn callback_may_reset_itself() {
    static CHAIN: Mutex<Option<&'static Chain>> = Mutex::new(None);
    static RUNS: AtomicU64 = AtomicU64::new(0);
    fn periodic(w: &'static AlarmWaiter) {
        RUNS.fetch_add(1, Ordering::SeqCst);
        let chain = CHAIN.lock().unwrap().unwrap();
        chain.reset_alarm_abs(w, w.wake_up_time() + 100);
    }

    let chain: &'static Chain = Box::leak(Box::new(chain()));
    *CHAIN.lock().unwrap() = Some(chain);
    let w = waiter(periodic, 0, 100);
    chain.set_alarm(w);
    chain.source().set_now(150);

    let done = Arc::new(AtomicBool::new(false));
    let firing = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            chain.trigger();
            done.store(true, Ordering::SeqCst);
        })
    };
    for _ in 0..1000 {
        if done.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(done.load(Ordering::SeqCst), "trigger never returned");
    firing.join().unwrap();

    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    assert!(w.is_pending());
    assert_eq!(w.wake_up_time(), 200);
    assert_eq!(chain.source().last(), Some(Armed::At(200)));
}

#[test]
fn reset_moves_a_pending_alarm() {
    let chain = chain();
    let w = waiter(noop, 0, 10);
    chain.set_alarm(w);
    chain.set_alarm(waiter(noop, 0, 40));

    chain.reset_alarm_abs(w, 90);
    assert!(w.is_pending());
    assert_eq!(w.wake_up_time(), 90);
    assert_eq!(chain.earliest(), 40);
    assert_eq!(chain.latest(), 90);
    assert_eq!(chain.source().last(), Some(Armed::At(40)));
}

#[test]
fn reset_sets_an_idle_alarm() {
    let chain = chain();
    let w = waiter(noop, 0, 0);
    chain.reset_alarm_abs(w, 70);
    assert!(w.is_pending());
    assert_eq!(chain.earliest(), 70);
}

#[test]
#[should_panic(expected = "alarm waiter set twice")]
fn setting_a_pending_waiter_panics() {
    let chain = chain();
    let w = waiter(noop, 0, 10);
    chain.set_alarm(w);
    chain.set_alarm(w);
}

#[test]
fn relative_deadlines_use_the_cycle_counter() {
    let hw = SimPlatform::new(&[0]);
    hw.set_tsc(5_000);
    let w = waiter(noop, 0, 0);

    w.set_rel(hw, 3);
    assert_eq!(w.wake_up_time(), 5_000 + 3 * (hw.tsc_freq() / 1_000_000));

    w.set_inc(hw, 1);
    assert_eq!(w.wake_up_time(), 5_000 + 4 * (hw.tsc_freq() / 1_000_000));
}

#[test]
fn interrupts_are_restored_around_chain_operations() {
    use kernel_hal::IrqControl;

    SimIrq::enable_irq();
    let chain = chain();
    chain.set_alarm(waiter(noop, 0, 1));
    assert!(SimIrq::irq_enabled());
    chain.source().set_now(1);
    chain.trigger();
    assert!(SimIrq::irq_enabled());
    SimIrq::disable_irq();
}
