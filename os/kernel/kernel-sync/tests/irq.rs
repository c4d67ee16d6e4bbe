use kernel_hal::IrqControl;
use kernel_hal::sim::SimIrq;
use kernel_sync::{IrqGuard, IrqSpinLock, IrqState, RawIrqSpin};

type Lock<T> = IrqSpinLock<T, SimIrq>;

#[test]
fn irqsave_lock_restores_enabled_state() {
    SimIrq::enable_irq();
    let lock = Lock::new(0u32);
    {
        let mut g = lock.lock();
        *g += 1;
        assert!(!SimIrq::irq_enabled(), "held with interrupts off");
        assert!(lock.raw().saved_irq_enabled());
    }
    assert!(SimIrq::irq_enabled());
    assert!(!lock.is_locked());
}

#[test]
fn irqsave_lock_restores_disabled_state() {
    SimIrq::disable_irq();
    let lock = Lock::new(());
    drop(lock.lock());
    assert!(!SimIrq::irq_enabled());
}

#[test]
fn nested_irqsave_locks_unwind_to_the_outer_state() {
    SimIrq::enable_irq();
    let outer = Lock::new(1);
    let inner = Lock::new(2);

    let a = outer.lock();
    let b = inner.lock();
    assert!(!inner.raw().saved_irq_enabled());
    drop(b);
    assert!(!SimIrq::irq_enabled(), "inner release must not enable");
    drop(a);
    assert!(SimIrq::irq_enabled());
}

#[test]
fn raw_irqsave_pairs_explicitly() {
    SimIrq::enable_irq();
    let raw = RawIrqSpin::<SimIrq>::new();
    raw.lock_irqsave();
    assert!(raw.is_locked());
    assert!(!raw.try_lock_irqsave());
    assert!(!SimIrq::irq_enabled(), "failed try must leave the held state alone");
    unsafe { raw.unlock_irqsave() };
    assert!(SimIrq::irq_enabled());
}

#[test]
fn irq_state_enable_then_disable_round_trips() {
    for start in [false, true] {
        if start {
            SimIrq::enable_irq();
        } else {
            SimIrq::disable_irq();
        }
        let mut state = IrqState::new();
        state.enable_irqsave::<SimIrq>();
        assert!(SimIrq::irq_enabled());
        state.disable_irqsave::<SimIrq>();
        assert_eq!(SimIrq::irq_enabled(), start);
        assert_eq!(state.depth(), 0);
    }
}

#[test]
fn irq_state_nests_in_both_directions() {
    SimIrq::enable_irq();
    let mut state = IrqState::new();

    state.disable_irqsave::<SimIrq>();
    state.disable_irqsave::<SimIrq>();
    assert_eq!(state.depth(), -1);
    state.enable_irqsave::<SimIrq>();
    assert!(!SimIrq::irq_enabled(), "still inside the outer disable");
    state.enable_irqsave::<SimIrq>();
    assert!(SimIrq::irq_enabled());
    assert_eq!(state.depth(), 0);
}

#[test]
fn irq_guard_restores_previous_state() {
    SimIrq::enable_irq();
    {
        let _g = IrqGuard::<SimIrq>::new();
        assert!(!SimIrq::irq_enabled());
        {
            let _inner = IrqGuard::<SimIrq>::new();
        }
        assert!(!SimIrq::irq_enabled());
    }
    assert!(SimIrq::irq_enabled());
}
