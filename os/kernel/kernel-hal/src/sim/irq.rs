use crate::IrqControl;
use crate::registers::Rflags;
use std::cell::Cell;

thread_local! {
    // Cores come out of reset with interrupts disabled.
    static RFLAGS: Cell<Rflags> = Cell::new(Rflags::new());
}

/// Interrupt flag of the simulated core bound to the calling thread.
pub struct SimIrq;

impl SimIrq {
    /// Flags register of the calling core.
    #[must_use]
    pub fn rflags() -> Rflags {
        RFLAGS.with(Cell::get)
    }

    fn update(enabled: bool) {
        RFLAGS.with(|flags| flags.set(flags.get().with_if_interrupt_enable(enabled)));
    }
}

impl IrqControl for SimIrq {
    fn irq_enabled() -> bool {
        Self::rflags().if_interrupt_enable()
    }

    fn enable_irq() {
        Self::update(true);
    }

    fn disable_irq() {
        Self::update(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_per_thread() {
        SimIrq::enable_irq();
        assert!(SimIrq::irq_enabled());

        let other = std::thread::spawn(SimIrq::irq_enabled).join().expect("thread");
        assert!(!other);

        SimIrq::disable_irq();
        assert!(!SimIrq::irq_enabled());
    }
}
