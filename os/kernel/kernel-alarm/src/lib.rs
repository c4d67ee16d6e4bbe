//! # Alarms and timer chains
//!
//! A [`TimerChain`] keeps caller-owned [`AlarmWaiter`]s sorted by absolute
//! deadline (cycle counter ticks) and keeps exactly one hardware timer,
//! reached through a [`TimerSource`], armed for the earliest of them. The
//! interrupt handler of that timer calls [`TimerChain::trigger`], which runs
//! every waiter whose deadline passed, in deadline order, ties in insertion
//! order.
//!
//! Waiters are `&'static`: the chain links them intrusively and never
//! allocates or frees anything.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod chain;
mod waiter;

pub use chain::TimerChain;
pub use waiter::{AlarmFn, AlarmWaiter};

/// The hardware timer behind one chain.
pub trait TimerSource {
    /// Current time in cycle counter ticks.
    fn now(&self) -> u64;

    /// Arms the timer to fire at absolute time `deadline`, or as soon as
    /// possible if that already passed.
    fn arm(&self, deadline: u64);

    fn disarm(&self);
}
