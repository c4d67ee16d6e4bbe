//! Cross-core function calls.
//!
//! A call borrows one of [`NUM_HANDLER_WRAPPERS`] wrappers, each owning a
//! vector in the IPI range and a [`Checklist`] of the cores that still have
//! to run the function. The wrapper's handler is the caller's function;
//! [`TrapDispatcher::handle_irq`] checks the receiving core off after it ran.

use crate::handlers::Isr;
use crate::{NUM_HANDLER_WRAPPERS, REMOTE_CALL_BASE, TrapDispatcher};
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_hal::{IpiDestination, IrqControl, Platform};
use kernel_sync::{Checklist, CoreMask, IrqState, SpinTimeout};

/// Which cores a remote call reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    SelfOnly,
    All,
    AllButSelf,
    /// One core, by OS core id.
    Single(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RemoteCallError {
    #[error("all {NUM_HANDLER_WRAPPERS} call wrappers are in use")]
    Busy,
    #[error("no core with id {0}")]
    NoSuchCore(usize),
}

/// The cores a remote call can address.
pub trait CoreTopology {
    fn num_cores(&self) -> usize;

    /// OS id of the executing core.
    fn current_core(&self) -> usize;

    /// Hardware (APIC) id of OS core `core`.
    fn hw_core_id(&self, core: usize) -> Option<u32>;
}

pub(crate) struct Wrapper<I> {
    vector: u8,
    list: Checklist<I>,
}

pub(crate) struct CallWrappers<I> {
    wrappers: [Wrapper<I>; NUM_HANDLER_WRAPPERS],
    outstanding: AtomicUsize,
}

impl<I> CallWrappers<I> {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn new() -> Self {
        let mut wrappers = [const {
            Wrapper {
                vector: 0,
                list: Checklist::new(),
            }
        }; NUM_HANDLER_WRAPPERS];
        let mut i = 0;
        while i < NUM_HANDLER_WRAPPERS {
            wrappers[i].vector = REMOTE_CALL_BASE + i as u8;
            i += 1;
        }
        Self {
            wrappers,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Checks `core` off the wrapper that owns `vector`, if any.
    pub(crate) fn check_in(&self, vector: u8, core: usize) {
        let Some(index) = vector.checked_sub(REMOTE_CALL_BASE) else {
            return;
        };
        if let Some(wrapper) = self.wrappers.get(usize::from(index)) {
            wrapper.list.down(core);
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn reserve(&self) -> Result<(), RemoteCallError> {
        if self.outstanding.fetch_add(1, Ordering::AcqRel) >= NUM_HANDLER_WRAPPERS {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(RemoteCallError::Busy);
        }
        Ok(())
    }

    fn unreserve(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<I: IrqControl> CallWrappers<I> {
    /// Rotates through the wrappers from `start` until one commits `mask`.
    fn claim(&self, start: usize, mask: &CoreMask) -> &Wrapper<I> {
        let mut index = start % NUM_HANDLER_WRAPPERS;
        loop {
            let wrapper = &self.wrappers[index];
            if wrapper.list.commit(mask).is_ok() {
                return wrapper;
            }
            index = (index + 1) % NUM_HANDLER_WRAPPERS;
            spin_loop();
        }
    }
}

/// Issues remote calls through a [`TrapDispatcher`].
pub struct RemoteCalls<'a, H: Platform + 'static, T> {
    traps: &'a TrapDispatcher<H>,
    topology: &'a T,
}

impl<'a, H: Platform + 'static, T: CoreTopology> RemoteCalls<'a, H, T> {
    pub(crate) const fn new(traps: &'a TrapDispatcher<H>, topology: &'a T) -> Self {
        Self { traps, topology }
    }

    /// Calls currently holding a wrapper.
    pub fn outstanding(&self) -> usize {
        self.traps.wrappers.outstanding()
    }

    pub fn call_self(
        &self,
        isr: Isr,
        data: usize,
    ) -> Result<CallHandle<'a, H::Irq>, RemoteCallError> {
        self.call(CallTarget::SelfOnly, isr, data)
    }

    pub fn call_all(
        &self,
        isr: Isr,
        data: usize,
    ) -> Result<CallHandle<'a, H::Irq>, RemoteCallError> {
        self.call(CallTarget::All, isr, data)
    }

    pub fn call_all_but_self(
        &self,
        isr: Isr,
        data: usize,
    ) -> Result<CallHandle<'a, H::Irq>, RemoteCallError> {
        self.call(CallTarget::AllButSelf, isr, data)
    }

    pub fn call_single(
        &self,
        core: usize,
        isr: Isr,
        data: usize,
    ) -> Result<CallHandle<'a, H::Irq>, RemoteCallError> {
        self.call(CallTarget::Single(core), isr, data)
    }

    /// Runs `isr(frame, data)` in interrupt context on every core in `target`.
    ///
    /// The returned handle either waits for every target to finish
    /// ([`CallHandle::wait`]) or, when dropped, lets the call complete in
    /// the background. The wrapper stays busy until all targets ran.
    ///
    /// # Errors
    /// [`RemoteCallError::Busy`] if every wrapper is taken,
    /// [`RemoteCallError::NoSuchCore`] for a single target that does not exist.
    pub fn call(
        &self,
        target: CallTarget,
        isr: Isr,
        data: usize,
    ) -> Result<CallHandle<'a, H::Irq>, RemoteCallError> {
        let wrappers = &self.traps.wrappers;
        wrappers.reserve()?;

        let num_cores = self.topology.num_cores();
        let me = self.topology.current_core();
        let (mask, dest) = match target {
            CallTarget::SelfOnly => {
                let mut mask = CoreMask::new(num_cores);
                mask.set(me);
                (mask, IpiDestination::SelfOnly)
            }
            CallTarget::All => (CoreMask::full(num_cores), IpiDestination::All),
            CallTarget::AllButSelf => {
                let mut mask = CoreMask::full(num_cores);
                mask.clear(me);
                (mask, IpiDestination::AllButSelf)
            }
            CallTarget::Single(core) => {
                let hw = (core < num_cores)
                    .then(|| self.topology.hw_core_id(core))
                    .flatten();
                let Some(hw) = hw else {
                    wrappers.unreserve();
                    return Err(RemoteCallError::NoSuchCore(core));
                };
                let mut mask = CoreMask::new(num_cores);
                mask.set(core);
                (mask, IpiDestination::Physical(hw))
            }
        };

        let wrapper = wrappers.claim(me, &mask);
        self.traps.handlers().register(wrapper.vector, isr, data);

        // The checklist lock disabled interrupts; a call to ourselves needs
        // them on to be delivered before the ICR drains.
        let hw = self.traps.hw();
        let mut irq = IrqState::new();
        irq.enable_irqsave::<H::Irq>();
        hw.send_ipi(dest, wrapper.vector);
        hw.lapic_wait_to_send();
        irq.disable_irqsave::<H::Irq>();

        log::trace!("remote call {target:?} on vector {:#x}", wrapper.vector);
        Ok(CallHandle {
            list: &wrapper.list,
            vector: wrapper.vector,
            outstanding: &wrappers.outstanding,
            waited: false,
            _core_local: PhantomData,
        })
    }
}

/// A remote call in flight.
///
/// Holds the wrapper's checklist lock, which also keeps interrupts off on
/// this core; the handle therefore never leaves the core that issued it.
#[must_use = "dropping the handle detaches the call without waiting"]
pub struct CallHandle<'a, I: IrqControl> {
    list: &'a Checklist<I>,
    vector: u8,
    outstanding: &'a AtomicUsize,
    waited: bool,
    _core_local: PhantomData<*const ()>,
}

impl<I: IrqControl> CallHandle<'_, I> {
    /// The IPI vector the call went out on.
    pub const fn vector(&self) -> u8 {
        self.vector
    }

    /// Spins until every target core ran the function.
    pub fn wait(mut self) {
        self.list.wait();
        self.waited = true;
    }

    /// Like [`CallHandle::wait`] but gives up after `spins` iterations.
    ///
    /// # Errors
    /// [`SpinTimeout`] if a target has not run the function yet; dropping
    /// the handle afterwards detaches the call.
    pub fn wait_bounded(&mut self, spins: u64) -> Result<(), SpinTimeout> {
        self.list.wait_bounded(spins)?;
        self.waited = true;
        Ok(())
    }
}

impl<I: IrqControl> Drop for CallHandle<'_, I> {
    fn drop(&mut self) {
        if !self.waited {
            self.list.release();
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
