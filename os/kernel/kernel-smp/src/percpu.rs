use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use kernel_alarm::{TimerChain, TimerSource};
use kernel_hal::{IpiDestination, Platform};
use kernel_trap::{CoreContext, DescriptorBlob, LAPIC_TIMER_VECTOR};

const NO_OWNER: u32 = u32::MAX;

/// The one-shot timer of one core, as seen from any core.
///
/// The owning core programs its local timer directly. Everyone else sends
/// the owner an IPI on [`LAPIC_TIMER_VECTOR`]; the owner's handler then
/// runs the chain and re-arms the timer itself.
pub struct PerCoreTimer<H: 'static> {
    hw: &'static H,
    owner: AtomicU32,
}

impl<H: Platform> PerCoreTimer<H> {
    pub const fn new(hw: &'static H) -> Self {
        Self {
            hw,
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    /// Hardware id of the core whose timer this is.
    pub fn owner(&self) -> Option<u32> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            hw => Some(hw),
        }
    }

    pub(crate) fn bind(&self, hw: u32) {
        self.owner.store(hw, Ordering::Release);
    }

    /// `Some(owner)` if the timer belongs to another core.
    fn remote_owner(&self) -> Option<u32> {
        let owner = self.owner()?;
        (owner != self.hw.hw_core_id()).then_some(owner)
    }
}

impl<H: Platform> TimerSource for PerCoreTimer<H> {
    fn now(&self) -> u64 {
        self.hw.read_tsc()
    }

    fn arm(&self, deadline: u64) {
        if let Some(owner) = self.remote_owner() {
            self.hw
                .send_ipi(IpiDestination::Physical(owner), LAPIC_TIMER_VECTOR);
            return;
        }
        let ticks_per_us = (self.hw.tsc_freq() / 1_000_000).max(1);
        let usec = deadline
            .saturating_sub(self.now())
            .div_ceil(ticks_per_us)
            .max(1);
        self.hw.set_core_timer(usec);
    }

    fn disarm(&self) {
        match self.remote_owner() {
            Some(owner) => self
                .hw
                .send_ipi(IpiDestination::Physical(owner), LAPIC_TIMER_VECTOR),
            None => self.hw.disarm_core_timer(),
        }
    }
}

/// Everything one logical core owns.
#[repr(C, align(64))]
pub struct PerCore<H: Platform + 'static> {
    context: CoreContext,
    timers: TimerChain<PerCoreTimer<H>, H::Irq>,
    blob: AtomicPtr<DescriptorBlob>,
    kernel_stack: AtomicU64,
    online: AtomicBool,
}

impl<H: Platform + 'static> PerCore<H> {
    pub(crate) const fn new(id: usize, hw: &'static H) -> Self {
        Self {
            context: CoreContext::new(id),
            timers: TimerChain::new(PerCoreTimer::new(hw)),
            blob: AtomicPtr::new(ptr::null_mut()),
            kernel_stack: AtomicU64::new(0),
            online: AtomicBool::new(false),
        }
    }

    pub const fn context(&self) -> &CoreContext {
        &self.context
    }

    pub const fn id(&self) -> usize {
        self.context.id()
    }

    /// The core's alarm chain, driven by its local timer.
    pub const fn timers(&self) -> &TimerChain<PerCoreTimer<H>, H::Irq> {
        &self.timers
    }

    /// The descriptor blob bound to this core, once it finished init.
    pub fn blob(&self) -> Option<&DescriptorBlob> {
        let blob = self.blob.load(Ordering::Acquire);
        // SAFETY: blobs are allocated once and never freed.
        unsafe { blob.as_ref() }
    }

    /// Top of the stack the core enters the kernel on from user mode.
    pub fn kernel_stack(&self) -> u64 {
        self.kernel_stack.load(Ordering::Acquire)
    }

    /// Whether the core finished its final init.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self, hw: u32, blob: *mut DescriptorBlob, kernel_stack: u64) {
        self.timers.source().bind(hw);
        self.kernel_stack.store(kernel_stack, Ordering::Release);
        self.blob.store(blob, Ordering::Release);
    }

    pub(crate) fn set_online(&self) {
        self.online.store(true, Ordering::Release);
    }
}
