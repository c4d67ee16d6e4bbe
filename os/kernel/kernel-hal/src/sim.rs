//! # Simulated multicore platform
//!
//! [`SimPlatform`] models a machine whose cores are host threads:
//!
//! * every thread carries its own interrupt flag ([`SimIrq`]) and the
//!   hardware id of the core it plays ([`SimPlatform::enter_core`]);
//! * the cycle counter is a shared counter advanced by [`CycleCounter::udelay`]
//!   and by tests ([`SimPlatform::advance_usec`]);
//! * IPIs land in per-core mailboxes and are delivered to the callback
//!   installed with [`SimPlatform::connect`] when the target core halts, or,
//!   for a core sending to itself, on [`LocalApic::lapic_wait_to_send`] /
//!   [`SimPlatform::poll_interrupts`] with interrupts enabled;
//! * INIT + Startup-IPI spawn one thread per configured non-boot core; each
//!   thread runs the installed trampoline protocol and then idles in `halt`;
//! * allocations can be made to fail after a budget.
//!
//! Every hardware side effect is also appended to an event log
//! ([`SimPlatform::events`]) for assertions.

mod events;
mod irq;

pub use events::{CoreRegisters, SimEvent};
pub use irq::SimIrq;

use crate::trampoline::TrampolineHeader;
use crate::{
    BootMemory, CpuSetup, CycleCounter, DescriptorPointer, DescriptorTables, IpiDestination,
    IrqControl, KERNEL_STACK_SIZE, LegacyPic, LocalApic, PAGE_SIZE, Platform, TRAMPOLINE_PAGE,
};
use std::alloc::Layout;
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

/// Default simulated cycle counter frequency: 1 GHz, one tick per nanosecond.
pub const DEFAULT_TSC_HZ: u64 = 1_000_000_000;

thread_local! {
    static CURRENT_CORE: Cell<Option<u32>> = const { Cell::new(None) };
}

type InterruptSink = Box<dyn Fn(u8) + Send + Sync>;

#[derive(Default)]
struct SimState {
    online: Vec<u32>,
    mailboxes: HashMap<u32, VecDeque<u8>>,
    registers: HashMap<u32, CoreRegisters>,
    trampolines: HashMap<u64, &'static TrampolineHeader>,
    alloc_budget: Option<usize>,
    pic_isr: u16,
}

pub struct SimPlatform {
    cores: Vec<u32>,
    tsc: AtomicU64,
    tsc_hz: u64,
    real_delays: AtomicBool,
    shutdown: AtomicBool,
    state: Mutex<SimState>,
    wakeup: Condvar,
    events: Mutex<Vec<SimEvent>>,
    sink: OnceLock<InterruptSink>,
}

impl SimPlatform {
    /// Creates a machine with the given hardware core ids; the first one is
    /// the boot core and is online from the start.
    ///
    /// The platform is leaked: simulated cores are threads that may outlive
    /// any scope, exactly like hardware outlives the kernel's data structures.
    ///
    /// # Panics
    /// Panics if `hw_ids` is empty.
    #[must_use]
    pub fn new(hw_ids: &[u32]) -> &'static Self {
        assert!(!hw_ids.is_empty(), "a machine needs a boot core");
        let state = SimState {
            online: vec![hw_ids[0]],
            ..SimState::default()
        };
        Box::leak(Box::new(Self {
            cores: hw_ids.to_vec(),
            tsc: AtomicU64::new(0),
            tsc_hz: DEFAULT_TSC_HZ,
            real_delays: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            state: Mutex::new(state),
            wakeup: Condvar::new(),
            events: Mutex::new(Vec::new()),
            sink: OnceLock::new(),
        }))
    }

    /// Hardware id of the boot core.
    #[must_use]
    pub fn boot_core(&self) -> u32 {
        self.cores[0]
    }

    /// Binds the calling thread to hardware core `hw`.
    pub fn enter_core(&self, hw: u32) {
        CURRENT_CORE.with(|c| c.set(Some(hw)));
    }

    /// Installs the interrupt entry every delivered vector is handed to.
    ///
    /// # Panics
    /// Panics when called twice.
    pub fn connect(&self, sink: impl Fn(u8) + Send + Sync + 'static) {
        assert!(
            self.sink.set(Box::new(sink)).is_ok(),
            "interrupt entry already connected"
        );
    }

    /// Lets the next `count` allocations succeed and fails every one after.
    pub fn fail_allocations_after(&self, count: usize) {
        self.lock_state().alloc_budget = Some(count);
    }

    /// Makes `udelay` advance the counter without sleeping.
    pub fn skip_real_delays(&self) {
        self.real_delays.store(false, Ordering::Relaxed);
    }

    pub fn advance_usec(&self, usec: u64) {
        self.tsc
            .fetch_add(usec * (self.tsc_hz / 1_000_000), Ordering::AcqRel);
    }

    pub fn set_tsc(&self, cycles: u64) {
        self.tsc.store(cycles, Ordering::Release);
    }

    /// Sets the fault address the calling core reports through `CR2`.
    pub fn set_fault_address(&self, addr: u64) {
        self.with_registers(|r| r.cr2 = addr);
    }

    /// Puts `vector` in service on the calling core, as if its local APIC
    /// accepted it. The next EOI retires the highest vector in service.
    pub fn set_in_service(&self, vector: u8) {
        self.with_registers(|r| r.in_service.push(vector));
    }

    /// Sets the in-service register of the PIC pair.
    pub fn set_pic_in_service(&self, isr: u16) {
        self.lock_state().pic_isr = isr;
    }

    /// Hardware ids of the cores that are running.
    #[must_use]
    pub fn online_cores(&self) -> Vec<u32> {
        self.lock_state().online.clone()
    }

    #[must_use]
    pub fn registers(&self, hw: u32) -> CoreRegisters {
        self.lock_state()
            .registers
            .get(&hw)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_events(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Delivers interrupts queued for the calling core if its interrupt flag is set.
    pub fn poll_interrupts(&self) {
        if !SimIrq::irq_enabled() {
            return;
        }
        let hw = self.hw_core_id();
        while let Some(vector) = self.pop_mailbox(hw) {
            self.deliver(vector);
        }
    }

    /// Releases every halted core; they return from their idle loop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wakeup.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: SimEvent) {
        log::trace!("sim: {event:?}");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn with_registers<R>(&self, f: impl FnOnce(&mut CoreRegisters) -> R) -> R {
        let hw = self.hw_core_id();
        let mut state = self.lock_state();
        f(state.registers.entry(hw).or_default())
    }

    fn take_allocation(&self) -> bool {
        let mut state = self.lock_state();
        match state.alloc_budget.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }

    fn pop_mailbox(&self, hw: u32) -> Option<u8> {
        self.lock_state().mailboxes.get_mut(&hw)?.pop_front()
    }

    /// Runs the interrupt entry the way an interrupt gate would: with the
    /// interrupt flag cleared for the duration of the handler.
    fn deliver(&self, vector: u8) {
        let Some(sink) = self.sink.get() else {
            log::warn!("sim: vector {vector:#x} delivered with no interrupt entry connected");
            return;
        };
        let was_enabled = SimIrq::irq_enabled();
        SimIrq::disable_irq();
        sink(vector);
        if was_enabled {
            SimIrq::enable_irq();
        }
    }

    fn run_application_core(&'static self, hw: u32, header: &'static TrampolineHeader) {
        self.enter_core(hw);
        header.semaphore.fetch_add(1, Ordering::AcqRel);
        header.acquire_boot_lock();

        let Some(entry) = header.entry() else {
            log::error!("sim: core {hw} started without an entry point");
            header.semaphore.fetch_sub(1, Ordering::AcqRel);
            header.release_boot_lock();
            return;
        };
        let stack_top = entry(header.context());
        log::trace!("sim: core {hw} switched to stack {stack_top:#x}");

        header.semaphore.fetch_sub(1, Ordering::AcqRel);
        header.release_boot_lock();

        while !self.shutdown.load(Ordering::Acquire) {
            self.halt();
        }
    }
}

impl CycleCounter for SimPlatform {
    fn read_tsc(&self) -> u64 {
        self.tsc.load(Ordering::Acquire)
    }

    fn tsc_freq(&self) -> u64 {
        self.tsc_hz
    }

    fn udelay(&self, usec: u64) {
        self.record(SimEvent::Delay { usec });
        if self.real_delays.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_micros(usec));
        }
        self.advance_usec(usec);
    }
}

impl LocalApic for SimPlatform {
    fn hw_core_id(&self) -> u32 {
        CURRENT_CORE.with(Cell::get).unwrap_or(self.cores[0])
    }

    fn lapic_enable(&self) {
        self.with_registers(|r| r.lapic_enabled = true);
    }

    fn lapic_set_logical_id(&self, id: u8) {
        self.with_registers(|r| r.logical_id = Some(id));
    }

    fn lapic_send_eoi(&self) {
        let core = self.hw_core_id();
        self.with_registers(|r| {
            if let Some(highest) = r.in_service.iter().copied().max() {
                r.in_service.retain(|&v| v != highest);
            }
        });
        self.record(SimEvent::LapicEoi { core });
    }

    fn lapic_in_service(&self, vector: u8) -> bool {
        self.with_registers(|r| r.in_service.contains(&vector))
    }

    fn mask_lint0_extint(&self) {
        self.with_registers(|r| r.lint0 = Some(0x700 | (1 << 16)));
    }

    fn send_ipi(&self, dest: IpiDestination, vector: u8) {
        let from = self.hw_core_id();
        self.record(SimEvent::Ipi { from, dest, vector });

        let mut state = self.lock_state();
        let targets: Vec<u32> = match dest {
            IpiDestination::SelfOnly => vec![from],
            IpiDestination::All => state.online.clone(),
            IpiDestination::AllButSelf => {
                state.online.iter().copied().filter(|&hw| hw != from).collect()
            }
            IpiDestination::Physical(hw) => {
                if state.online.contains(&hw) {
                    vec![hw]
                } else {
                    Vec::new()
                }
            }
        };
        for hw in targets {
            state.mailboxes.entry(hw).or_default().push_back(vector);
        }
        drop(state);
        self.wakeup.notify_all();
    }

    fn send_init_ipi(&self) {
        self.record(SimEvent::InitIpi);
    }

    fn send_startup_ipi(&self, page: u8) {
        self.record(SimEvent::StartupIpi { page });

        let phys = u64::from(page) << 12;
        let mut state = self.lock_state();
        let Some(&header) = state.trampolines.get(&phys) else {
            log::warn!("sim: Startup-IPI for page {page:#x} without startup code");
            return;
        };

        let waking: Vec<u32> = self
            .cores
            .iter()
            .copied()
            .filter(|hw| !state.online.contains(hw))
            .collect();
        state.online.extend(&waking);
        drop(state);

        // SAFETY: `SimPlatform::new` is the only constructor and leaks the instance.
        let this: &'static Self = unsafe { &*core::ptr::from_ref(self) };
        for hw in waking {
            let spawned = std::thread::Builder::new()
                .name(format!("sim-core-{hw}"))
                .spawn(move || this.run_application_core(hw, header));
            if let Err(e) = spawned {
                log::error!("sim: cannot start core {hw}: {e}");
            }
        }
    }

    fn lapic_wait_to_send(&self) {
        self.poll_interrupts();
    }

    fn set_core_timer(&self, usec: u64) {
        let core = self.hw_core_id();
        self.with_registers(|r| r.timer_usec = Some(usec));
        self.record(SimEvent::TimerArmed { core, usec });
    }

    fn disarm_core_timer(&self) {
        let core = self.hw_core_id();
        self.with_registers(|r| r.timer_usec = None);
        self.record(SimEvent::TimerDisarmed { core });
    }
}

impl LegacyPic for SimPlatform {
    fn pic_remap(&self, offset: u8) {
        self.record(SimEvent::PicRemap { offset });
    }

    fn pic_mask_irq(&self, irq: u8) {
        self.record(SimEvent::PicMask { irq });
    }

    fn pic_send_eoi(&self, irq: u8) {
        self.record(SimEvent::PicEoi { irq });
    }

    fn pic_in_service(&self) -> u16 {
        self.lock_state().pic_isr
    }
}

impl DescriptorTables for SimPlatform {
    unsafe fn load_idt(&self, ptr: &DescriptorPointer) {
        let ptr = *ptr;
        self.with_registers(|r| r.idt = Some(ptr));
    }

    unsafe fn load_gdt(&self, ptr: &DescriptorPointer) {
        let ptr = *ptr;
        self.with_registers(|r| r.gdt = Some(ptr));
    }

    unsafe fn load_task_register(&self, selector: u16) {
        self.with_registers(|r| r.task_register = Some(selector));
    }
}

impl CpuSetup for SimPlatform {
    fn fault_address(&self) -> u64 {
        self.with_registers(|r| r.cr2)
    }

    fn fpu_init(&self) {
        self.with_registers(|r| r.fpu_initialized = true);
    }

    fn enable_sse(&self) {
        self.with_registers(|r| r.cr4 = r.cr4.with_sse());
    }

    fn setup_default_mtrrs(&self) {
        self.with_registers(|r| r.mtrrs_default = true);
    }

    /// Waits for the next interrupt with the interrupt flag set, then delivers it.
    fn halt(&self) {
        SimIrq::enable_irq();
        let hw = self.hw_core_id();
        let mut state = self.lock_state();
        loop {
            if let Some(vector) = state.mailboxes.get_mut(&hw).and_then(VecDeque::pop_front) {
                drop(state);
                self.deliver(vector);
                return;
            }
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl BootMemory for SimPlatform {
    fn alloc_page(&self) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).ok()?;
        self.alloc_zeroed(layout)
    }

    unsafe fn free_page(&self, page: NonNull<u8>) {
        if let Ok(layout) = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE) {
            unsafe { std::alloc::dealloc(page.as_ptr(), layout) };
        }
    }

    fn alloc_kernel_stack(&self) -> Option<u64> {
        let layout = Layout::from_size_align(KERNEL_STACK_SIZE, 16).ok()?;
        let base = self.alloc_zeroed(layout)?;
        Some(base.as_ptr() as u64 + KERNEL_STACK_SIZE as u64)
    }

    fn alloc_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 || !self.take_allocation() {
            return None;
        }
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    fn install_trampoline(&self, phys: u64) -> Option<&'static TrampolineHeader> {
        debug_assert_eq!(phys, TRAMPOLINE_PAGE);
        let header: &'static TrampolineHeader = Box::leak(Box::new(TrampolineHeader::new()));
        self.lock_state().trampolines.insert(phys, header);
        Some(header)
    }

    fn remove_trampoline(&self, phys: u64) {
        self.lock_state().trampolines.remove(&phys);
        self.record(SimEvent::TrampolineRemoved { phys });
    }
}

impl Platform for SimPlatform {
    type Irq = SimIrq;
}
