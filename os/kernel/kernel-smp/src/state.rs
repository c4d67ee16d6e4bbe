use crate::config::{BootConfig, StartupIpiPolicy};
use crate::core_map::CoreMap;
use crate::percpu::PerCore;
use core::alloc::Layout;
use core::hint::spin_loop;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use kernel_hal::{PAGE_SIZE, Platform, TRAMPOLINE_PAGE, TrampolineHeader};
use kernel_sync::{AlreadyFrozen, Barrier, MAX_CORES, SyncOnceCell};
use kernel_trap::{
    CoreTopology, DescriptorBlob, LAPIC_TIMER_VECTOR, StubTable, TrapDispatcher,
    TrapEnvironment, TrapFrame, TrapOutcome,
};

/// Page number a Startup-IPI names.
#[allow(clippy::cast_possible_truncation)]
const STARTUP_PAGE: u8 = (TRAMPOLINE_PAGE >> 12) as u8;
const _: () = assert!(TRAMPOLINE_PAGE >> 12 <= 0xFF);

/// What [`SmpState::bring_up_cores`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringUpReport {
    /// Cores online, the boot core included.
    pub num_cores: usize,
    pub startup_ipis: u8,
    /// The arrival wait hit its spin bound; cores that were still on the
    /// way are left spinning on the trampoline lock.
    pub timed_out: bool,
}

/// Blob and stack a core set up for itself, by hardware id, until the
/// final init binds them to its logical id.
struct Staged {
    blob: AtomicPtr<DescriptorBlob>,
    kernel_stack: AtomicU64,
}

impl Staged {
    const EMPTY: Self = Self {
        blob: AtomicPtr::new(ptr::null_mut()),
        kernel_stack: AtomicU64::new(0),
    };
}

/// The multicore side of the kernel: which cores exist, what each one
/// owns, and how they were started.
pub struct SmpState<H: Platform + 'static> {
    hw: &'static H,
    traps: &'static TrapDispatcher<H>,
    config: BootConfig,
    map: CoreMap,
    cores: [PerCore<H>; MAX_CORES],
    staged: [Staged; MAX_CORES],
    barrier: Barrier<H::Irq>,
    report: SyncOnceCell<BringUpReport>,
}

impl<H: Platform + 'static> core::fmt::Debug for SmpState<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmpState")
            .field("config", &self.config)
            .field("report", &self.report())
            .finish_non_exhaustive()
    }
}

impl<H: Platform + 'static> SmpState<H> {
    pub fn new(hw: &'static H, traps: &'static TrapDispatcher<H>, config: BootConfig) -> Self {
        Self {
            hw,
            traps,
            config,
            map: CoreMap::new(),
            cores: core::array::from_fn(|id| PerCore::new(id, hw)),
            staged: [Staged::EMPTY; MAX_CORES],
            barrier: Barrier::new(1),
            report: SyncOnceCell::new(),
        }
    }

    pub const fn hw(&self) -> &'static H {
        self.hw
    }

    pub const fn traps(&self) -> &'static TrapDispatcher<H> {
        self.traps
    }

    pub const fn config(&self) -> &BootConfig {
        &self.config
    }

    pub const fn core_map(&self) -> &CoreMap {
        &self.map
    }

    /// The outcome of bring-up, once it finished.
    pub fn report(&self) -> Option<BringUpReport> {
        self.report.get().copied()
    }

    /// Logical id of the executing core.
    ///
    /// # Panics
    /// If a core that never registered asks.
    pub fn current_core(&self) -> usize {
        let hw = self.hw.hw_core_id();
        match self.map.os_core_id(hw) {
            Some(os) => os,
            // Nobody registered yet: only the boot core runs.
            None if self.map.arrived() == 0 => 0,
            None => panic!("core {hw} is not in the core map"),
        }
    }

    /// State of logical core `os`, if it exists.
    pub fn core(&self, os: usize) -> Option<&PerCore<H>> {
        (os < self.num_cores()).then(|| &self.cores[os])
    }

    /// State of the executing core.
    pub fn local(&self) -> &PerCore<H> {
        &self.cores[self.current_core()]
    }

    pub fn num_cores(&self) -> usize {
        self.map.num_cores().max(1)
    }

    /// Trap entry for the executing core.
    pub fn trap_entry<E: TrapEnvironment>(&self, env: &E, frame: &mut TrapFrame) -> TrapOutcome {
        self.traps.handle_trap(env, self.local().context(), frame)
    }

    /// IRQ entry for the executing core.
    pub fn irq_entry<E: TrapEnvironment>(&self, env: &E, frame: &mut TrapFrame) {
        self.traps.handle_irq(env, self.local().context(), frame);
    }

    /// Builds and loads the vector table and the boot core's descriptor
    /// blob. Must run before [`SmpState::bring_up_cores`].
    ///
    /// # Errors
    /// If the vector table was already installed.
    ///
    /// # Panics
    /// If the boot core's stack or blob cannot be allocated.
    pub fn install_boot_core(&self, stubs: &StubTable<'_>) -> Result<(), AlreadyFrozen> {
        let hw_id = self.hw.hw_core_id();
        let stack = self.alloc_kernel_stack(hw_id);
        let blob = self.alloc_blob(hw_id, &DescriptorBlob::new());
        // SAFETY: freshly allocated, never freed, not shared yet.
        self.traps
            .install_vector_table(stubs, unsafe { &mut *blob }, stack)?;
        self.stage(hw_id, blob, stack);
        Ok(())
    }

    /// Starts every other core and waits until all of them finished their
    /// final init. Runs once, on the boot core.
    ///
    /// # Panics
    /// If the boot core is not hardware core 0, on allocation failure, or
    /// when called twice.
    pub fn bring_up_cores(&'static self) -> BringUpReport {
        let boot = self.hw.hw_core_id();
        assert_eq!(boot, 0, "the boot core must have hardware id 0");
        self.map.register_provisional(boot);

        let Some(header) = self.hw.install_trampoline(TRAMPOLINE_PAGE) else {
            panic!("cannot map the trampoline page");
        };
        let Some(shared_stack) = self.hw.alloc_page() else {
            panic!("no memory for the shared boot stack");
        };
        header
            .stack_top
            .store(shared_stack.as_ptr() as u64 + PAGE_SIZE as u64, Ordering::Release);
        header.set_entry(ap_entry::<H>, ptr::from_ref(self).cast());

        let startup_ipis = self.send_startup_sequence();
        let timed_out = !self.await_arrivals(header);

        // Held for good so a late core never reaches the entry point.
        header.acquire_boot_lock();
        let Ok(num_cores) = self.map.compact() else {
            panic!("cores brought up twice");
        };
        log::info!("{num_cores} cores detected");

        self.hw.remove_trampoline(TRAMPOLINE_PAGE);
        // SAFETY: every core that used the shared stack left it, and the
        // lock keeps late ones out.
        unsafe { self.hw.free_page(shared_stack) };

        self.final_init_all(num_cores);

        let report = BringUpReport {
            num_cores,
            startup_ipis,
            timed_out,
        };
        let _ = self.report.set(report);
        report
    }

    /// First Rust code on a freshly started core, run under the trampoline
    /// lock on the shared stack. Returns the top of the core's own stack.
    ///
    /// # Panics
    /// On allocation failure.
    pub fn start_application_core(&self) -> u64 {
        let hw_id = self.hw.hw_core_id();
        let count = self.map.register_provisional(hw_id);

        let stack = self.alloc_kernel_stack(hw_id);
        let template = self.boot_blob().copied().unwrap_or_default();
        let blob = self.alloc_blob(hw_id, &template);
        // SAFETY: freshly allocated and never freed; nobody else knows it yet.
        unsafe {
            let blob = &mut *blob;
            blob.set_kernel_stack(stack);
            blob.install(self.hw);
        }
        self.traps.load_vector_table();

        self.hw.mask_lint0_extint();
        self.hw.lapic_enable();
        self.hw
            .lapic_set_logical_id(u8::try_from(hw_id).unwrap_or(u8::MAX));

        self.stage(hw_id, blob, stack);
        log::debug!("core {hw_id} started, {count} cores so far");
        stack
    }

    fn send_startup_sequence(&self) -> u8 {
        self.hw.send_init_ipi();
        self.hw.udelay(self.config.init_settle_us);
        self.hw.send_startup_ipi(STARTUP_PAGE);
        let mut sent = 1;
        if self.config.startup_ipi == StartupIpiPolicy::Double {
            self.hw.udelay(self.config.sipi_gap_us);
            self.hw.send_startup_ipi(STARTUP_PAGE);
            sent += 1;
        }
        self.hw.udelay(self.config.arrival_window_us);
        sent
    }

    /// Whether every core that entered the trampoline left it (and the
    /// expected number reported in) before the spin bound.
    fn await_arrivals(&self, header: &TrampolineHeader) -> bool {
        let expected = self.config.expected_cores.unwrap_or(0);
        for _ in 0..self.config.arrival_timeout_spins {
            if header.in_flight() == 0 && self.map.arrived() >= expected {
                return true;
            }
            spin_loop();
        }
        if header.in_flight() == 0 && self.map.arrived() >= expected {
            return true;
        }
        log::warn!(
            "stopped waiting for cores after {} spins: {} arrived, {} still in the trampoline",
            self.config.arrival_timeout_spins,
            self.map.arrived(),
            header.in_flight()
        );
        false
    }

    /// Runs [`SmpState::final_core_init`] on every core and returns once all
    /// of them passed the barrier.
    fn final_init_all(&'static self, num_cores: usize) {
        self.barrier.reinit(num_cores);
        let calls = self.traps.remote_calls(self);
        let context = ptr::from_ref(self) as usize;
        let handle = match calls.call_all_but_self(final_core_init::<H>, context) {
            Ok(handle) => handle,
            Err(e) => panic!("cannot start the final core init: {e}"),
        };
        self.final_core_init();
        handle.wait();
    }

    fn final_core_init(&self) {
        self.hw.fpu_init();
        self.hw.enable_sse();
        self.hw.setup_default_mtrrs();
        self.percpu_init();
        self.barrier.wait();
    }

    /// Binds the staged blob and stack to the core's logical id and hooks
    /// up its alarm chain.
    fn percpu_init(&self) {
        let hw_id = self.hw.hw_core_id();
        let os = self.current_core();
        let staged = &self.staged[hw_id as usize];
        let core = &self.cores[os];
        core.bind(
            hw_id,
            staged.blob.load(Ordering::Acquire),
            staged.kernel_stack.load(Ordering::Acquire),
        );
        self.traps.register_interrupt_handler(
            LAPIC_TIMER_VECTOR,
            timer_interrupt::<H>,
            ptr::from_ref(self) as usize,
        );
        core.set_online();
        log::debug!("core {os} (hardware id {hw_id}) online");
    }

    fn boot_blob(&self) -> Option<&DescriptorBlob> {
        let blob = self.staged[0].blob.load(Ordering::Acquire);
        // SAFETY: staged blobs are never freed.
        unsafe { blob.as_ref() }
    }

    fn stage(&self, hw_id: u32, blob: *mut DescriptorBlob, stack: u64) {
        let staged = &self.staged[hw_id as usize];
        staged.kernel_stack.store(stack, Ordering::Release);
        staged.blob.store(blob, Ordering::Release);
    }

    fn alloc_kernel_stack(&self, hw_id: u32) -> u64 {
        match self.hw.alloc_kernel_stack() {
            Some(top) => top,
            None => panic!("no kernel stack for core {hw_id}"),
        }
    }

    /// A never-freed copy of `template`.
    fn alloc_blob(&self, hw_id: u32, template: &DescriptorBlob) -> *mut DescriptorBlob {
        let memory = self.hw.alloc_zeroed(Layout::new::<DescriptorBlob>());
        let Some(memory) = memory.map(NonNull::cast::<DescriptorBlob>) else {
            panic!("no memory for the descriptor blob of core {hw_id}");
        };
        let blob = memory.as_ptr();
        // SAFETY: fresh, suitably sized and aligned allocation.
        unsafe { blob.write(DescriptorBlob::from_gdt(template.gdt())) };
        blob
    }
}

impl<H: Platform + 'static> CoreTopology for SmpState<H> {
    fn num_cores(&self) -> usize {
        SmpState::num_cores(self)
    }

    fn current_core(&self) -> usize {
        SmpState::current_core(self)
    }

    fn hw_core_id(&self, core: usize) -> Option<u32> {
        match self.map.hw_core_id(core) {
            Some(hw) => Some(hw),
            None if core == 0 && self.map.arrived() == 0 => Some(self.hw.hw_core_id()),
            None => None,
        }
    }
}

/// Trampoline entry; the context is the `&'static SmpState<H>` published by
/// [`SmpState::bring_up_cores`].
pub extern "C" fn ap_entry<H: Platform + 'static>(context: *const ()) -> u64 {
    // SAFETY: see above.
    let state = unsafe { &*context.cast::<SmpState<H>>() };
    state.start_application_core()
}

fn final_core_init<H: Platform + 'static>(_frame: &mut TrapFrame, data: usize) {
    // SAFETY: registered with the address of a `&'static SmpState<H>`.
    let state = unsafe { &*(data as *const SmpState<H>) };
    state.final_core_init();
}

fn timer_interrupt<H: Platform + 'static>(_frame: &mut TrapFrame, data: usize) {
    // SAFETY: registered with the address of a `&'static SmpState<H>`.
    let state = unsafe { &*(data as *const SmpState<H>) };
    state.local().timers().trigger();
}
