use crate::pages::PagePool;
use core::alloc::Layout;
use core::ptr::NonNull;
use kernel_hal::x86_64::{PageSource, X86Irq, X86Platform};
use kernel_hal::{CpuSetup, IrqControl, LocalApic};
use kernel_qemu::{DebugPort, QemuLogger};
use kernel_smp::{BootConfig, SmpState};
use kernel_sync::SyncOnceCell;
use kernel_trap::entry::{STUB_COUNT, set_irq_hook, set_trap_hook, stub_table};
use kernel_trap::{KernelOnly, LAPIC_TIMER_VECTOR, TrapDispatcher, TrapFrame, TrapOutcome};
use log::LevelFilter;

type Machine = X86Platform<BootPages>;

const POOL_BYTES: usize = 4 * 1024 * 1024;

#[repr(align(4096))]
struct Aligned<const N: usize>([u8; N]);

/// Backs every page, stack and blob the boot path allocates.
#[unsafe(link_section = ".bss.boot")]
static mut POOL: Aligned<POOL_BYTES> = Aligned([0; POOL_BYTES]);

static LOGGER: QemuLogger<DebugPort> =
    QemuLogger::new(LevelFilter::Info, DebugPort, current_core_id);
static PLATFORM: SyncOnceCell<Machine> = SyncOnceCell::new();
static TRAPS: SyncOnceCell<TrapDispatcher<Machine>> = SyncOnceCell::new();
static SMP: SyncOnceCell<SmpState<Machine>> = SyncOnceCell::new();

/// Kernel memory as the boot loader leaves it: the pool lives in `.bss`,
/// and low memory is identity-mapped.
struct BootPages {
    pool: PagePool,
}

impl BootPages {
    fn new() -> Self {
        let base = (&raw const POOL) as usize;
        Self {
            pool: PagePool::new(base, POOL_BYTES),
        }
    }
}

// Ranges come from `.bss` and are never reused, so they are already zero.
impl PageSource for BootPages {
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>> {
        NonNull::new(self.pool.pages(count)? as *mut u8)
    }

    unsafe fn free_pages(&self, base: NonNull<u8>, count: usize) {
        log::trace!("leaking {count} boot pages at {base:p}");
    }

    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(self.pool.reserve(layout.size(), layout.align())? as *mut u8)
    }

    fn map_identity(&self, phys: u64) -> Option<NonNull<u8>> {
        NonNull::new(usize::try_from(phys).ok()? as *mut u8)
    }

    fn unmap(&self, _phys: u64) {}
}

fn current_core_id() -> Option<usize> {
    let smp = SMP.get()?;
    smp.core_map().os_core_id(smp.hw().hw_core_id())
}

fn trap_entry(frame: &mut TrapFrame) {
    let Some(smp) = SMP.get() else {
        panic!("trap before the SMP state exists\n{frame}");
    };
    match smp.trap_entry(&KernelOnly, frame) {
        TrapOutcome::Resume => {}
        TrapOutcome::TaskDestroyed => panic!("task destroyed in a kernel without tasks"),
    }
}

fn irq_entry(frame: &mut TrapFrame) {
    let Some(smp) = SMP.get() else {
        panic!("interrupt before the SMP state exists\n{frame}");
    };
    smp.irq_entry(&KernelOnly, frame);
}

/// Entered from the boot stub on the boot core, interrupts off, with the
/// measured TSC frequency.
///
/// # Panics
/// If it is entered twice.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(tsc_hz: u64) -> ! {
    let _ = LOGGER.init();
    log::info!("booting, TSC at {tsc_hz} Hz");

    let hw = PLATFORM
        .get_or_init(|| X86Platform::new(BootPages::new(), tsc_hz, LAPIC_TIMER_VECTOR));
    hw.calibrate();
    let traps = TRAPS.get_or_init(|| TrapDispatcher::new(hw));
    let smp = SMP.get_or_init(|| SmpState::new(hw, traps, BootConfig::default()));

    if set_trap_hook(trap_entry).is_err() || set_irq_hook(irq_entry).is_err() {
        panic!("entry hooks set twice");
    }

    let mut storage = [(0, 0); STUB_COUNT];
    if smp.install_boot_core(&stub_table(&mut storage)).is_err() {
        panic!("vector table installed twice");
    }

    let report = smp.bring_up_cores();
    if report.timed_out {
        log::warn!("gave up waiting for late cores");
    }
    log::info!(
        "{} cores online after {} Startup-IPIs",
        report.num_cores,
        report.startup_ipis
    );

    loop {
        hw.halt();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    X86Irq::disable_irq();
    log::error!("{info}");
    loop {
        core::hint::spin_loop();
    }
}
