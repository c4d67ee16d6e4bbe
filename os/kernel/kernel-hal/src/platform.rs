use crate::trampoline::TrampolineHeader;
use core::alloc::Layout;
use core::ptr::NonNull;

/// Control over the interrupt flag of the **executing** core.
///
/// The functions take no receiver: the flag is per-core hardware state, so
/// callers reach it through the type alone (compare `Rflags::load()`).
pub trait IrqControl {
    /// Returns `true` if maskable interrupts are currently delivered.
    fn irq_enabled() -> bool;

    /// Enables interrupt delivery (`sti`).
    fn enable_irq();

    /// Disables interrupt delivery (`cli`).
    fn disable_irq();
}

/// The free-running cycle counter.
pub trait CycleCounter {
    /// Current counter value.
    fn read_tsc(&self) -> u64;

    /// Counter ticks per second.
    fn tsc_freq(&self) -> u64;

    /// Busy-waits for at least `usec` microseconds.
    fn udelay(&self, usec: u64);
}

/// Target of an inter-processor interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpiDestination {
    /// The sending core only.
    SelfOnly,
    /// Every core, the sender included.
    All,
    /// Every core but the sender.
    AllButSelf,
    /// One core, by hardware id.
    Physical(u32),
}

/// Local interrupt controller of the executing core.
pub trait LocalApic {
    /// Hardware (APIC) id of the executing core.
    fn hw_core_id(&self) -> u32;

    /// Software-enables the local APIC.
    fn lapic_enable(&self);

    /// Programs the logical destination id.
    fn lapic_set_logical_id(&self, id: u8);

    /// Acknowledges the in-service interrupt.
    fn lapic_send_eoi(&self);

    /// Whether `vector` is set in the in-service register. A spurious
    /// interrupt is delivered without ever being in service.
    fn lapic_in_service(&self, vector: u8) -> bool;

    /// Routes LINT0 as ExtINT (`0x700`) and masks it.
    fn mask_lint0_extint(&self);

    fn send_ipi(&self, dest: IpiDestination, vector: u8);

    /// Broadcasts INIT to every core except the sender.
    fn send_init_ipi(&self);

    /// Broadcasts a Startup-IPI pointing at physical page `page`.
    fn send_startup_ipi(&self, page: u8);

    /// Spins until the last IPI left the interrupt command register.
    fn lapic_wait_to_send(&self);

    /// Arms the one-shot core timer to fire after `usec` microseconds.
    fn set_core_timer(&self, usec: u64);

    /// Cancels a pending core timer interrupt.
    fn disarm_core_timer(&self);
}

/// The legacy 8259 PIC pair.
pub trait LegacyPic {
    /// Remaps both PICs so that IRQ `n` arrives on vector `offset + n`.
    fn pic_remap(&self, offset: u8);

    fn pic_mask_irq(&self, irq: u8);

    /// Acknowledges legacy IRQ `irq` (both chips for `irq >= 8`).
    fn pic_send_eoi(&self, irq: u8);

    /// Combined in-service register of both chips, IRQ `n` in bit `n`.
    fn pic_in_service(&self) -> u16;
}

/// Pseudo-descriptor consumed by `lidt` and `lgdt`.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPointer {
    /// Table size in bytes, minus one.
    pub limit: u16,
    /// Linear address of the table.
    pub base: u64,
}

impl DescriptorPointer {
    /// Builds the pseudo-descriptor for `table`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn of<T>(table: &T) -> Self {
        Self {
            limit: (size_of::<T>() - 1) as u16,
            base: core::ptr::from_ref(table) as u64,
        }
    }
}

/// Descriptor-table registers of the executing core.
pub trait DescriptorTables {
    /// # Safety
    /// `ptr` must describe a valid IDT that outlives its use by this core.
    unsafe fn load_idt(&self, ptr: &DescriptorPointer);

    /// # Safety
    /// `ptr` must describe a valid GDT whose code and data descriptors match
    /// the currently loaded selectors.
    unsafe fn load_gdt(&self, ptr: &DescriptorPointer);

    /// # Safety
    /// `selector` must name an available 64-bit TSS descriptor in the loaded GDT.
    unsafe fn load_task_register(&self, selector: u16);
}

/// Per-core processor setup.
pub trait CpuSetup {
    /// Linear address of the last page fault (`CR2`).
    fn fault_address(&self) -> u64;

    /// Resets the x87 FPU (`fninit`).
    fn fpu_init(&self);

    /// Sets `CR4.OSFXSR` and `CR4.OSXMMEXCPT`.
    fn enable_sse(&self);

    /// Enables the default write-back memory type.
    fn setup_default_mtrrs(&self);

    /// Enables interrupts and waits for the next one.
    fn halt(&self);
}

/// Memory used while bringing cores online.
pub trait BootMemory {
    /// Allocates one zeroed page.
    fn alloc_page(&self) -> Option<NonNull<u8>>;

    /// # Safety
    /// `page` must come from [`BootMemory::alloc_page`] and be unused.
    unsafe fn free_page(&self, page: NonNull<u8>);

    /// Allocates a kernel stack and returns its (exclusive) top address.
    fn alloc_kernel_stack(&self) -> Option<u64>;

    /// Allocates zeroed memory that is never returned.
    fn alloc_zeroed(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Maps physical page `phys` writable, copies the startup code there and
    /// returns the header the boot core fills in before waking the others.
    fn install_trampoline(&self, phys: u64) -> Option<&'static TrampolineHeader>;

    /// Removes the mapping created by [`BootMemory::install_trampoline`].
    fn remove_trampoline(&self, phys: u64);
}

/// All hardware capabilities the kernel core needs.
pub trait Platform:
    CycleCounter + LocalApic + LegacyPic + DescriptorTables + CpuSetup + BootMemory + Sync
{
    /// Interrupt flag access for this platform.
    type Irq: IrqControl;
}
