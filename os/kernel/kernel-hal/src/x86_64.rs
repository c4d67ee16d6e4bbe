//! Bare-metal x86-64 backend.

mod apic;
mod pic;
pub mod ports;
mod trampoline;

use crate::registers::{Cr4, LoadRegister, LoadRegisterUnsafe, Msr, Rflags, StoreRegisterUnsafe};
use crate::{
    BootMemory, CpuSetup, CycleCounter, DescriptorPointer, DescriptorTables, IpiDestination,
    IrqControl, KERNEL_STACK_SIZE, LegacyPic, LocalApic, PAGE_SIZE, Platform, TrampolineHeader,
};
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

/// Memory services the surrounding kernel provides to the boot path.
pub trait PageSource: Sync {
    /// Allocates `count` zeroed, contiguous kernel pages.
    fn alloc_pages(&self, count: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `base` and `count` must match a previous [`PageSource::alloc_pages`].
    unsafe fn free_pages(&self, base: NonNull<u8>, count: usize);

    /// Allocates zeroed kernel heap memory.
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Identity-maps physical page `phys` writable and returns the mapping.
    fn map_identity(&self, phys: u64) -> Option<NonNull<u8>>;

    fn unmap(&self, phys: u64);
}

/// Reads the time stamp counter.
#[inline]
pub fn rdtsc() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!("lfence", "rdtsc", out("eax") lo, out("edx") hi, options(nomem, nostack, preserves_flags));
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Interrupt flag of the executing core.
pub struct X86Irq;

impl IrqControl for X86Irq {
    #[inline]
    fn irq_enabled() -> bool {
        Rflags::load().if_interrupt_enable()
    }

    #[inline]
    fn enable_irq() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
    }

    #[inline]
    fn disable_irq() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
    }
}

pub struct X86Platform<P> {
    pages: P,
    tsc_hz: AtomicU64,
    lapic_hz: AtomicU64,
    timer_vector: u8,
}

impl<P: PageSource> X86Platform<P> {
    /// Creates the backend; `timer_vector` receives the one-shot core timer.
    pub const fn new(pages: P, tsc_hz: u64, timer_vector: u8) -> Self {
        Self {
            pages,
            tsc_hz: AtomicU64::new(tsc_hz),
            lapic_hz: AtomicU64::new(0),
            timer_vector,
        }
    }

    /// Enters x2APIC mode and measures the timer clock. Call once per boot,
    /// before any core timer is armed.
    pub fn calibrate(&self) {
        unsafe { apic::enable_x2apic() };
        let hz = unsafe { apic::calibrate_hz(self.tsc_freq(), 10_000) };
        log::info!("LAPIC timer runs at {hz} Hz");
        self.lapic_hz.store(hz, Ordering::Relaxed);
    }
}

impl<P> CycleCounter for X86Platform<P> {
    fn read_tsc(&self) -> u64 {
        rdtsc()
    }

    fn tsc_freq(&self) -> u64 {
        self.tsc_hz.load(Ordering::Relaxed)
    }

    fn udelay(&self, usec: u64) {
        let target = rdtsc() + usec * (self.tsc_freq() / 1_000_000);
        while rdtsc() < target {
            core::hint::spin_loop();
        }
    }
}

impl<P> LocalApic for X86Platform<P> {
    fn hw_core_id(&self) -> u32 {
        apic::x2apic_id()
    }

    fn lapic_enable(&self) {
        unsafe {
            apic::enable_x2apic();
            apic::software_enable();
        }
    }

    fn lapic_set_logical_id(&self, id: u8) {
        unsafe { apic::set_logical_id(id) };
    }

    fn lapic_send_eoi(&self) {
        unsafe { apic::eoi() };
    }

    fn lapic_in_service(&self, vector: u8) -> bool {
        apic::in_service(vector)
    }

    fn mask_lint0_extint(&self) {
        unsafe { apic::mask_lint0_extint() };
    }

    fn send_ipi(&self, dest: IpiDestination, vector: u8) {
        unsafe { apic::send_ipi(dest, vector) };
    }

    fn send_init_ipi(&self) {
        unsafe { apic::send_init() };
    }

    fn send_startup_ipi(&self, page: u8) {
        unsafe { apic::send_startup(page) };
    }

    fn lapic_wait_to_send(&self) {
        apic::wait_to_send();
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_core_timer(&self, usec: u64) {
        let ticks_per_us = (self.lapic_hz.load(Ordering::Relaxed) / 16 / 1_000_000).max(1);
        let ticks = (usec * ticks_per_us).clamp(1, u64::from(u32::MAX)) as u32;
        unsafe { apic::arm_one_shot(self.timer_vector, ticks) };
    }

    fn disarm_core_timer(&self) {
        unsafe { apic::disarm(self.timer_vector) };
    }
}

impl<P> LegacyPic for X86Platform<P> {
    fn pic_remap(&self, offset: u8) {
        unsafe { pic::remap(offset) };
    }

    fn pic_mask_irq(&self, irq: u8) {
        unsafe { pic::mask(irq) };
    }

    fn pic_send_eoi(&self, irq: u8) {
        unsafe { pic::eoi(irq) };
    }

    fn pic_in_service(&self) -> u16 {
        unsafe { pic::in_service() }
    }
}

impl<P> DescriptorTables for X86Platform<P> {
    unsafe fn load_idt(&self, ptr: &DescriptorPointer) {
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) core::ptr::from_ref(ptr), options(readonly, nostack, preserves_flags));
        }
    }

    unsafe fn load_gdt(&self, ptr: &DescriptorPointer) {
        unsafe {
            core::arch::asm!("lgdt [{}]", in(reg) core::ptr::from_ref(ptr), options(readonly, nostack, preserves_flags));
        }
    }

    unsafe fn load_task_register(&self, selector: u16) {
        unsafe {
            core::arch::asm!("ltr {0:x}", in(reg) selector, options(nostack, preserves_flags));
        }
    }
}

impl<P> CpuSetup for X86Platform<P> {
    fn fault_address(&self) -> u64 {
        let cr2: u64;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        cr2
    }

    fn fpu_init(&self) {
        unsafe { core::arch::asm!("fninit", options(nomem, nostack)) };
    }

    fn enable_sse(&self) {
        unsafe {
            let cr4 = Cr4::load_unsafe();
            cr4.with_sse().store_unsafe();
        }
    }

    fn setup_default_mtrrs(&self) {
        // MTRRs enabled, default type write-back.
        const MTRR_ENABLE: u64 = 1 << 11;
        const TYPE_WRITE_BACK: u64 = 0x06;
        unsafe { Msr::IA32_MTRR_DEF_TYPE.store_raw(MTRR_ENABLE | TYPE_WRITE_BACK) };
    }

    fn halt(&self) {
        unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) };
    }
}

impl<P: PageSource> BootMemory for X86Platform<P> {
    fn alloc_page(&self) -> Option<NonNull<u8>> {
        self.pages.alloc_pages(1)
    }

    unsafe fn free_page(&self, page: NonNull<u8>) {
        unsafe { self.pages.free_pages(page, 1) };
    }

    fn alloc_kernel_stack(&self) -> Option<u64> {
        let base = self.pages.alloc_pages(KERNEL_STACK_SIZE / PAGE_SIZE)?;
        Some(base.as_ptr() as u64 + KERNEL_STACK_SIZE as u64)
    }

    fn alloc_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.pages.alloc(layout)
    }

    fn install_trampoline(&self, phys: u64) -> Option<&'static TrampolineHeader> {
        let page = self.pages.map_identity(phys)?;
        let header = unsafe { trampoline::copy_to(page) };
        header
            .page_table
            .store(trampoline::current_page_table(), Ordering::Release);
        Some(header)
    }

    fn remove_trampoline(&self, phys: u64) {
        self.pages.unmap(phys);
    }
}

impl<P: PageSource> Platform for X86Platform<P> {
    type Irq = X86Irq;
}
