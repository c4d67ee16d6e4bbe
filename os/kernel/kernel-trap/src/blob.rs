use crate::gdt::descriptors::TssDesc64;
use crate::gdt::{Gdt, TSS_SEL};
use crate::tss::Tss64;
use kernel_hal::{DescriptorPointer, DescriptorTables};

/// The segment state one core owns exclusively: its GDT copy and its TSS.
///
/// Allocated once when the core comes online and never freed. The GDT
/// refers to the TSS by address, so the blob must not move after
/// [`DescriptorBlob::install`].
#[repr(C, align(16))]
#[derive(Clone, Copy, Default)]
pub struct DescriptorBlob {
    gdt: Gdt,
    tss: Tss64,
}

impl DescriptorBlob {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gdt: Gdt::new(),
            tss: Tss64::new(),
        }
    }

    /// A blob whose GDT copies `gdt`, with a fresh TSS.
    #[must_use]
    pub const fn from_gdt(gdt: &Gdt) -> Self {
        Self {
            gdt: *gdt,
            tss: Tss64::new(),
        }
    }

    /// Sets the stack the CPU switches to when a trap enters the kernel
    /// from user mode. Effective immediately, no reload needed.
    pub const fn set_kernel_stack(&mut self, top: u64) {
        self.tss.rsp0 = top;
    }

    #[must_use]
    pub const fn kernel_stack(&self) -> u64 {
        self.tss.rsp0
    }

    #[must_use]
    pub const fn gdt(&self) -> &Gdt {
        &self.gdt
    }

    #[must_use]
    pub const fn tss(&self) -> &Tss64 {
        &self.tss
    }

    /// Pseudo-descriptor of this blob's GDT.
    #[must_use]
    pub fn gdt_pointer(&self) -> DescriptorPointer {
        DescriptorPointer::of(&self.gdt)
    }

    /// Writes the TSS descriptor for the blob's current address, then loads
    /// the GDT and the task register on the executing core.
    ///
    /// # Safety
    /// The blob must stay at its address and outlive the core's use of it.
    /// The selectors currently loaded must match the GDT's code and data
    /// descriptors.
    pub unsafe fn install(&mut self, hw: &impl DescriptorTables) {
        let base = core::ptr::from_ref(&self.tss) as u64;
        self.gdt.set_tss(TssDesc64::new(base, Tss64::LIMIT));
        let ptr = self.gdt_pointer();
        unsafe {
            hw.load_gdt(&ptr);
            hw.load_task_register(TSS_SEL);
        }
    }
}
