use bitfield_struct::bitfield;

/// CR4, reduced to the feature bits the kernel core programs.
#[bitfield(u64, order = Lsb)]
pub struct Cr4 {
    #[bits(5)]
    _low: u8, // 0..=4

    /// Physical Address Extension, required for long mode.
    pub pae: bool, // 5

    _mce: bool, // 6

    /// Global pages.
    pub pge: bool, // 7

    _pce: bool, // 8

    /// OS supports FXSAVE/FXRSTOR.
    pub osfxsr: bool, // 9

    /// OS handles unmasked SIMD floating point exceptions.
    pub osxmmexcpt: bool, // 10

    #[bits(53)]
    _high: u64,
}

impl Cr4 {
    /// Returns `self` with SSE enabled for the operating system.
    #[must_use]
    pub const fn with_sse(self) -> Self {
        self.with_osfxsr(true).with_osxmmexcpt(true)
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl crate::registers::LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let cr4: u64;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl crate::registers::StoreRegisterUnsafe for Cr4 {
    unsafe fn store_unsafe(self) {
        let cr4 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr4, {}", in(reg) cr4, options(nomem, nostack, preserves_flags));
        }
    }
}
