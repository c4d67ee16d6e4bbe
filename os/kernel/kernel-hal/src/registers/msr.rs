/// Identifies a Model-Specific Register by its architectural index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(pub u32);

impl Msr {
    pub const IA32_APIC_BASE: Self = Self(0x1B);
    pub const IA32_MTRR_DEF_TYPE: Self = Self(0x2FF);
    pub const IA32_EFER: Self = Self(0xC000_0080);

    pub const X2APIC_ID: Self = Self(0x802);
    pub const X2APIC_EOI: Self = Self(0x80B);
    pub const X2APIC_LDR: Self = Self(0x80D);
    pub const X2APIC_SVR: Self = Self(0x80F);
    /// First of eight in-service registers, 32 vectors each.
    pub const X2APIC_ISR0: Self = Self(0x810);
    pub const X2APIC_ICR: Self = Self(0x830);
    pub const X2APIC_LVT_TIMER: Self = Self(0x832);
    pub const X2APIC_LVT_LINT0: Self = Self(0x835);
    pub const X2APIC_INIT_COUNT: Self = Self(0x838);
    pub const X2APIC_CURRENT_COUNT: Self = Self(0x839);
    pub const X2APIC_DIV_CONF: Self = Self(0x83E);

    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl Msr {
    /// Writes `val` with `wrmsr`.
    ///
    /// # Safety
    /// CPL 0 only, and the MSR must exist and accept `val`; otherwise `#GP`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn store_raw(self, val: u64) {
        let lo = (val & 0xFFFF_FFFF) as u32;
        let hi = (val >> 32) as u32;
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") self.raw(),
                in("eax") lo,
                in("edx") hi,
                options(nostack, preserves_flags)
            );
        }
    }

    /// Reads the MSR with `rdmsr`.
    ///
    /// # Safety
    /// CPL 0 only, and the MSR must exist.
    #[inline]
    pub unsafe fn load_raw(self) -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") self.raw(),
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}
