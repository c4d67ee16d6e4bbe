use bitfield_struct::bitfield;

/// RFLAGS as seen in 64-bit mode.
///
/// Only the bits the kernel core reads or writes are named; the rest are
/// kept opaque so round trips through [`Rflags::from_bits`] preserve them.
#[bitfield(u64, order = Lsb)]
pub struct Rflags {
    pub cf_carry: bool, // 0

    /// Always 1 in 64-bit mode.
    #[bits(default = true)]
    _always1: bool, // 1

    #[bits(6)]
    _arith: u8, // 2..=7

    pub tf_trap: bool, // 8

    /// Interrupt Enable Flag
    pub if_interrupt_enable: bool, // 9

    pub df_direction: bool, // 10

    _of: bool, // 11

    /// I/O Privilege Level
    #[bits(2)]
    pub iopl: u8, // 12..=13

    #[bits(50)]
    _rest: u64,
}

impl Rflags {
    /// Bit mask of the interrupt enable flag.
    pub const IF_MASK: u64 = 1 << 9;
}

#[cfg(target_arch = "x86_64")]
impl crate::registers::LoadRegister for Rflags {
    #[inline]
    fn load() -> Self {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nomem, preserves_flags));
        }
        Self::from_bits(rflags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_is_bit_nine() {
        let flags = Rflags::new().with_if_interrupt_enable(true);
        assert_eq!(flags.into_bits() & Rflags::IF_MASK, Rflags::IF_MASK);
        assert_eq!(flags.into_bits() & 0b10, 0b10);
    }
}
