//! # Global Descriptor Table for long mode
//!
//! Segmentation is mostly off in long mode, but selectors still carry the
//! privilege level, and the TSS is still found through a 16-byte system
//! descriptor in the GDT.
//!
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (64-bit, DPL=0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS`])
//! 3     | 0x18     | User data (DPL=3) → with RPL=3: **0x1b** ([`USER_DS`])
//! 4     | 0x20     | User code (64-bit, DPL=3) → with RPL=3: **0x23** ([`USER_CS`])
//! 5/6   | 0x28     | TSS (16-byte system descriptor; [`TSS_SEL`])
//!
//! Every core gets its own copy inside its [`DescriptorBlob`](crate::DescriptorBlob),
//! because the TSS descriptor differs per core.

pub mod descriptors;

use crate::gdt::descriptors::{Desc64, TssDesc64};
use bitfield_struct::bitfield;
use core::mem::size_of;

/// A segment selector: `| index(13) | TI | RPL(2) |`.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct Selector {
    /// Requested privilege level.
    #[bits(2)]
    pub rpl: u8,
    /// 0 = GDT, 1 = LDT.
    #[bits(1)]
    pub ti: bool,
    #[bits(13)]
    pub index: u16,
}

impl Selector {
    #[must_use]
    pub const fn gdt(index: u16, rpl: u8) -> Self {
        Self::new().with_index(index).with_rpl(rpl)
    }
}

pub const KERNEL_CS: u16 = Selector::gdt(1, 0).into_bits();
pub const KERNEL_DS: u16 = Selector::gdt(2, 0).into_bits();
pub const USER_DS: u16 = Selector::gdt(3, 3).into_bits();
pub const USER_CS: u16 = Selector::gdt(4, 3).into_bits();
pub const TSS_SEL: u16 = Selector::gdt(5, 0).into_bits();

const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(USER_DS == 0x1b);
    assert!(USER_CS == 0x23);
    assert!(TSS_SEL == 0x28);
    // Seven slots, padded to the 16-byte alignment.
    assert!(size_of::<Gdt>() == 64);
};

/// The GDT layout described in the module docs.
#[repr(C, align(16))]
#[derive(Copy, Clone)]
pub struct Gdt {
    null: Desc64,
    kcode: Desc64,
    /// Must directly follow `kcode` for `SYSCALL`.
    kdata: Desc64,
    /// Must directly precede `ucode` for `SYSRET`.
    udata: Desc64,
    ucode: Desc64,
    tss: TssDesc64,
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    /// Flat code and data segments, TSS descriptor not yet present.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            null: Desc64 { raw: 0 },
            kcode: Desc64::from_code_dpl(0),
            kdata: Desc64::from_data_dpl(0),
            udata: Desc64::from_data_dpl(3),
            ucode: Desc64::from_code_dpl(3),
            tss: TssDesc64::MISSING,
        }
    }

    pub const fn set_tss(&mut self, tss: TssDesc64) {
        self.tss = tss;
    }

    #[must_use]
    pub const fn tss(&self) -> TssDesc64 {
        self.tss
    }

    /// Raw descriptor at `index`; the TSS spans indices 5 and 6.
    #[must_use]
    pub const fn raw(&self, index: usize) -> Option<u64> {
        match index {
            0 => Some(self.null.to_u64()),
            1 => Some(self.kcode.to_u64()),
            2 => Some(self.kdata.to_u64()),
            3 => Some(self.udata.to_u64()),
            4 => Some(self.ucode.to_u64()),
            5 => Some(self.tss.low.into_bits()),
            6 => Some(self.tss.high.into_bits()),
            _ => None,
        }
    }
}
