//! Code, data and TSS descriptor encodings.
//!
//! In long mode base and limit of code/data descriptors are ignored; what
//! matters is type, S, DPL, P and, for code, L=1 with DB=0.

use bitfield_struct::bitfield;

/// Layout shared by 64-bit code and data descriptors.
#[bitfield(u64)]
pub struct SegmentDescBits {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] 0b1010 code exec+read, 0b0010 data read/write
    pub s: bool,       // [44]    1 = code/data
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]    64-bit code
    pub db: bool,      // [54]    must be 0 when L=1
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// One 8-byte GDT entry.
#[repr(C)]
#[derive(Copy, Clone)]
pub union Desc64 {
    pub raw: u64,
    pub bits: SegmentDescBits,
}

impl Desc64 {
    /// 64-bit code segment, execute+read.
    #[must_use]
    pub const fn from_code_dpl(dpl: u8) -> Self {
        let bits = SegmentDescBits::new()
            .with_typ(0b1010)
            .with_s(true)
            .with_dpl(dpl & 0b11)
            .with_p(true)
            .with_l(true)
            .with_db(false);
        Self { bits }
    }

    /// Read/write data segment.
    #[must_use]
    pub const fn from_data_dpl(dpl: u8) -> Self {
        let bits = SegmentDescBits::new()
            .with_typ(0b0010)
            .with_s(true)
            .with_dpl(dpl & 0b11)
            .with_p(true);
        Self { bits }
    }

    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        // Every bit pattern is a valid `u64`.
        unsafe { self.raw }
    }
}

/// Low 8 bytes of a 64-bit available TSS descriptor.
#[bitfield(u64)]
pub struct TssDescLow {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] 0x9 available, 0xB busy
    pub s: bool,      // [44]    0 = system
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,      // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,   // [52]
    #[bits(2)]
    __zero: u8, // [54:53]
    pub g: bool,     // [55]
    pub base_hi: u8, // [63:56]
}

/// High 8 bytes: `base[63:32]`, rest reserved.
#[bitfield(u64)]
pub struct TssDescHigh {
    pub base_upper: u32,
    __reserved: u32,
}

/// 16-byte TSS system descriptor (two GDT slots).
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct TssDesc64 {
    pub low: TssDescLow,
    pub high: TssDescHigh,
}

impl TssDesc64 {
    pub const MISSING: Self = Self {
        low: TssDescLow::new(),
        high: TssDescHigh::new(),
    };

    /// Available 64-bit TSS at `base`, `limit` = size - 1.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(base: u64, limit: u32) -> Self {
        let low = TssDescLow::new()
            .with_limit_lo((limit & 0xFFFF) as u16)
            .with_base_lo((base & 0xFFFF) as u16)
            .with_base_mid(((base >> 16) & 0xFF) as u8)
            .with_typ(0x9)
            .with_s(false)
            .with_dpl(0)
            .with_p(true)
            .with_limit_hi(((limit >> 16) & 0xF) as u8)
            .with_base_hi(((base >> 24) & 0xFF) as u8);
        let high = TssDescHigh::new().with_base_upper((base >> 32) as u32);
        Self { low, high }
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        (self.high.base_upper() as u64) << 32
            | (self.low.base_hi() as u64) << 24
            | (self.low.base_mid() as u64) << 16
            | self.low.base_lo() as u64
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.low.p()
    }
}

const _: () = {
    use core::mem::size_of;
    assert!(size_of::<Desc64>() == 8);
    assert!(size_of::<TssDescLow>() == 8);
    assert!(size_of::<TssDescHigh>() == 8);
    assert!(size_of::<TssDesc64>() == 16);
};
