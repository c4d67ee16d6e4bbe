//! # Interrupt Descriptor Table
//!
//! 256 gate descriptors of 16 bytes each, pointed to by the IDTR. Entries are
//! written through a small fluent builder:
//!
//! ```ignore
//! idt[T_SYSCALL as usize]
//!     .set_handler(syscall_stub)
//!     .selector(KERNEL_CS)
//!     .dpl(3)
//!     .gate_trap()
//!     .present(true);
//! ```
//!
//! The table is plain data. Building it, freezing it and loading it on every
//! core is the dispatcher's job, see
//! [`TrapDispatcher::install_vector_table`](crate::TrapDispatcher::install_vector_table).
//!
//! ## Trap vs. interrupt gates
//! - **Interrupt gates** clear IF on entry. Used for everything except the
//!   system call vector.
//! - **Trap gates** leave IF unchanged.

use crate::gdt::KERNEL_CS;
use bitfield_struct::bitfield;
use core::mem::size_of;
use core::ops::{Index, IndexMut};

const _: () = assert!(size_of::<IdtEntry>() == 16);
const _: () = assert!(align_of::<Idt>() == 16);
const _: () = assert!(size_of::<Idt>() == 256 * 16);

/// The attribute half-word of a gate:
///
/// - **low byte**: `IST` (3 bits) + 5 reserved zero bits
/// - **high byte**: `| P | DPL(2) | S(0) | Type(4) |`
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct IdtGateAttr {
    /// Interrupt Stack Table index, 0 keeps the current stack.
    #[bits(3)]
    pub ist: u8,

    #[bits(5)]
    __zero0: u8,

    /// 0xE = interrupt gate, 0xF = trap gate.
    #[bits(4)]
    pub typ: u8,

    /// Must be zero for interrupt and trap gates.
    #[bits(1)]
    pub s: bool,

    /// Lowest privilege allowed to raise the vector with `int n`.
    #[bits(2)]
    pub dpl: u8,

    #[bits(1)]
    pub present: bool,
}

impl IdtGateAttr {
    #[inline]
    #[must_use]
    pub const fn interrupt_gate() -> Self {
        Self::new().with_typ(0xE).with_s(false)
    }

    #[inline]
    #[must_use]
    pub const fn trap_gate() -> Self {
        Self::new().with_typ(0xF).with_s(false)
    }

    #[must_use]
    pub const fn gate_type(self) -> Option<GateType> {
        match self.typ() {
            0xE => Some(GateType::InterruptGate),
            0xF => Some(GateType::TrapGate),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GateType {
    /// Clears `IF` on entry.
    InterruptGate,
    /// Leaves `IF` unchanged.
    TrapGate,
}

/// A 256-entry vector table.
#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    /// All gates non-present.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdtEntry> {
        self.entries.iter()
    }
}

impl Index<usize> for Idt {
    type Output = IdtEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

/// One 16-byte gate descriptor.
///
/// ```text
/// 127            96 95                    64
/// +---------------+------------------------+
/// |     zero      |     offset[63:32]      |
/// +---------------+------------------------+
/// 63         48 47      32 31     16 15    0
/// +------------+----------+---------+------+
/// |offset[31:16]| attr    | selector|off lo|
/// +------------+----------+---------+------+
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    attr: u16,
    offset_mid: u16,
    offset_hi: u32,
    zero: u32,
}

impl IdtEntry {
    /// A zeroed, non-present entry.
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        attr: IdtGateAttr::new().into_bits(),
        offset_mid: 0,
        offset_hi: 0,
        zero: 0,
    };

    /// Points the gate at `handler` and resets it to a kernel-only,
    /// non-present interrupt gate on [`KERNEL_CS`].
    #[allow(clippy::cast_possible_truncation)]
    pub const fn set_handler(&mut self, handler: u64) -> IdtEntryBuilder<'_> {
        self.offset_lo = (handler & 0xFFFF) as u16;
        self.offset_mid = ((handler >> 16) & 0xFFFF) as u16;
        self.offset_hi = (handler >> 32) as u32;
        self.selector = KERNEL_CS;
        self.attr = IdtGateAttr::interrupt_gate().into_bits();
        IdtEntryBuilder { entry: self }
    }

    #[must_use]
    pub const fn handler_address(&self) -> u64 {
        (self.offset_hi as u64) << 32 | (self.offset_mid as u64) << 16 | self.offset_lo as u64
    }

    #[must_use]
    pub const fn selector(&self) -> u16 {
        self.selector
    }

    #[must_use]
    pub const fn attributes(&self) -> IdtGateAttr {
        IdtGateAttr::from_bits(self.attr)
    }

    #[must_use]
    pub const fn dpl(&self) -> u8 {
        self.attributes().dpl()
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.attributes().present()
    }

    /// Edits the attributes of an already pointed gate.
    pub const fn modify(&mut self) -> IdtEntryBuilder<'_> {
        IdtEntryBuilder { entry: self }
    }
}

/// Fluent builder returned by [`IdtEntry::set_handler`].
pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    /// Must be `true` for a usable gate.
    #[inline]
    pub const fn present(self, p: bool) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.attr).with_present(p);
        self.entry.attr = bf.into_bits();
        self
    }

    /// `dpl(3)` lets user code raise the vector with `int n`.
    #[inline]
    pub fn dpl(self, dpl: u8) -> Self {
        debug_assert!(dpl <= 3);
        let bf = IdtGateAttr::from_bits(self.entry.attr).with_dpl(dpl);
        self.entry.attr = bf.into_bits();
        self
    }

    #[inline]
    pub const fn gate_interrupt(self) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.attr)
            .with_typ(0xE)
            .with_s(false);
        self.entry.attr = bf.into_bits();
        self
    }

    #[inline]
    pub const fn gate_trap(self) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.attr)
            .with_typ(0xF)
            .with_s(false);
        self.entry.attr = bf.into_bits();
        self
    }

    #[inline]
    pub const fn gate_type(self, gate_type: GateType) -> Self {
        match gate_type {
            GateType::InterruptGate => self.gate_interrupt(),
            GateType::TrapGate => self.gate_trap(),
        }
    }

    /// Interrupt Stack Table slot, 0 disables the switch.
    #[inline]
    pub fn ist(self, idx: u8) -> Self {
        debug_assert!(idx <= 7);
        let bf = IdtGateAttr::from_bits(self.entry.attr).with_ist(idx);
        self.entry.attr = bf.into_bits();
        self
    }

    #[inline]
    pub const fn selector(self, sel: u16) -> Self {
        self.entry.selector = sel;
        self
    }
}
