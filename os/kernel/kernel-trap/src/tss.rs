//! # 64-bit Task State Segment
//!
//! No hardware task switching in long mode, but the CPU still reads the TSS
//! for two things:
//!
//! - `rsp0`, the stack it switches to when a trap raises the privilege level
//!   from user to kernel;
//! - `ist1..ist7`, alternate stacks selected by a gate's IST index.
//!
//! `iopb_offset` at the end of the segment disables the I/O bitmap.

use core::mem::size_of;

const _: () = assert!(size_of::<Tss64>() == 104);

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Tss64 {
    _reserved0: u32,
    /// Stack loaded on a user → kernel transition.
    pub rsp0: u64,
    pub rsp1: u64,
    pub rsp2: u64,
    _reserved1: u64,
    /// Interrupt Stack Table, `ist[n - 1]` for gate IST index `n`.
    pub ist: [u64; 7],
    _reserved2: u64,
    _reserved3: u16,
    pub iopb_offset: u16,
}

impl Default for Tss64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Tss64 {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new() -> Self {
        Self {
            _reserved0: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            _reserved1: 0,
            ist: [0; 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }

    /// Limit for the TSS descriptor.
    #[allow(clippy::cast_possible_truncation)]
    pub const LIMIT: u32 = (size_of::<Self>() - 1) as u32;
}
