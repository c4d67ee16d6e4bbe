//! # Hardware Access Layer
//!
//! Every privileged operation the trap, SMP and alarm crates perform goes
//! through the capability traits in this crate:
//!
//! | Trait | Covers |
//! |---|---|
//! | [`IrqControl`] | the local interrupt flag of the executing core |
//! | [`CycleCounter`] | cycle counter reads, its frequency, busy delays |
//! | [`LocalApic`] | core ids, EOI, IPIs, INIT/SIPI, the one-shot core timer |
//! | [`LegacyPic`] | remapping, masking and acknowledging the 8259 pair |
//! | [`DescriptorTables`] | `lidt`, `lgdt`, `ltr` |
//! | [`CpuSetup`] | fault address, FPU/SSE/MTRR setup, halting |
//! | [`BootMemory`] | stacks, zeroed blobs, the low-memory trampoline |
//!
//! [`Platform`] bundles all of them. Two backends exist:
//!
//! * `x86_64::X86Platform` for the bare-metal target (`target_os = "none"`),
//!   built on inline assembly, x2APIC MSRs and the [`registers`] models.
//! * `sim::SimPlatform` (feature `sim`), a simulated multicore machine where
//!   every core is a host thread. All host test suites run against it.

#![cfg_attr(not(any(test, doctest, feature = "sim")), no_std)]
#![allow(unsafe_code)]

mod platform;
pub mod registers;
pub mod trampoline;

#[cfg(feature = "sim")]
pub mod sim;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

pub use platform::{
    BootMemory, CpuSetup, CycleCounter, DescriptorPointer, DescriptorTables, IpiDestination,
    IrqControl, LegacyPic, LocalApic, Platform,
};
pub use trampoline::{ApEntry, TRAMPOLINE_PAGE, TrampolineHeader};

/// Vector the local APIC raises for spurious interrupts.
pub const LAPIC_SPURIOUS_VECTOR: u8 = 0xFF;

/// Size of a small page.
pub const PAGE_SIZE: usize = 4096;

/// Size of a kernel stack handed out by [`BootMemory::alloc_kernel_stack`].
pub const KERNEL_STACK_SIZE: usize = 4 * PAGE_SIZE;
