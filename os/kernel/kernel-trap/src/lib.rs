//! # Traps, interrupts and remote calls
//!
//! Everything between "the CPU pushed a frame" and "the right code ran":
//!
//! - [`idt`]: the 256-gate vector table and its bitfield gate attributes.
//! - [`gdt`] / [`tss`] / [`DescriptorBlob`]: the per-core segment tables a
//!   core needs before it can take a trap from user mode.
//! - [`TrapFrame`]: the saved register state, with a [`Display`](core::fmt::Display)
//!   dump used on fatal paths.
//! - [`HandlerTable`]: per-vector `(handler, context)` slots for IRQs.
//! - [`TrapDispatcher`]: builds and installs the vector table, classifies
//!   traps, routes IRQs and their end-of-interrupt.
//! - [`RemoteCalls`]: "run this handler on that set of cores", built on
//!   checklists and the vectors `0xF0..=0xF4`.
//!
//! Policy (what a syscall does, how a page fault is resolved, what
//! destroying a task means) lives behind [`TrapEnvironment`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod blob;
mod context;
mod dispatch;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod entry;
mod env;
mod fault;
mod frame;
pub mod gdt;
mod handlers;
pub mod idt;
mod remote;
pub mod tss;

pub use blob::DescriptorBlob;
pub use context::{ContextDepth, CoreContext, DepthGuard};
pub use dispatch::{StubTable, TrapDispatcher};
pub use env::{FaultError, KernelOnly, TrapEnvironment, TrapOutcome};
pub use fault::PageFaultError;
pub use frame::{Privilege, TrapFrame, trap_name};
pub use handlers::{HandlerTable, Isr};
pub use remote::{CallHandle, CallTarget, CoreTopology, RemoteCallError, RemoteCalls};

/// Divide error, the first architectural exception.
pub const T_DIVIDE: u8 = 0;
pub const T_BRKPT: u8 = 3;
pub const T_PGFLT: u8 = 14;
/// Software interrupt used for system calls; the only trap gate.
pub const T_SYSCALL: u8 = 0x80;

/// First vector the legacy PIC delivers on after remapping.
pub const PIC1_OFFSET: u8 = 0x20;
/// One past the last PIC vector.
pub const PIC_END: u8 = 0x30;

/// One-shot local timer, drives the per-core alarm chains.
pub const LAPIC_TIMER_VECTOR: u8 = 0xEF;

/// Vector window reserved for cross-core function calls.
pub const REMOTE_CALL_BASE: u8 = 0xF0;
pub const REMOTE_CALL_LAST: u8 = 0xFF;
/// Calls that may be in flight at once; each owns one vector from
/// [`REMOTE_CALL_BASE`].
pub const NUM_HANDLER_WRAPPERS: usize = 5;

/// Trap number the catch-all entry reports. Out of range for any gate.
pub const CATCH_ALL_TRAPNO: u64 = 500;
