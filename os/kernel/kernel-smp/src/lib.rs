//! # SMP bring-up and per-core state
//!
//! The boot core installs the shared vector table and its own descriptor
//! tables ([`SmpState::install_boot_core`]), then wakes every other core with
//! INIT and Startup-IPIs ([`SmpState::bring_up_cores`]):
//!
//! 1. the startup trampoline is copied to low memory and given a shared
//!    stack and the Rust entry point [`ap_entry`];
//! 2. each core, one at a time under the trampoline lock, registers itself in
//!    the [`CoreMap`] under its hardware id, allocates its kernel stack and
//!    descriptor blob, loads its GDT, TSS and the shared vector table, and
//!    enables its local APIC;
//! 3. the boot core waits for the stragglers, compacts the core map into
//!    dense logical ids and removes the trampoline;
//! 4. every core runs its final init (FPU, SSE, MTRRs, per-core state and
//!    its alarm chain) and meets the others on a barrier.
//!
//! After that, [`SmpState`] is the kernel's [`CoreTopology`](kernel_trap::CoreTopology):
//! remote calls, the trap and IRQ entries and the per-core alarm chains all
//! find the executing core through it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod config;
mod core_map;
mod percpu;
mod state;

pub use config::{BootConfig, StartupIpiPolicy};
pub use core_map::CoreMap;
pub use percpu::{PerCore, PerCoreTimer};
pub use state::{BringUpReport, SmpState, ap_entry};
