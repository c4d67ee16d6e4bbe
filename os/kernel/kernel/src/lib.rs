//! # Kernel composition root
//!
//! Ties the crates together on bare metal: the boot stub calls
//! `kernel_main` on the boot core with interrupts off, which
//!
//! 1. installs the QEMU debug console logger,
//! 2. builds the x86-64 platform over the boot memory pool,
//! 3. points the trap and IRQ entry stubs at the SMP state,
//! 4. installs the boot core's tables and starts every other core.
//!
//! On the host only the page pool is built, so it can be tested.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod boot;
mod pages;

pub use pages::PagePool;
