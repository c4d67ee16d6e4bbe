//! # QEMU debug console logging
//!
//! A [`log`] backend for kernels running under QEMU. Records are formatted
//! into a fixed stack buffer, one line at a time, and handed to a
//! [`ByteSink`]; the default sink is the QEMU debug console at port `0x402`.
//!
//! Lines carry the logical id of the emitting core when one is known:
//!
//! ```text
//! [INFO] core 0 kernel_smp::state: 4 cores detected
//! [WARN] kernel_trap::dispatch: destroying task 7 after unhandled trap
//! ```
//!
//! ## Host-side configuration
//! ```bash
//! qemu-system-x86_64 ... -debugcon stdio
//! qemu-system-x86_64 ... -debugcon file:debug.log
//! ```
//!
//! ## Setup
//! ```rust,ignore
//! static LOGGER: QemuLogger<DebugPort> =
//!     QemuLogger::new(LevelFilter::Debug, DebugPort, current_core_id);
//! LOGGER.init().expect("logger installed once");
//! ```
//!
//! With the `enabled` feature turned off, [`DebugPort`] discards everything,
//! which keeps release images free of port I/O.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod line;
mod logger;

pub use logger::{CoreIdSource, QemuLogger};

/// Destination for finished log lines.
pub trait ByteSink: Send + Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

/// QEMU's debug console.
pub struct DebugPort;

impl DebugPort {
    /// The port QEMU's `-debugcon` listens on.
    pub const PORT: u16 = 0x402;
}

impl ByteSink for DebugPort {
    #[cfg(all(feature = "enabled", target_arch = "x86_64", target_os = "none"))]
    fn write_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            unsafe { kernel_hal::x86_64::ports::outb(Self::PORT, b) };
        }
    }

    #[cfg(not(all(feature = "enabled", target_arch = "x86_64", target_os = "none")))]
    fn write_bytes(&self, _bytes: &[u8]) {}
}
