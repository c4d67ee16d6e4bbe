//! # x86 I/O Port Access
//!
//! Thin wrappers around `in`/`out` for the legacy devices the kernel core
//! still talks to: the 8259 PIC pair and the QEMU debug console.
//!
//! ```text
//! 0x0020-0x0021   PIC #1 (command, data)
//! 0x0080          POST diagnostic port, used as an I/O delay
//! 0x00A0-0x00A1   PIC #2 (command, data)
//! 0x0402          QEMU debug console
//! ```

/// Write one byte to an I/O port.
///
/// # Safety
/// CPL 0 or an I/O permission covering `port`, and `port` must belong to a
/// device that expects this write in its current state.
#[inline]
pub unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}

/// Read one byte from an I/O port.
///
/// # Safety
/// Same requirements as [`outb`].
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let mut v: u8;
    unsafe {
        core::arch::asm!("in al, dx", in("dx") port, out("al") v, options(nomem, nostack, preserves_flags));
    }
    v
}

/// Roughly one microsecond of delay between PIC programming steps.
#[inline]
pub unsafe fn io_wait() {
    unsafe { outb(0x80, 0) };
}
