//! The 8259 PIC pair, remapped away from the exception vectors.

use super::ports::{inb, io_wait, outb};

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT_ICW4: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const OCW2_EOI: u8 = 0x20;
const OCW3_READ_ISR: u8 = 0x0B;

/// Reinitializes both chips so IRQ `n` arrives on `offset + n`, all lines masked.
///
/// # Safety
/// Interrupts must be disabled on the executing core.
pub unsafe fn remap(offset: u8) {
    unsafe {
        outb(PIC1_CMD, ICW1_INIT_ICW4);
        io_wait();
        outb(PIC2_CMD, ICW1_INIT_ICW4);
        io_wait();
        outb(PIC1_DATA, offset);
        io_wait();
        outb(PIC2_DATA, offset + 8);
        io_wait();
        // Slave on IRQ 2.
        outb(PIC1_DATA, 1 << 2);
        io_wait();
        outb(PIC2_DATA, 2);
        io_wait();
        outb(PIC1_DATA, ICW4_8086);
        io_wait();
        outb(PIC2_DATA, ICW4_8086);
        io_wait();

        // Everything but the cascade line starts masked.
        outb(PIC1_DATA, 0xFF & !(1 << 2));
        outb(PIC2_DATA, 0xFF);
    }
}

pub unsafe fn mask(irq: u8) {
    let (port, bit) = if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    };
    unsafe {
        let current = inb(port);
        outb(port, current | (1 << bit));
    }
}

pub unsafe fn eoi(irq: u8) {
    unsafe {
        if irq >= 8 {
            outb(PIC2_CMD, OCW2_EOI);
        }
        outb(PIC1_CMD, OCW2_EOI);
    }
}

/// Both in-service registers, slave in the high byte.
pub unsafe fn in_service() -> u16 {
    unsafe {
        outb(PIC1_CMD, OCW3_READ_ISR);
        outb(PIC2_CMD, OCW3_READ_ISR);
        (u16::from(inb(PIC2_CMD)) << 8) | u16::from(inb(PIC1_CMD))
    }
}
