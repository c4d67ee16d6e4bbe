//! Local APIC access in x2APIC mode.

use crate::{IpiDestination, LAPIC_SPURIOUS_VECTOR};
use crate::registers::Msr;
use core::hint::spin_loop;

const APIC_EN: u64 = 1 << 11;
const APIC_EXTD: u64 = 1 << 10;

const SVR_SOFT_ENABLE: u64 = 1 << 8;

const LVT_MASKED: u64 = 1 << 16;
const LINT0_EXTINT: u64 = 0x700;

const ICR_FIXED: u64 = 0b000 << 8;
const ICR_INIT: u64 = 0b101 << 8;
const ICR_STARTUP: u64 = 0b110 << 8;
const ICR_ASSERT: u64 = 1 << 14;
const ICR_PENDING: u64 = 1 << 12;

const SHORTHAND_NONE: u64 = 0b00 << 18;
const SHORTHAND_SELF: u64 = 0b01 << 18;
const SHORTHAND_ALL: u64 = 0b10 << 18;
const SHORTHAND_ALL_BUT_SELF: u64 = 0b11 << 18;

/// Divide-by-16 in the timer divide configuration register.
const DIV_16: u64 = 0b0011;

/// Switches the local APIC into x2APIC mode.
pub unsafe fn enable_x2apic() {
    unsafe {
        let base = Msr::IA32_APIC_BASE.load_raw();
        Msr::IA32_APIC_BASE.store_raw(base | APIC_EN | APIC_EXTD);
    }
}

#[allow(clippy::cast_possible_truncation)]
pub fn x2apic_id() -> u32 {
    unsafe { Msr::X2APIC_ID.load_raw() as u32 }
}

pub unsafe fn software_enable() {
    unsafe { Msr::X2APIC_SVR.store_raw(SVR_SOFT_ENABLE | u64::from(LAPIC_SPURIOUS_VECTOR)) };
}

pub unsafe fn eoi() {
    unsafe { Msr::X2APIC_EOI.store_raw(0) };
}

pub fn in_service(vector: u8) -> bool {
    let isr = Msr(Msr::X2APIC_ISR0.raw() + u32::from(vector / 32));
    unsafe { isr.load_raw() & (1 << (vector % 32)) != 0 }
}

pub unsafe fn set_logical_id(id: u8) {
    // The LDR is read-only in x2APIC mode; logical ids derive from the APIC id.
    let _ = id;
}

pub unsafe fn mask_lint0_extint() {
    unsafe {
        Msr::X2APIC_LVT_LINT0.store_raw(LINT0_EXTINT);
        Msr::X2APIC_LVT_LINT0.store_raw(LINT0_EXTINT | LVT_MASKED);
    }
}

pub unsafe fn send_ipi(dest: IpiDestination, vector: u8) {
    let (shorthand, target) = match dest {
        IpiDestination::SelfOnly => (SHORTHAND_SELF, 0),
        IpiDestination::All => (SHORTHAND_ALL, 0),
        IpiDestination::AllButSelf => (SHORTHAND_ALL_BUT_SELF, 0),
        IpiDestination::Physical(id) => (SHORTHAND_NONE, u64::from(id) << 32),
    };
    let icr = target | shorthand | ICR_ASSERT | ICR_FIXED | u64::from(vector);
    unsafe { Msr::X2APIC_ICR.store_raw(icr) };
}

pub unsafe fn send_init() {
    unsafe {
        Msr::X2APIC_ICR.store_raw(SHORTHAND_ALL_BUT_SELF | ICR_ASSERT | ICR_INIT);
    }
}

pub unsafe fn send_startup(page: u8) {
    unsafe {
        Msr::X2APIC_ICR
            .store_raw(SHORTHAND_ALL_BUT_SELF | ICR_ASSERT | ICR_STARTUP | u64::from(page));
    }
}

pub fn wait_to_send() {
    // Always clear in x2APIC mode; kept for xAPIC-compatible hypervisors.
    while unsafe { Msr::X2APIC_ICR.load_raw() } & ICR_PENDING != 0 {
        spin_loop();
    }
}

/// Arms a one-shot timer on `vector` that fires after `ticks` bus ticks / 16.
pub unsafe fn arm_one_shot(vector: u8, ticks: u32) {
    unsafe {
        Msr::X2APIC_DIV_CONF.store_raw(DIV_16);
        Msr::X2APIC_LVT_TIMER.store_raw(u64::from(vector));
        Msr::X2APIC_INIT_COUNT.store_raw(u64::from(ticks));
    }
}

pub unsafe fn disarm(vector: u8) {
    unsafe {
        Msr::X2APIC_LVT_TIMER.store_raw(u64::from(vector) | LVT_MASKED);
        Msr::X2APIC_INIT_COUNT.store_raw(0);
    }
}

/// Measures the timer input clock against the cycle counter.
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn calibrate_hz(tsc_hz: u64, window_us: u64) -> u64 {
    unsafe {
        Msr::X2APIC_DIV_CONF.store_raw(DIV_16);
        Msr::X2APIC_LVT_TIMER.store_raw(LVT_MASKED | 0xFF);
        Msr::X2APIC_INIT_COUNT.store_raw(0xFFFF_FFFF);
    }

    let start = super::rdtsc();
    let target = start + (tsc_hz / 1_000_000) * window_us;
    while super::rdtsc() < target {
        spin_loop();
    }

    let current = unsafe { Msr::X2APIC_CURRENT_COUNT.load_raw() } as u32;
    let elapsed = 0xFFFF_FFFF_u64 - u64::from(current);
    elapsed * 1_000_000 / window_us * 16
}
