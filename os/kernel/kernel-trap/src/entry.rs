//! Low-level entry stubs.
//!
//! Every stub normalizes the stack to a [`TrapFrame`]: vectors without a
//! hardware error code push a zero, then the vector number is pushed and
//! the common path saves the general purpose registers. The common path
//! hands the frame to the trap hook (exceptions and the system call
//! vector) or the IRQ hook (everything else from [`PIC1_OFFSET`] up).

use crate::{CATCH_ALL_TRAPNO, PIC1_OFFSET, StubTable, T_SYSCALL, TrapFrame};
use kernel_sync::SyncOnceCell;

/// Dedicated stubs: the 20 architectural exceptions and every vector from
/// [`PIC1_OFFSET`] up.
pub const STUB_COUNT: usize = 20 + 224;

/// Receives every frame the stubs produce for one class of entry.
pub type EntryHook = fn(&mut TrapFrame);

static TRAP_HOOK: SyncOnceCell<EntryHook> = SyncOnceCell::new();
static IRQ_HOOK: SyncOnceCell<EntryHook> = SyncOnceCell::new();

core::arch::global_asm!(
    r#"
    .altmacro

    .macro TRAP_STUB vec, has_err
    .global trap_stub_\vec
trap_stub_\vec:
    .if \has_err == 0
    push 0
    .endif
    push \vec
    jmp trap_entry_common
    .endm

    .macro STUB_ENTRY vec
    .quad \vec
    .quad trap_stub_\vec
    .endm

    .text
    .set vec, 0
    .rept 20
    .if (vec == 8) || ((vec >= 10) && (vec <= 14)) || (vec == 17)
    TRAP_STUB %vec, 1
    .else
    TRAP_STUB %vec, 0
    .endif
    .set vec, vec + 1
    .endr

    .set vec, 32
    .rept 224
    TRAP_STUB %vec, 0
    .set vec, vec + 1
    .endr

    .global trap_catch_all
trap_catch_all:
    push 0
    push {catch_all}
    jmp trap_entry_common

trap_entry_common:
    push r15
    push r14
    push r13
    push r12
    push r11
    push r10
    push r9
    push r8
    push rdi
    push rsi
    push rbp
    push rdx
    push rcx
    push rbx
    push rax
    cld
    mov rdi, rsp
    call {common}
    pop rax
    pop rbx
    pop rcx
    pop rdx
    pop rbp
    pop rsi
    pop rdi
    pop r8
    pop r9
    pop r10
    pop r11
    pop r12
    pop r13
    pop r14
    pop r15
    add rsp, 16
    iretq

    .section .rodata.trap_stubs, "a"
    .balign 8
    .global trap_stub_table
trap_stub_table:
    .set vec, 0
    .rept 20
    STUB_ENTRY %vec
    .set vec, vec + 1
    .endr
    .set vec, 32
    .rept 224
    STUB_ENTRY %vec
    .set vec, vec + 1
    .endr
    .text
    .noaltmacro
    "#,
    catch_all = const CATCH_ALL_TRAPNO,
    common = sym trap_common,
);

#[repr(C)]
struct StubEntry {
    vector: u64,
    addr: u64,
}

unsafe extern "C" {
    static trap_stub_table: [StubEntry; STUB_COUNT];
    static trap_catch_all: u8;
}

extern "C" fn trap_common(frame: &mut TrapFrame) {
    let is_irq = frame
        .vector()
        .is_some_and(|v| v >= PIC1_OFFSET && v != T_SYSCALL);
    let hook = if is_irq { &IRQ_HOOK } else { &TRAP_HOOK };
    match hook.get() {
        Some(hook) => hook(frame),
        None => panic!("trap before the entry hooks were set\n{frame}"),
    }
}

/// Routes exceptions and system calls to `hook`. Set once at boot.
///
/// # Errors
/// Hands `hook` back if one was already set.
pub fn set_trap_hook(hook: EntryHook) -> Result<(), EntryHook> {
    TRAP_HOOK.set(hook)
}

/// Routes device interrupts and IPIs to `hook`. Set once at boot.
///
/// # Errors
/// Hands `hook` back if one was already set.
pub fn set_irq_hook(hook: EntryHook) -> Result<(), EntryHook> {
    IRQ_HOOK.set(hook)
}

/// Addresses of the linked-in stubs, written to `storage`.
#[allow(clippy::cast_possible_truncation)]
pub fn stub_table(storage: &mut [(u8, u64); STUB_COUNT]) -> StubTable<'_> {
    // SAFETY: both symbols are defined by the assembly above and immutable.
    let (table, catch_all) = unsafe { (&*(&raw const trap_stub_table), &raw const trap_catch_all) };
    for (slot, entry) in storage.iter_mut().zip(table) {
        *slot = (entry.vector as u8, entry.addr);
    }
    StubTable {
        catch_all: catch_all as u64,
        stubs: storage,
    }
}
