//! Real-mode startup code for application processors.
//!
//! A Startup-IPI starts the core at `TRAMPOLINE_PAGE:0` in real mode. The code
//! below enters long mode directly, takes the boot lock, runs the published
//! [`ApEntry`](crate::ApEntry) on the shared stack, switches to the returned
//! private stack, leaves the semaphore and the lock, and halts with interrupts
//! enabled. All addresses are computed relative to the page the image is
//! copied to.

use crate::TRAMPOLINE_PAGE;
use crate::trampoline::TrampolineHeader;
use core::ptr::NonNull;

core::arch::global_asm!(
    r#"
    .section .rodata.ap_trampoline, "a"
    .set TRAMP_BASE, {base}
    .set TRAMP_LOCK,  ap_tramp_lock  - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_SEM,   ap_tramp_sem   - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_STACK, ap_tramp_stack - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_ENTRY, ap_tramp_entry - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_CTX,   ap_tramp_ctx   - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_CR3,   ap_tramp_cr3   - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_GDTP,  ap_tramp_gdtp  - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_GDT,   ap_tramp_gdt   - ap_trampoline_start + TRAMP_BASE
    .set TRAMP_LONG,  ap_tramp_long  - ap_trampoline_start + TRAMP_BASE

    .global ap_trampoline_start
    .global ap_trampoline_end

    .code16
ap_trampoline_start:
    jmp ap_tramp_real
    .balign 8
ap_tramp_lock:  .long 0
ap_tramp_sem:   .long 0
ap_tramp_stack: .quad 0
ap_tramp_entry: .quad 0
ap_tramp_ctx:   .quad 0
ap_tramp_cr3:   .quad 0

    .balign 8
ap_tramp_gdt:
    .quad 0
    .quad 0x00209A0000000000
    .quad 0x0000920000000000
ap_tramp_gdtp:
    .word 23
    .long TRAMP_GDT

ap_tramp_real:
    cli
    cld
    xorw %ax, %ax
    movw %ax, %ds
    lock incl (TRAMP_SEM)
1:
    movl $1, %eax
    xchgl %eax, (TRAMP_LOCK)
    testl %eax, %eax
    jz 2f
    pause
    jmp 1b
2:
    lgdtl (TRAMP_GDTP)
    movl %cr4, %eax
    orl $0x20, %eax
    movl %eax, %cr4
    movl (TRAMP_CR3), %eax
    movl %eax, %cr3
    movl $0xC0000080, %ecx
    rdmsr
    orl $0x100, %eax
    wrmsr
    movl %cr0, %eax
    orl $0x80000001, %eax
    movl %eax, %cr0
    ljmpl $0x08, $TRAMP_LONG

    .code64
ap_tramp_long:
    movw $0x10, %ax
    movw %ax, %ds
    movw %ax, %es
    movw %ax, %ss
    movq (TRAMP_STACK), %rsp
    movq (TRAMP_CTX), %rdi
    movq (TRAMP_ENTRY), %rax
    callq *%rax
    movq %rax, %rsp
    lock decl (TRAMP_SEM)
    movl $0, (TRAMP_LOCK)
3:
    sti
    hlt
    jmp 3b
ap_trampoline_end:
    .text
    "#,
    base = const TRAMPOLINE_PAGE,
    options(att_syntax)
);

unsafe extern "C" {
    static ap_trampoline_start: u8;
    static ap_trampoline_end: u8;
}

/// Copies the startup image to `page` and returns its header.
///
/// # Safety
/// `page` must be the writable, identity-mapped mapping of `TRAMPOLINE_PAGE`.
pub unsafe fn copy_to(page: NonNull<u8>) -> &'static TrampolineHeader {
    let start = &raw const ap_trampoline_start;
    let end = &raw const ap_trampoline_end;
    let len = end as usize - start as usize;
    debug_assert!(len <= crate::PAGE_SIZE, "trampoline does not fit its page");

    unsafe {
        core::ptr::copy_nonoverlapping(start, page.as_ptr(), len);
        let header = page.as_ptr().add(TrampolineHeader::OFFSET).cast::<TrampolineHeader>();
        header.write(TrampolineHeader::new());
        &*header
    }
}

/// Physical address of the active top-level page table.
pub fn current_page_table() -> u64 {
    let cr3: u64;
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
    }
    cr3 & !0xFFF
}
