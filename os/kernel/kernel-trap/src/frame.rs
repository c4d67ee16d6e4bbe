use crate::gdt::{KERNEL_CS, USER_CS};
use crate::{CATCH_ALL_TRAPNO, T_SYSCALL};
use core::fmt;

const EXCEPTION_NAMES: [&str; 20] = [
    "Divide error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection",
    "Page Fault",
    "(unknown trap)",
    "x87 FPU Floating-Point Error",
    "Alignment Check",
    "Machine-Check",
    "SIMD Floating-Point Exception",
];

/// Human-readable name of a trap number.
#[must_use]
pub fn trap_name(trapno: u64) -> &'static str {
    match usize::try_from(trapno) {
        Ok(n) if n < EXCEPTION_NAMES.len() => EXCEPTION_NAMES[n],
        _ if trapno == u64::from(T_SYSCALL) => "System call",
        _ => "(unknown trap)",
    }
}

/// Privilege level a trap came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

/// Register state saved by an entry stub.
///
/// Layout matches the push order of the stubs: general purpose registers
/// (pushed by software, `rax` last), trap number and error code, then the
/// hardware interrupt frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub trapno: u64,
    /// Hardware error code, 0 for vectors that push none.
    pub err: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// A frame for vector `trapno` entered from `cs`.
    #[must_use]
    pub const fn new(trapno: u8, cs: u16) -> Self {
        let mut frame = Self::zeroed();
        frame.trapno = trapno as u64;
        frame.cs = cs as u64;
        frame
    }

    const fn zeroed() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rbp: 0,
            rsi: 0,
            rdi: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            trapno: 0,
            err: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// `None` unless `cs` is exactly the kernel or the user code selector.
    #[must_use]
    pub const fn privilege(&self) -> Option<Privilege> {
        const KERNEL: u64 = KERNEL_CS as u64;
        const USER: u64 = USER_CS as u64;
        match self.cs {
            KERNEL => Some(Privilege::Kernel),
            USER => Some(Privilege::User),
            _ => None,
        }
    }

    /// The vector, or `None` for the catch-all's out-of-range number.
    #[must_use]
    pub fn vector(&self) -> Option<u8> {
        u8::try_from(self.trapno).ok()
    }

    #[must_use]
    pub const fn is_catch_all(&self) -> bool {
        self.trapno == CATCH_ALL_TRAPNO
    }

    /// System call arguments in their ABI registers.
    #[must_use]
    pub const fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    /// Stores a system call result in the return register.
    pub const fn set_return(&mut self, value: u64) {
        self.rax = value;
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TRAP frame at {:p}", self)?;
        let gprs = [
            ("rax", self.rax),
            ("rbx", self.rbx),
            ("rcx", self.rcx),
            ("rdx", self.rdx),
            ("rbp", self.rbp),
            ("rsi", self.rsi),
            ("rdi", self.rdi),
            ("r8", self.r8),
            ("r9", self.r9),
            ("r10", self.r10),
            ("r11", self.r11),
            ("r12", self.r12),
            ("r13", self.r13),
            ("r14", self.r14),
            ("r15", self.r15),
        ];
        for (name, value) in gprs {
            writeln!(f, "  {name:<4} {value:#018x}")?;
        }
        writeln!(f, "  trap {:#010x} {}", self.trapno, trap_name(self.trapno))?;
        writeln!(f, "  err  {:#010x}", self.err)?;
        writeln!(f, "  rip  {:#018x}", self.rip)?;
        writeln!(f, "  cs   {:#06x}", self.cs)?;
        write!(f, "  flag {:#018x}", self.rflags)?;
        if self.privilege() == Some(Privilege::User) {
            writeln!(f)?;
            writeln!(f, "  rsp  {:#018x}", self.rsp)?;
            write!(f, "  ss   {:#06x}", self.ss)?;
        }
        Ok(())
    }
}
