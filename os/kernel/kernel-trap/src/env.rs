use crate::{CoreContext, PageFaultError, TrapFrame};
use core::convert::Infallible;
use core::fmt::Display;
use core::ops::DerefMut;

/// Why the memory manager could not resolve a user fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("address is not mapped")]
    Unmapped,
    #[error("access violates the mapping's protection")]
    Protection,
    #[error("out of memory")]
    OutOfMemory,
}

/// What the interrupted context should do after a trap was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to the interrupted context.
    Resume,
    /// The current task was destroyed; schedule something else.
    TaskDestroyed,
}

/// The kernel around the dispatcher: tasks, system calls, memory.
pub trait TrapEnvironment {
    /// A handle on a task, printable for diagnostics (usually its pid).
    type Task: Copy + Display;

    /// The persisted copy of a user frame.
    type Frame<'a>: DerefMut<Target = TrapFrame>
    where
        Self: 'a;

    /// The task running on `core`, if any.
    fn current_task(&self, core: &CoreContext) -> Option<Self::Task>;

    /// Copies a frame that came from user mode into the task's saved
    /// context. The dispatcher works on the returned copy from then on, so
    /// changes (like a syscall result) are what the task resumes with.
    fn persist_user_frame<'a>(&'a self, core: &CoreContext, frame: &TrapFrame) -> Self::Frame<'a>;

    /// Runs system call `num`; the result goes to the task's return register.
    fn syscall(&self, task: Self::Task, num: u64, args: [u64; 6]) -> u64;

    /// Resolves a user page fault at `addr`.
    fn page_fault(
        &self,
        task: Self::Task,
        addr: u64,
        err: PageFaultError,
    ) -> Result<(), FaultError>;

    /// Interactive inspector entered on breakpoints.
    fn monitor(&self, frame: &mut TrapFrame);

    fn destroy_task(&self, task: Self::Task);
}

/// Environment of a kernel that has no user tasks, such as one that is
/// still booting. Any frame from user mode is fatal, breakpoints are logged
/// and resumed.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelOnly;

impl TrapEnvironment for KernelOnly {
    type Task = Infallible;
    type Frame<'a> = &'a mut TrapFrame;

    fn current_task(&self, _core: &CoreContext) -> Option<Infallible> {
        None
    }

    fn persist_user_frame<'a>(&'a self, core: &CoreContext, frame: &TrapFrame) -> Self::Frame<'a> {
        panic!("user mode entered on core {} without user tasks\n{frame}", core.id());
    }

    fn syscall(&self, task: Infallible, _num: u64, _args: [u64; 6]) -> u64 {
        match task {}
    }

    fn page_fault(
        &self,
        task: Infallible,
        _addr: u64,
        _err: PageFaultError,
    ) -> Result<(), FaultError> {
        match task {}
    }

    fn monitor(&self, frame: &mut TrapFrame) {
        log::warn!("breakpoint at {:#x}, no monitor attached", frame.rip);
    }

    fn destroy_task(&self, task: Infallible) {
        match task {}
    }
}
