use crate::handlers::{HandlerTable, Isr};
use crate::idt::Idt;
use crate::remote::{CallWrappers, CoreTopology, RemoteCalls};
use crate::{
    CoreContext, DescriptorBlob, PIC_END, PIC1_OFFSET, PageFaultError, Privilege, T_BRKPT,
    T_PGFLT, T_SYSCALL, TrapEnvironment, TrapFrame, TrapOutcome, trap_name,
};
use kernel_hal::{DescriptorPointer, LAPIC_SPURIOUS_VECTOR, Platform};

/// Master IRQ 7 and slave IRQ 15 double as the PICs' spurious lines.
const PIC1_SPURIOUS_IRQ: u8 = 7;
const PIC2_SPURIOUS_IRQ: u8 = 15;
const PIC_CASCADE_IRQ: u8 = 2;
use kernel_sync::{AlreadyFrozen, FreezeCell};

/// Addresses of the low-level entry stubs.
#[derive(Debug, Clone, Copy)]
pub struct StubTable<'a> {
    /// Entry installed on every vector without a dedicated stub.
    pub catch_all: u64,
    /// `(vector, entry address)` for every vector with a dedicated stub.
    pub stubs: &'a [(u8, u64)],
}

/// Owner of the vector table and the IRQ handler table; classifies traps
/// and routes interrupts.
///
/// One per kernel. The vector table is built once by the boot core and
/// frozen before any other core loads it.
pub struct TrapDispatcher<H: Platform + 'static> {
    hw: &'static H,
    idt: FreezeCell<Idt>,
    handlers: HandlerTable,
    pub(crate) wrappers: CallWrappers<H::Irq>,
}

impl<H: Platform + 'static> TrapDispatcher<H> {
    pub const fn new(hw: &'static H) -> Self {
        Self {
            hw,
            idt: FreezeCell::new(Idt::new()),
            handlers: HandlerTable::new(),
            wrappers: CallWrappers::new(),
        }
    }

    pub const fn hw(&self) -> &'static H {
        self.hw
    }

    pub const fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// The vector table, once installed.
    pub fn vector_table(&self) -> Option<&Idt> {
        self.idt.get()
    }

    /// Builds, freezes and loads the vector table on the boot core.
    ///
    /// Every vector first gets the catch-all entry, then the dedicated
    /// stubs are put in place. Only the system call and breakpoint vectors
    /// may be raised from user mode. The boot core's TSS gets
    /// `kernel_stack_top` as its ring-0 stack and is loaded, then the
    /// legacy PIC is remapped to [`PIC1_OFFSET`], LINT0 is routed as a
    /// masked ExtINT and the local APIC is enabled.
    ///
    /// # Errors
    /// If the table was already installed.
    pub fn install_vector_table(
        &self,
        stubs: &StubTable<'_>,
        boot_blob: &'static mut DescriptorBlob,
        kernel_stack_top: u64,
    ) -> Result<(), AlreadyFrozen> {
        self.idt.update(|idt| {
            for vector in 0..256 {
                idt[vector].set_handler(stubs.catch_all).present(true);
            }
            for &(vector, entry) in stubs.stubs {
                idt[usize::from(vector)].set_handler(entry).present(true);
            }
            idt[usize::from(T_SYSCALL)].modify().dpl(3).gate_trap();
            idt[usize::from(T_BRKPT)].modify().dpl(3);
        })?;

        boot_blob.set_kernel_stack(kernel_stack_top);
        unsafe { boot_blob.install(self.hw) };

        let idt = self.idt.freeze();
        unsafe { self.hw.load_idt(&DescriptorPointer::of(idt)) };

        self.hw.pic_remap(PIC1_OFFSET);
        self.hw.mask_lint0_extint();
        self.hw.lapic_enable();
        log::info!(
            "vector table installed, {} dedicated entries",
            stubs.stubs.len()
        );
        Ok(())
    }

    /// Loads the frozen vector table on the executing core.
    ///
    /// # Panics
    /// If the boot core did not install the table yet.
    pub fn load_vector_table(&self) {
        let Some(idt) = self.idt.get() else {
            panic!("vector table loaded before it was installed");
        };
        unsafe { self.hw.load_idt(&DescriptorPointer::of(idt)) };
    }

    /// Installs `isr` for `vector`. Must happen before the vector can fire.
    pub fn register_interrupt_handler(&self, vector: u8, isr: Isr, data: usize) {
        self.handlers.register(vector, isr, data);
    }

    /// Cross-core calls, with `topology` naming the cores.
    pub const fn remote_calls<'a, T: CoreTopology>(
        &'a self,
        topology: &'a T,
    ) -> RemoteCalls<'a, H, T> {
        RemoteCalls::new(self, topology)
    }

    /// Entry for exceptions and software traps.
    ///
    /// # Panics
    /// On traps the kernel cannot survive: an invalid privilege level, a
    /// kernel page fault, any unexpected kernel exception.
    pub fn handle_trap<E: TrapEnvironment>(
        &self,
        env: &E,
        core: &CoreContext,
        frame: &mut TrapFrame,
    ) -> TrapOutcome {
        match Self::privilege(core, frame) {
            Privilege::Kernel => {
                let _depth = core.depth().enter_kernel_trap();
                self.kernel_trap(env, core, frame)
            }
            Privilege::User => {
                let Some(task) = env.current_task(core) else {
                    panic!("user trap on core {} without a current task\n{frame}", core.id());
                };
                let mut persisted = env.persist_user_frame(core, frame);
                self.user_trap(env, core, task, &mut persisted)
            }
        }
    }

    fn kernel_trap<E: TrapEnvironment>(
        &self,
        env: &E,
        core: &CoreContext,
        frame: &mut TrapFrame,
    ) -> TrapOutcome {
        match frame.vector() {
            Some(T_BRKPT) => {
                env.monitor(frame);
                TrapOutcome::Resume
            }
            Some(T_PGFLT) => {
                let addr = self.hw.fault_address();
                log::error!("page fault in the kernel at {addr:#x} on core {}", core.id());
                panic!("page fault in the kernel at {addr:#x}\n{frame}");
            }
            Some(T_SYSCALL) => {
                let Some(task) = env.current_task(core) else {
                    panic!("system call from the kernel without a task\n{frame}");
                };
                log::warn!(
                    "[{task}] system call from kernel mode at {:#x} on core {}, destroying task",
                    frame.rip,
                    core.id()
                );
                env.destroy_task(task);
                TrapOutcome::TaskDestroyed
            }
            _ => {
                log::error!("unhandled trap {} in the kernel on core {}", frame.trapno, core.id());
                panic!("unhandled trap in the kernel\n{frame}");
            }
        }
    }

    fn user_trap<E: TrapEnvironment>(
        &self,
        env: &E,
        core: &CoreContext,
        task: E::Task,
        frame: &mut TrapFrame,
    ) -> TrapOutcome {
        match frame.vector() {
            Some(T_BRKPT) => {
                env.monitor(frame);
                TrapOutcome::Resume
            }
            Some(T_PGFLT) => {
                let addr = self.hw.fault_address();
                let err = PageFaultError::from_bits(frame.err);
                match env.page_fault(task, addr, err) {
                    Ok(()) => TrapOutcome::Resume,
                    Err(e) => {
                        log::warn!(
                            "[{task}] user {} fault va {addr:#x} ip {:#x} on core {}: {e}",
                            err.access(),
                            frame.rip,
                            core.id()
                        );
                        env.destroy_task(task);
                        TrapOutcome::TaskDestroyed
                    }
                }
            }
            Some(T_SYSCALL) => {
                let ret = env.syscall(task, frame.rax, frame.syscall_args());
                frame.set_return(ret);
                TrapOutcome::Resume
            }
            _ => {
                log::warn!(
                    "[{task}] unhandled trap {} ({}) at {:#x} on core {}, destroying task",
                    frame.trapno,
                    trap_name(frame.trapno),
                    frame.rip,
                    core.id()
                );
                env.destroy_task(task);
                TrapOutcome::TaskDestroyed
            }
        }
    }

    /// Entry for device interrupts and IPIs.
    ///
    /// A frame from user mode is first persisted through `env`, like on the
    /// trap path, and the handler sees the persisted copy. Spurious
    /// interrupts are dropped without running a handler or sending an EOI.
    /// Everything else runs the registered handler, checks this core off a
    /// pending remote call, and is acknowledged at the controller that owns
    /// the vector.
    ///
    /// # Panics
    /// If an exception vector reaches the IRQ path, or on an invalid CS.
    pub fn handle_irq<E: TrapEnvironment>(
        &self,
        env: &E,
        core: &CoreContext,
        frame: &mut TrapFrame,
    ) {
        let _depth = core.depth().enter_irq();
        let privilege = Self::privilege(core, frame);
        let Some(vector) = frame.vector().filter(|&v| v >= PIC1_OFFSET) else {
            panic!("trap {} routed to the IRQ path\n{frame}", frame.trapno);
        };
        if self.is_spurious(vector) {
            log::debug!("spurious interrupt {vector:#x} on core {}", core.id());
            return;
        }

        match privilege {
            Privilege::Kernel => self.dispatch_irq(core, vector, frame),
            Privilege::User => {
                let mut persisted = env.persist_user_frame(core, frame);
                self.dispatch_irq(core, vector, &mut persisted);
            }
        }
    }

    fn dispatch_irq(&self, core: &CoreContext, vector: u8, frame: &mut TrapFrame) {
        if !self.handlers.invoke(vector, frame) {
            log::trace!("vector {vector:#x} on core {} has no handler", core.id());
        }
        self.wrappers.check_in(vector, core.id());
        self.send_eoi(vector);
    }

    fn privilege(core: &CoreContext, frame: &TrapFrame) -> Privilege {
        let Some(privilege) = frame.privilege() else {
            log::error!("trap frame with invalid CS {:#x} on core {}", frame.cs, core.id());
            panic!("trap frame with invalid CS\n{frame}");
        };
        privilege
    }

    /// A spurious interrupt is never in service. A spurious slave interrupt
    /// still went through the master's cascade line, which needs its EOI.
    fn is_spurious(&self, vector: u8) -> bool {
        if vector == LAPIC_SPURIOUS_VECTOR {
            return !self.hw.lapic_in_service(vector);
        }
        if !(PIC1_OFFSET..PIC_END).contains(&vector) {
            return false;
        }
        let irq = vector - PIC1_OFFSET;
        match irq {
            PIC1_SPURIOUS_IRQ => self.hw.pic_in_service() & (1 << irq) == 0,
            PIC2_SPURIOUS_IRQ if self.hw.pic_in_service() & (1 << irq) == 0 => {
                self.hw.pic_send_eoi(PIC_CASCADE_IRQ);
                true
            }
            _ => false,
        }
    }

    fn send_eoi(&self, vector: u8) {
        if (PIC1_OFFSET..PIC_END).contains(&vector) {
            self.hw.pic_send_eoi(vector - PIC1_OFFSET);
        } else {
            self.hw.lapic_send_eoi();
        }
    }
}
