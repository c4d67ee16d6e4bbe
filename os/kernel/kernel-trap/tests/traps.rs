use kernel_hal::sim::{SimEvent, SimPlatform};
use kernel_trap::gdt::{KERNEL_CS, TSS_SEL, USER_CS};
use kernel_trap::idt::GateType;
use kernel_trap::{
    CATCH_ALL_TRAPNO, CoreContext, DescriptorBlob, FaultError, KernelOnly, PageFaultError,
    StubTable, T_BRKPT, T_PGFLT, T_SYSCALL, TrapDispatcher, TrapEnvironment, TrapFrame,
    TrapOutcome,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

const CATCH_ALL: u64 = 0xFFFF_8000_0000_F000;
const STUBS: &[(u8, u64)] = &[
    (0, 0xFFFF_8000_0000_1000),
    (T_PGFLT, 0xFFFF_8000_0000_1E00),
    (0x21, 0xFFFF_8000_0000_2100),
    (T_SYSCALL, 0xFFFF_8000_0000_8000),
];

fn stubs() -> StubTable<'static> {
    StubTable {
        catch_all: CATCH_ALL,
        stubs: STUBS,
    }
}

fn dispatcher(hw: &'static SimPlatform) -> &'static TrapDispatcher<SimPlatform> {
    Box::leak(Box::new(TrapDispatcher::new(hw)))
}

fn blob() -> &'static mut DescriptorBlob {
    Box::leak(Box::new(DescriptorBlob::new()))
}

fn core(id: usize) -> &'static CoreContext {
    Box::leak(Box::new(CoreContext::new(id)))
}

struct TestEnv {
    task: Option<u32>,
    core: &'static CoreContext,
    saved: Mutex<TrapFrame>,
    fault: Result<(), FaultError>,
    faults: Mutex<Vec<(u64, PageFaultError)>>,
    syscalls: Mutex<Vec<(u64, [u64; 6])>>,
    destroyed: Mutex<Vec<u32>>,
    monitor_depth: AtomicU32,
}

impl TestEnv {
    fn new(task: Option<u32>, core: &'static CoreContext) -> Self {
        Self {
            task,
            core,
            saved: Mutex::new(TrapFrame::default()),
            fault: Ok(()),
            faults: Mutex::new(Vec::new()),
            syscalls: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            monitor_depth: AtomicU32::new(u32::MAX),
        }
    }

    fn destroyed(&self) -> Vec<u32> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl TrapEnvironment for TestEnv {
    type Task = u32;
    type Frame<'a> = MutexGuard<'a, TrapFrame>;

    fn current_task(&self, _core: &CoreContext) -> Option<u32> {
        self.task
    }

    fn persist_user_frame<'a>(&'a self, _core: &CoreContext, frame: &TrapFrame) -> Self::Frame<'a> {
        let mut saved = self.saved.lock().unwrap();
        *saved = *frame;
        saved
    }

    fn syscall(&self, _task: u32, num: u64, args: [u64; 6]) -> u64 {
        self.syscalls.lock().unwrap().push((num, args));
        args.iter().sum::<u64>() + num
    }

    fn page_fault(&self, _task: u32, addr: u64, err: PageFaultError) -> Result<(), FaultError> {
        self.faults.lock().unwrap().push((addr, err));
        self.fault
    }

    fn monitor(&self, _frame: &mut TrapFrame) {
        self.monitor_depth
            .store(self.core.depth().kernel_trap_depth(), Ordering::Relaxed);
    }

    fn destroy_task(&self, task: u32) {
        self.destroyed.lock().unwrap().push(task);
    }
}

#[test]
fn vector_table_layout() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    traps
        .install_vector_table(&stubs(), blob(), 0xFFFF_8000_0010_0000)
        .unwrap();
    let idt = traps.vector_table().unwrap();

    assert!(idt.iter().all(|gate| gate.is_present() && gate.selector() == KERNEL_CS));
    assert_eq!(idt[0].handler_address(), 0xFFFF_8000_0000_1000);
    assert_eq!(idt[5].handler_address(), CATCH_ALL);
    assert_eq!(idt[0x21].handler_address(), 0xFFFF_8000_0000_2100);
    assert_eq!(idt[0x99].handler_address(), CATCH_ALL);

    for (vector, gate) in idt.iter().enumerate() {
        let user = vector == usize::from(T_SYSCALL) || vector == usize::from(T_BRKPT);
        assert_eq!(gate.dpl(), if user { 3 } else { 0 }, "vector {vector:#x}");
        let expected = if vector == usize::from(T_SYSCALL) {
            GateType::TrapGate
        } else {
            GateType::InterruptGate
        };
        assert_eq!(gate.attributes().gate_type(), Some(expected), "vector {vector:#x}");
    }
}

#[test]
fn install_programs_the_boot_core() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let boot_blob = blob();
    let blob_addr = core::ptr::from_ref(&*boot_blob) as usize;
    traps.install_vector_table(&stubs(), boot_blob, 0x8000).unwrap();

    let regs = hw.registers(0);
    assert!(regs.idt.is_some());
    assert!(regs.gdt.is_some());
    assert_eq!(regs.task_register, Some(TSS_SEL));
    assert!(regs.lapic_enabled);
    assert!(regs.lint0.is_some());
    assert!(hw.events().contains(&SimEvent::PicRemap { offset: 0x20 }));

    // SAFETY: the blob is leaked and nothing else touches it.
    let boot_blob = unsafe { &*(blob_addr as *const DescriptorBlob) };
    assert_eq!(boot_blob.kernel_stack(), 0x8000);
    assert!(boot_blob.gdt().tss().is_present());
    assert_eq!(regs.gdt, Some(boot_blob.gdt_pointer()));
}

#[test]
fn vector_table_is_installed_once() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    traps.install_vector_table(&stubs(), blob(), 0x8000).unwrap();
    assert!(traps.install_vector_table(&stubs(), blob(), 0x8000).is_err());
}

#[test]
fn other_cores_load_the_same_table() {
    let hw = SimPlatform::new(&[0, 1]);
    let traps = dispatcher(hw);
    traps.install_vector_table(&stubs(), blob(), 0x8000).unwrap();

    std::thread::spawn(move || {
        hw.enter_core(1);
        traps.load_vector_table();
    })
    .join()
    .unwrap();

    assert_eq!(hw.registers(1).idt, hw.registers(0).idt);
    assert_eq!(hw.registers(1).task_register, None);
}

#[test]
#[should_panic(expected = "before it was installed")]
fn loading_before_install_panics() {
    let hw = SimPlatform::new(&[0]);
    dispatcher(hw).load_vector_table();
}

static SEEN_DATA: AtomicUsize = AtomicUsize::new(0);

fn record_data(_frame: &mut TrapFrame, data: usize) {
    SEEN_DATA.store(data, Ordering::Relaxed);
}

#[test]
fn pic_vectors_are_acknowledged_at_the_pic() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    traps.register_interrupt_handler(0x21, record_data, 0x5a5a);

    let mut frame = TrapFrame::new(0x21, KERNEL_CS);
    traps.handle_irq(&KernelOnly, core(0), &mut frame);

    assert_eq!(SEEN_DATA.load(Ordering::Relaxed), 0x5a5a);
    let events = hw.events();
    assert!(events.contains(&SimEvent::PicEoi { irq: 1 }));
    assert!(!events.iter().any(|e| matches!(e, SimEvent::LapicEoi { .. })));
}

#[test]
fn other_vectors_are_acknowledged_at_the_lapic() {
    let hw = SimPlatform::new(&[3]);
    let traps = dispatcher(hw);

    // No handler registered: still acknowledged.
    let mut frame = TrapFrame::new(0x40, KERNEL_CS);
    traps.handle_irq(&KernelOnly, core(0), &mut frame);

    assert_eq!(hw.events(), vec![SimEvent::LapicEoi { core: 3 }]);
}

static REPLACED: AtomicUsize = AtomicUsize::new(0);

fn first(_frame: &mut TrapFrame, _data: usize) {
    REPLACED.store(1, Ordering::Relaxed);
}

fn second(_frame: &mut TrapFrame, _data: usize) {
    REPLACED.store(2, Ordering::Relaxed);
}

#[test]
fn registering_again_replaces_the_handler() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    traps.register_interrupt_handler(0x50, first, 0);
    traps.register_interrupt_handler(0x50, second, 0);

    traps.handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0x50, KERNEL_CS));
    assert_eq!(REPLACED.load(Ordering::Relaxed), 2);
}

static IRQ_DEPTH: AtomicU32 = AtomicU32::new(0);

fn record_depth(_frame: &mut TrapFrame, data: usize) {
    // SAFETY: the test passes a leaked `CoreContext`.
    let core = unsafe { &*(data as *const CoreContext) };
    IRQ_DEPTH.store(core.depth().irq_depth(), Ordering::Relaxed);
}

#[test]
fn handlers_run_in_irq_context() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let me = core(0);
    traps.register_interrupt_handler(0x60, record_depth, core::ptr::from_ref(me) as usize);

    traps.handle_irq(&KernelOnly, me, &mut TrapFrame::new(0x60, KERNEL_CS));

    assert_eq!(IRQ_DEPTH.load(Ordering::Relaxed), 1);
    assert!(me.depth().can_block());
}

#[test]
#[should_panic(expected = "routed to the IRQ path")]
fn exceptions_on_the_irq_path_are_fatal() {
    let hw = SimPlatform::new(&[0]);
    dispatcher(hw).handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(T_PGFLT, KERNEL_CS));
}

static SPURIOUS_CALLS: AtomicUsize = AtomicUsize::new(0);

fn count_spurious(_frame: &mut TrapFrame, _data: usize) {
    SPURIOUS_CALLS.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn spurious_lapic_interrupt_is_not_acknowledged() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    traps.register_interrupt_handler(0xFF, count_spurious, 0);

    traps.handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0xFF, KERNEL_CS));

    assert_eq!(SPURIOUS_CALLS.load(Ordering::Relaxed), 0);
    assert!(hw.events().is_empty());
}

#[test]
fn in_service_lapic_vector_0xff_is_acknowledged() {
    let hw = SimPlatform::new(&[2]);
    let traps = dispatcher(hw);
    hw.set_in_service(0xFF);

    traps.handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0xFF, KERNEL_CS));

    assert_eq!(hw.events(), vec![SimEvent::LapicEoi { core: 2 }]);
    assert!(hw.registers(2).in_service.is_empty());
}

#[test]
fn spurious_master_irq_7_is_not_acknowledged() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);

    traps.handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0x27, KERNEL_CS));

    assert!(hw.events().is_empty());
}

#[test]
fn spurious_slave_irq_15_acknowledges_only_the_cascade() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);

    traps.handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0x2F, KERNEL_CS));

    assert_eq!(hw.events(), vec![SimEvent::PicEoi { irq: 2 }]);
}

#[test]
fn real_irq_7_is_acknowledged() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    hw.set_pic_in_service(1 << 7);

    traps.handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0x27, KERNEL_CS));

    assert_eq!(hw.events(), vec![SimEvent::PicEoi { irq: 7 }]);
}

static USER_IRQ_RIP: AtomicUsize = AtomicUsize::new(0);

fn record_user_frame(frame: &mut TrapFrame, _data: usize) {
    USER_IRQ_RIP.store(usize::try_from(frame.rip).unwrap(), Ordering::Relaxed);
    frame.rax = 77;
}

#[test]
fn user_irq_runs_on_the_persisted_frame() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(3), core(0));
    traps.register_interrupt_handler(0x41, record_user_frame, 0);

    let mut frame = TrapFrame::new(0x41, USER_CS);
    frame.rip = 0x40_1000;
    traps.handle_irq(&env, env.core, &mut frame);

    assert_eq!(USER_IRQ_RIP.load(Ordering::Relaxed), 0x40_1000);
    let saved = *env.saved.lock().unwrap();
    assert_eq!(saved.rip, 0x40_1000);
    assert_eq!(saved.rax, 77);
    assert_eq!(frame.rax, 0);
    assert_eq!(hw.events(), vec![SimEvent::LapicEoi { core: 0 }]);
    assert!(env.destroyed().is_empty());
}

#[test]
#[should_panic(expected = "invalid CS")]
fn irq_frames_from_ring_one_are_fatal() {
    let hw = SimPlatform::new(&[0]);
    let env = TestEnv::new(Some(1), core(0));
    dispatcher(hw).handle_irq(&env, env.core, &mut TrapFrame::new(0x40, 0x09));
}

#[test]
#[should_panic(expected = "without user tasks")]
fn user_irq_without_user_tasks_is_fatal() {
    let hw = SimPlatform::new(&[0]);
    dispatcher(hw).handle_irq(&KernelOnly, core(0), &mut TrapFrame::new(0x40, USER_CS));
}

#[test]
fn user_syscall_result_lands_in_rax() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(7), core(0));

    let mut frame = TrapFrame::new(T_SYSCALL, USER_CS);
    frame.rax = 100;
    frame.rdi = 1;
    frame.rsi = 2;
    frame.rdx = 3;
    frame.r10 = 4;
    frame.r8 = 5;
    frame.r9 = 6;

    assert_eq!(traps.handle_trap(&env, env.core, &mut frame), TrapOutcome::Resume);
    assert_eq!(*env.syscalls.lock().unwrap(), vec![(100, [1, 2, 3, 4, 5, 6])]);
    assert_eq!(env.saved.lock().unwrap().rax, 121);
    assert!(env.destroyed().is_empty());
}

#[test]
fn resolved_user_page_fault_resumes() {
    let hw = SimPlatform::new(&[0]);
    hw.set_fault_address(0x4000_1234);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(7), core(0));

    let mut frame = TrapFrame::new(T_PGFLT, USER_CS);
    frame.err = PageFaultError::new().with_write(true).with_user(true).into_bits();

    assert_eq!(traps.handle_trap(&env, env.core, &mut frame), TrapOutcome::Resume);
    let faults = env.faults.lock().unwrap().clone();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, 0x4000_1234);
    assert!(faults[0].1.write());
}

#[test]
fn unresolved_user_page_fault_destroys_the_task() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let mut env = TestEnv::new(Some(9), core(0));
    env.fault = Err(FaultError::Unmapped);

    let mut frame = TrapFrame::new(T_PGFLT, USER_CS);
    assert_eq!(
        traps.handle_trap(&env, env.core, &mut frame),
        TrapOutcome::TaskDestroyed
    );
    assert_eq!(env.destroyed(), vec![9]);
}

#[test]
fn unexpected_user_traps_destroy_the_task() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(4), core(0));

    let mut gp = TrapFrame::new(13, USER_CS);
    assert_eq!(traps.handle_trap(&env, env.core, &mut gp), TrapOutcome::TaskDestroyed);

    let mut catch_all = TrapFrame::new(0, USER_CS);
    catch_all.trapno = CATCH_ALL_TRAPNO;
    assert_eq!(
        traps.handle_trap(&env, env.core, &mut catch_all),
        TrapOutcome::TaskDestroyed
    );
    assert_eq!(env.destroyed(), vec![4, 4]);
}

#[test]
fn user_breakpoint_enters_the_monitor() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(1), core(0));

    let mut frame = TrapFrame::new(T_BRKPT, USER_CS);
    assert_eq!(traps.handle_trap(&env, env.core, &mut frame), TrapOutcome::Resume);
    assert_eq!(env.monitor_depth.load(Ordering::Relaxed), 0);
}

#[test]
fn kernel_breakpoint_counts_as_kernel_trap() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(None, core(0));

    let mut frame = TrapFrame::new(T_BRKPT, KERNEL_CS);
    assert_eq!(traps.handle_trap(&env, env.core, &mut frame), TrapOutcome::Resume);
    assert_eq!(env.monitor_depth.load(Ordering::Relaxed), 1);
    assert_eq!(env.core.depth().kernel_trap_depth(), 0);
}

#[test]
fn syscall_from_the_kernel_destroys_the_task() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(12), core(0));

    let mut frame = TrapFrame::new(T_SYSCALL, KERNEL_CS);
    assert_eq!(
        traps.handle_trap(&env, env.core, &mut frame),
        TrapOutcome::TaskDestroyed
    );
    assert_eq!(env.destroyed(), vec![12]);
    assert!(env.syscalls.lock().unwrap().is_empty());
}

#[test]
#[should_panic(expected = "page fault in the kernel at 0xdead")]
fn kernel_page_fault_is_fatal() {
    let hw = SimPlatform::new(&[0]);
    hw.set_fault_address(0xdead);
    let traps = dispatcher(hw);
    let env = TestEnv::new(None, core(0));
    traps.handle_trap(&env, env.core, &mut TrapFrame::new(T_PGFLT, KERNEL_CS));
}

#[test]
#[should_panic(expected = "unhandled trap in the kernel")]
fn unexpected_kernel_trap_is_fatal() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(None, core(0));
    traps.handle_trap(&env, env.core, &mut TrapFrame::new(13, KERNEL_CS));
}

#[test]
#[should_panic(expected = "invalid CS")]
fn frames_from_ring_one_are_fatal() {
    let hw = SimPlatform::new(&[0]);
    let traps = dispatcher(hw);
    let env = TestEnv::new(Some(1), core(0));
    traps.handle_trap(&env, env.core, &mut TrapFrame::new(T_SYSCALL, 0x09));
}
