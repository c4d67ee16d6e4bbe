use kernel_hal::sim::{SimEvent, SimIrq, SimPlatform};
use kernel_hal::{BootMemory, IpiDestination, IrqControl, LocalApic, TRAMPOLINE_PAGE};
use kernel_trap::gdt::KERNEL_CS;
use kernel_trap::{
    CoreContext, CoreTopology, KernelOnly, NUM_HANDLER_WRAPPERS, REMOTE_CALL_BASE,
    RemoteCallError, TrapDispatcher, TrapFrame,
};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

struct Cores {
    hw: &'static SimPlatform,
    ids: Vec<u32>,
}

impl CoreTopology for Cores {
    fn num_cores(&self) -> usize {
        self.ids.len()
    }

    fn current_core(&self) -> usize {
        let hw = self.hw.hw_core_id();
        self.ids.iter().position(|&id| id == hw).unwrap()
    }

    fn hw_core_id(&self, core: usize) -> Option<u32> {
        self.ids.get(core).copied()
    }
}

struct Machine {
    hw: &'static SimPlatform,
    traps: &'static TrapDispatcher<SimPlatform>,
    cores: &'static Cores,
}

/// A machine whose interrupt entry feeds the dispatcher. Only the boot core
/// runs until [`Machine::start_others`].
fn machine(ids: &[u32]) -> Machine {
    let hw = SimPlatform::new(ids);
    let traps: &'static TrapDispatcher<SimPlatform> = Box::leak(Box::new(TrapDispatcher::new(hw)));
    let cores: &'static Cores = Box::leak(Box::new(Cores {
        hw,
        ids: ids.to_vec(),
    }));
    let contexts: &'static [CoreContext] = Box::leak(
        (0..ids.len())
            .map(CoreContext::new)
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );
    hw.connect(move |vector| {
        let core = &contexts[cores.current_core()];
        traps.handle_irq(&KernelOnly, core, &mut TrapFrame::new(vector, KERNEL_CS));
    });
    Machine { hw, traps, cores }
}

extern "C" fn idle(_context: *const ()) -> u64 {
    0
}

impl Machine {
    fn start_others(&self) {
        let header = self.hw.install_trampoline(TRAMPOLINE_PAGE).unwrap();
        header.set_entry(idle, core::ptr::null());
        self.hw.send_startup_ipi((TRAMPOLINE_PAGE >> 12) as u8);
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.hw.shutdown();
    }
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn add_data(counter: &AtomicUsize) -> usize {
    core::ptr::from_ref(counter) as usize
}

fn bump(_frame: &mut TrapFrame, data: usize) {
    // SAFETY: every caller passes the address of a static counter.
    let counter = unsafe { &*(data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::AcqRel);
}

static RAN_ON: Mutex<Vec<u32>> = Mutex::new(Vec::new());

fn note_core(_frame: &mut TrapFrame, data: usize) {
    // SAFETY: callers pass the leaked platform.
    let hw = unsafe { &*(data as *const SimPlatform) };
    RAN_ON.lock().unwrap().push(hw.hw_core_id());
}

#[test]
fn call_to_self_runs_before_wait_returns() {
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    let m = machine(&[0]);
    let calls = m.traps.remote_calls(m.cores);

    let handle = calls.call_self(bump, add_data(&COUNT)).unwrap();
    assert_eq!(handle.vector(), REMOTE_CALL_BASE);
    assert_eq!(calls.outstanding(), 1);
    handle.wait();

    assert_eq!(COUNT.load(Ordering::Acquire), 1);
    assert_eq!(calls.outstanding(), 0);
    assert!(!SimIrq::irq_enabled());
    assert!(m.hw.events().contains(&SimEvent::LapicEoi { core: 0 }));
}

#[test]
fn call_to_all_reaches_every_core() {
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    let m = machine(&[0, 1, 2, 3]);
    m.start_others();
    let calls = m.traps.remote_calls(m.cores);

    calls.call_all(bump, add_data(&COUNT)).unwrap().wait();

    assert_eq!(COUNT.load(Ordering::Acquire), 4);
    assert_eq!(calls.outstanding(), 0);
}

#[test]
fn targeted_calls_skip_the_other_cores() {
    let m = machine(&[0, 4, 8]);
    m.start_others();
    let calls = m.traps.remote_calls(m.cores);
    let hw_data = core::ptr::from_ref(m.hw) as usize;

    calls.call_all_but_self(note_core, hw_data).unwrap().wait();
    let mut ran: Vec<u32> = std::mem::take(&mut *RAN_ON.lock().unwrap());
    ran.sort_unstable();
    assert_eq!(ran, vec![4, 8]);

    calls.call_single(2, note_core, hw_data).unwrap().wait();
    assert_eq!(*RAN_ON.lock().unwrap(), vec![8]);
    assert!(m.hw.events().iter().any(|e| matches!(
        e,
        SimEvent::Ipi {
            dest: IpiDestination::Physical(8),
            ..
        }
    )));
}

#[test]
fn single_call_to_missing_core_is_rejected() {
    let m = machine(&[0, 1]);
    let calls = m.traps.remote_calls(m.cores);

    assert_eq!(
        calls.call_single(5, bump, 0).err(),
        Some(RemoteCallError::NoSuchCore(5))
    );
    assert_eq!(calls.outstanding(), 0);
}

#[test]
fn only_five_calls_may_be_in_flight() {
    static NEVER: AtomicUsize = AtomicUsize::new(0);
    // Core 1 is never started, so calls to it stay pending.
    let m = machine(&[0, 1]);
    let calls = m.traps.remote_calls(m.cores);

    let mut handles: Vec<_> = (0..NUM_HANDLER_WRAPPERS)
        .map(|_| calls.call_single(1, bump, add_data(&NEVER)).unwrap())
        .collect();
    let vectors: BTreeSet<u8> = handles.iter().map(|h| h.vector()).collect();
    assert_eq!(vectors.len(), NUM_HANDLER_WRAPPERS);
    assert!(vectors.iter().all(|v| (REMOTE_CALL_BASE..REMOTE_CALL_BASE + 5).contains(v)));

    assert_eq!(
        calls.call_self(bump, add_data(&NEVER)).err(),
        Some(RemoteCallError::Busy)
    );
    assert_eq!(calls.outstanding(), NUM_HANDLER_WRAPPERS);

    assert!(handles[0].wait_bounded(100).is_err());
    while let Some(handle) = handles.pop() {
        drop(handle);
    }
    assert_eq!(calls.outstanding(), 0);
    assert_eq!(NEVER.load(Ordering::Acquire), 0);
}

#[test]
fn detached_call_completes_in_the_background() {
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    let m = machine(&[0, 1]);
    m.start_others();
    let calls = m.traps.remote_calls(m.cores);

    drop(calls.call_single(1, bump, add_data(&COUNT)).unwrap());
    assert_eq!(calls.outstanding(), 0);
    wait_for("the remote core", || COUNT.load(Ordering::Acquire) == 1);
}
