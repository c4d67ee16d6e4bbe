use kernel_hal::LocalApic;
use kernel_hal::sim::SimPlatform;
use kernel_qemu::{ByteSink, QemuLogger};
use kernel_smp::{BootConfig, SmpState};
use kernel_trap::gdt::KERNEL_CS;
use kernel_trap::{KernelOnly, StubTable, TrapDispatcher, TrapFrame};
use log::LevelFilter;
use std::sync::{Mutex, OnceLock};

struct Capture(Mutex<Vec<u8>>);

impl ByteSink for Capture {
    fn write_bytes(&self, bytes: &[u8]) {
        self.0.lock().unwrap().extend_from_slice(bytes);
    }
}

static SMP: OnceLock<&'static SmpState<SimPlatform>> = OnceLock::new();

fn current_core_id() -> Option<usize> {
    let smp = SMP.get()?;
    smp.core_map().os_core_id(smp.hw().hw_core_id())
}

static LOGGER: QemuLogger<Capture> =
    QemuLogger::new(LevelFilter::Info, Capture(Mutex::new(Vec::new())), current_core_id);

#[test]
fn bring_up_is_logged_with_core_tags() {
    LOGGER.init().unwrap();

    let hw = SimPlatform::new(&[0, 4]);
    hw.skip_real_delays();
    let traps: &'static TrapDispatcher<SimPlatform> = Box::leak(Box::new(TrapDispatcher::new(hw)));
    let smp: &'static SmpState<SimPlatform> = Box::leak(Box::new(SmpState::new(
        hw,
        traps,
        BootConfig::default().with_expected_cores(2),
    )));
    SMP.set(smp).unwrap();
    hw.connect(move |vector| smp.irq_entry(&KernelOnly, &mut TrapFrame::new(vector, KERNEL_CS)));
    smp.install_boot_core(&StubTable { catch_all: 0x1000, stubs: &[] }).unwrap();
    smp.bring_up_cores();
    hw.shutdown();

    let out = String::from_utf8(LOGGER.sink().0.lock().unwrap().clone()).unwrap();
    assert!(
        out.lines().any(|l| l == "[INFO] core 0 kernel_smp::state: 2 cores detected"),
        "{out}"
    );
    assert!(out.lines().all(|l| !l.starts_with("[DEBUG]")), "{out}");
}
