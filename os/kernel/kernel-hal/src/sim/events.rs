use crate::registers::Cr4;
use crate::{DescriptorPointer, IpiDestination};

/// A hardware side effect observed on the simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    InitIpi,
    StartupIpi { page: u8 },
    Ipi { from: u32, dest: IpiDestination, vector: u8 },
    LapicEoi { core: u32 },
    PicRemap { offset: u8 },
    PicMask { irq: u8 },
    PicEoi { irq: u8 },
    TimerArmed { core: u32, usec: u64 },
    TimerDisarmed { core: u32 },
    Delay { usec: u64 },
    TrampolineRemoved { phys: u64 },
}

/// Register state of one simulated core.
#[derive(Debug, Clone, Default)]
pub struct CoreRegisters {
    pub idt: Option<DescriptorPointer>,
    pub gdt: Option<DescriptorPointer>,
    pub task_register: Option<u16>,
    pub lapic_enabled: bool,
    pub logical_id: Option<u8>,
    /// Last value written to the LINT0 vector table entry.
    pub lint0: Option<u32>,
    /// Vectors the local APIC holds in service, set by tests.
    pub in_service: Vec<u8>,
    /// Armed one-shot timer, in microseconds.
    pub timer_usec: Option<u64>,
    pub cr2: u64,
    pub cr4: Cr4,
    pub fpu_initialized: bool,
    pub mtrrs_default: bool,
}
