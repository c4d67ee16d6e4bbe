use crate::TrapFrame;
use core::sync::atomic::{AtomicUsize, Ordering};

/// An interrupt service routine: the frame and the context word it was
/// registered with.
pub type Isr = fn(&mut TrapFrame, usize);

struct Slot {
    isr: AtomicUsize,
    data: AtomicUsize,
}

impl Slot {
    const EMPTY: Self = Self {
        isr: AtomicUsize::new(0),
        data: AtomicUsize::new(0),
    };
}

/// One `(handler, context)` pair per vector.
///
/// Registration is a plain store. It must happen before the vector is
/// unmasked or an IPI for it is sent; nothing here orders it against
/// concurrent delivery of the same vector.
pub struct HandlerTable {
    slots: [Slot; 256],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; 256],
        }
    }

    /// Installs `isr` for `vector`, replacing any previous handler.
    pub fn register(&self, vector: u8, isr: Isr, data: usize) {
        let slot = &self.slots[usize::from(vector)];
        slot.data.store(data, Ordering::Relaxed);
        slot.isr.store(isr as usize, Ordering::Release);
    }

    pub fn unregister(&self, vector: u8) {
        self.slots[usize::from(vector)].isr.store(0, Ordering::Release);
    }

    #[must_use]
    pub fn get(&self, vector: u8) -> Option<(Isr, usize)> {
        let slot = &self.slots[usize::from(vector)];
        let raw = slot.isr.load(Ordering::Acquire);
        if raw == 0 {
            return None;
        }
        // SAFETY: the only nonzero values ever stored are `Isr`s.
        let isr = unsafe { core::mem::transmute::<usize, Isr>(raw) };
        Some((isr, slot.data.load(Ordering::Relaxed)))
    }

    #[must_use]
    pub fn is_registered(&self, vector: u8) -> bool {
        self.get(vector).is_some()
    }

    /// Runs the handler for `vector`, if any. Returns whether one ran.
    pub fn invoke(&self, vector: u8, frame: &mut TrapFrame) -> bool {
        match self.get(vector) {
            Some((isr, data)) => {
                isr(frame, data);
                true
            }
            None => false,
        }
    }
}
