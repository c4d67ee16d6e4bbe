use core::sync::atomic::{AtomicU32, Ordering};

/// How deep the executing core is nested in interrupt and kernel-trap
/// handlers.
#[derive(Debug, Default)]
pub struct ContextDepth {
    irq: AtomicU32,
    kernel_trap: AtomicU32,
}

impl ContextDepth {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            irq: AtomicU32::new(0),
            kernel_trap: AtomicU32::new(0),
        }
    }

    /// Counts one IRQ level until the guard drops.
    pub fn enter_irq(&self) -> DepthGuard<'_> {
        self.irq.fetch_add(1, Ordering::Relaxed);
        DepthGuard { counter: &self.irq }
    }

    /// Counts one kernel-trap level until the guard drops.
    pub fn enter_kernel_trap(&self) -> DepthGuard<'_> {
        self.kernel_trap.fetch_add(1, Ordering::Relaxed);
        DepthGuard {
            counter: &self.kernel_trap,
        }
    }

    pub fn irq_depth(&self) -> u32 {
        self.irq.load(Ordering::Relaxed)
    }

    pub fn kernel_trap_depth(&self) -> u32 {
        self.kernel_trap.load(Ordering::Relaxed)
    }

    pub fn in_irq_ctx(&self) -> bool {
        self.irq_depth() > 0
    }

    pub fn in_kernel_trap(&self) -> bool {
        self.kernel_trap_depth() > 0
    }

    /// Neither in an IRQ handler nor handling a trap the kernel took itself.
    pub fn can_block(&self) -> bool {
        !self.in_irq_ctx() && !self.in_kernel_trap()
    }
}

/// Undoes one `enter_*` call.
#[must_use = "the depth drops back as soon as the guard is dropped"]
pub struct DepthGuard<'a> {
    counter: &'a AtomicU32,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per-core state the dispatcher needs: who we are and how deep we are.
#[derive(Debug, Default)]
pub struct CoreContext {
    id: usize,
    depth: ContextDepth,
}

impl CoreContext {
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            depth: ContextDepth::new(),
        }
    }

    /// Logical core id.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub const fn depth(&self) -> &ContextDepth {
        &self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_unwind() {
        let depth = ContextDepth::new();
        assert!(depth.can_block());
        {
            let _irq = depth.enter_irq();
            assert!(depth.in_irq_ctx());
            {
                let _nested = depth.enter_irq();
                assert_eq!(depth.irq_depth(), 2);
            }
            assert_eq!(depth.irq_depth(), 1);
            assert!(!depth.can_block());
        }
        let trap = depth.enter_kernel_trap();
        assert!(depth.in_kernel_trap());
        drop(trap);
        assert!(depth.can_block());
    }
}
