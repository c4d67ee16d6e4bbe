/// How many Startup-IPIs the boot core sends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StartupIpiPolicy {
    /// One Startup-IPI. Emulators and hypervisors start every core on the
    /// first one and some misbehave on a second.
    #[default]
    Single,
    /// The vendor sequence: a second Startup-IPI after
    /// [`BootConfig::sipi_gap_us`].
    Double,
}

/// Timing of the INIT / Startup-IPI protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub startup_ipi: StartupIpiPolicy,
    /// Delay between INIT and the first Startup-IPI.
    pub init_settle_us: u64,
    /// Delay between the two Startup-IPIs of [`StartupIpiPolicy::Double`].
    pub sipi_gap_us: u64,
    /// Time given to the cores to enter the trampoline before the boot core
    /// starts watching the arrival semaphore.
    pub arrival_window_us: u64,
    /// Upper bound on the semaphore watch, in spin iterations.
    pub arrival_timeout_spins: u64,
    /// If set, also wait until this many cores (the boot core included)
    /// reported in.
    pub expected_cores: Option<usize>,
}

impl BootConfig {
    pub const DEFAULT: Self = Self {
        startup_ipi: StartupIpiPolicy::Single,
        init_settle_us: 10_000,
        sipi_gap_us: 200,
        arrival_window_us: 500_000,
        arrival_timeout_spins: 1 << 32,
        expected_cores: None,
    };

    #[must_use]
    pub const fn with_startup_ipi(mut self, policy: StartupIpiPolicy) -> Self {
        self.startup_ipi = policy;
        self
    }

    #[must_use]
    pub const fn with_expected_cores(mut self, cores: usize) -> Self {
        self.expected_cores = Some(cores);
        self
    }

    #[must_use]
    pub const fn with_arrival_timeout_spins(mut self, spins: u64) -> Self {
        self.arrival_timeout_spins = spins;
        self
    }

    #[must_use]
    pub const fn with_arrival_window_us(mut self, usec: u64) -> Self {
        self.arrival_window_us = usec;
        self
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
