//! Hardware ↔ logical core ids.
//!
//! Hardware (APIC) ids can be sparse; the kernel wants dense logical ids
//! `0..n`. While cores come up, each one writes a provisional identity
//! entry `hw → hw`. Once everyone is in, the boot core compacts the table:
//!
//! ```text
//! hw_of_os: [0, -, 2, -, -, 5, -, 7]  →  [0, 2, 5, 7]
//! os_of_hw: [0, -, 2, -, -, 5, -, 7]  →  [0, -, 1, -, -, 2, -, 3]
//! ```
//!
//! `hw_of_os` gets packed but keeps hardware values; `os_of_hw` stays sparse
//! but its values become consecutive. Then the map is frozen.

use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_sync::{AlreadyFrozen, FreezeCell, MAX_CORES};

const EMPTY: i32 = -1;

struct Tables {
    os_of_hw: [i32; MAX_CORES],
    hw_of_os: [i32; MAX_CORES],
}

impl Tables {
    fn os_core_id(&self, hw: u32) -> Option<usize> {
        let entry = *self.os_of_hw.get(usize::try_from(hw).ok()?)?;
        usize::try_from(entry).ok()
    }

    fn hw_core_id(&self, os: usize) -> Option<u32> {
        u32::try_from(*self.hw_of_os.get(os)?).ok()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn compact(&mut self, num_cores: usize) {
        let mut hw_step = 0;
        for os in 0..num_cores {
            if self.hw_of_os[os] == EMPTY {
                loop {
                    assert!(hw_step < MAX_CORES, "Mismatch in num_cpus and hw_step");
                    if self.hw_of_os[hw_step] != EMPTY {
                        break;
                    }
                    hw_step += 1;
                }
                self.hw_of_os[os] = self.hw_of_os[hw_step];
                self.hw_of_os[hw_step] = EMPTY;
                self.os_of_hw[hw_step] = os as i32;
            }
            hw_step += 1;
        }
    }
}

/// The identity mapping between hardware and logical core ids.
pub struct CoreMap {
    tables: FreezeCell<Tables>,
    arrived: AtomicUsize,
}

impl Default for CoreMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tables: FreezeCell::new(Tables {
                os_of_hw: [EMPTY; MAX_CORES],
                hw_of_os: [EMPTY; MAX_CORES],
            }),
            arrived: AtomicUsize::new(0),
        }
    }

    /// Records core `hw` with the provisional identity mapping and counts
    /// it. Returns the number of cores counted so far.
    ///
    /// # Panics
    /// If `hw` does not fit [`MAX_CORES`] or the map is already compacted.
    #[allow(clippy::cast_possible_wrap)]
    pub fn register_provisional(&self, hw: u32) -> usize {
        let slot = usize::try_from(hw).unwrap_or(usize::MAX);
        assert!(slot < MAX_CORES, "hardware core id {hw} beyond MAX_CORES");
        let registered = self.tables.update(|t| {
            t.os_of_hw[slot] = hw as i32;
            t.hw_of_os[slot] = hw as i32;
        });
        assert!(registered.is_ok(), "core {hw} registered after compaction");
        self.arrived.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Cores counted by [`CoreMap::register_provisional`].
    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire)
    }

    /// Packs the logical ids and freezes the map. Returns the core count.
    ///
    /// # Errors
    /// If the map was already compacted.
    ///
    /// # Panics
    /// If fewer distinct cores registered than were counted.
    pub fn compact(&self) -> Result<usize, AlreadyFrozen> {
        let num_cores = self.arrived();
        self.tables.update(|t| t.compact(num_cores))?;
        self.tables.freeze();
        Ok(num_cores)
    }

    pub fn is_compacted(&self) -> bool {
        self.tables.is_frozen()
    }

    /// Logical id of hardware core `hw`. Before compaction this is the
    /// provisional identity entry.
    pub fn os_core_id(&self, hw: u32) -> Option<usize> {
        self.read(|t| t.os_core_id(hw))
    }

    /// Hardware id of logical core `os`.
    pub fn hw_core_id(&self, os: usize) -> Option<u32> {
        self.read(|t| t.hw_core_id(os))
    }

    pub fn num_cores(&self) -> usize {
        self.arrived()
    }

    fn read<R>(&self, f: impl Fn(&Tables) -> R) -> R {
        loop {
            if let Some(tables) = self.tables.get() {
                return f(tables);
            }
            // Still provisional: read under the writer lock. A freeze in
            // between sends us around once more.
            if let Ok(r) = self.tables.update(|t| f(t)) {
                return r;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_ids_stay_put() {
        let map = CoreMap::new();
        for hw in 0..4 {
            map.register_provisional(hw);
        }
        assert_eq!(map.compact(), Ok(4));
        for id in 0..4 {
            assert_eq!(map.os_core_id(id), Some(id as usize));
            assert_eq!(map.hw_core_id(id as usize), Some(id));
        }
        assert_eq!(map.hw_core_id(4), None);
    }

    #[test]
    fn provisional_lookups_are_identity() {
        let map = CoreMap::new();
        map.register_provisional(0);
        map.register_provisional(6);
        assert_eq!(map.os_core_id(6), Some(6));
        assert_eq!(map.hw_core_id(6), Some(6));
        assert_eq!(map.os_core_id(3), None);
        assert!(!map.is_compacted());
    }

    #[test]
    fn second_compaction_is_rejected() {
        let map = CoreMap::new();
        map.register_provisional(0);
        assert_eq!(map.compact(), Ok(1));
        assert_eq!(map.compact(), Err(AlreadyFrozen));
    }
}
