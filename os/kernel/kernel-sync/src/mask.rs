use crate::MAX_CORES;

/// Number of 64-bit words in a core bitmask.
pub const MASK_WORDS: usize = MAX_CORES.div_ceil(64);

/// A set of logical core ids with a declared logical size.
///
/// Bits at or above `size` are never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreMask {
    bits: [u64; MASK_WORDS],
    size: usize,
}

impl CoreMask {
    /// An empty mask over `size` cores.
    ///
    /// # Panics
    /// Panics if `size` exceeds [`MAX_CORES`].
    #[must_use]
    pub const fn new(size: usize) -> Self {
        assert!(size <= MAX_CORES, "core mask larger than MAX_CORES");
        Self {
            bits: [0; MASK_WORDS],
            size,
        }
    }

    /// A mask with every core below `size` set.
    #[must_use]
    pub fn full(size: usize) -> Self {
        let mut mask = Self::new(size);
        for core in 0..size {
            mask.set(core);
        }
        mask
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// # Panics
    /// Panics if `core` is outside the mask.
    pub const fn set(&mut self, core: usize) {
        assert!(core < self.size, "core outside of mask");
        self.bits[core / 64] |= 1 << (core % 64);
    }

    pub const fn clear(&mut self, core: usize) {
        if core < self.size {
            self.bits[core / 64] &= !(1 << (core % 64));
        }
    }

    #[must_use]
    pub const fn is_set(&self, core: usize) -> bool {
        core < self.size && self.bits[core / 64] & (1 << (core % 64)) != 0
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        (0..self.size).all(|core| self.is_set(core))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Raw words, lowest cores first.
    #[must_use]
    pub const fn words(&self) -> &[u64; MASK_WORDS] {
        &self.bits
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(|&core| self.is_set(core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mask_respects_size() {
        let mask = CoreMask::full(3);
        assert!(mask.is_full());
        assert_eq!(mask.count(), 3);
        assert!(!mask.is_set(3));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn clear_outside_size_is_ignored() {
        let mut mask = CoreMask::new(2);
        mask.set(1);
        mask.clear(40);
        assert_eq!(mask.count(), 1);
        mask.clear(1);
        assert!(mask.is_clear());
    }

    #[test]
    #[should_panic(expected = "core outside of mask")]
    fn set_outside_size_panics() {
        CoreMask::new(4).set(4);
    }
}
