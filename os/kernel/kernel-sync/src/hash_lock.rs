use crate::{RawLock, RawUnlock};

/// `N` independent locks, one picked per key by hashing.
///
/// Lets unrelated objects share a small lock pool instead of each carrying
/// its own lock. Two keys landing on the same shard simply serialize.
pub struct HashLock<R, const N: usize> {
    shards: [R; N],
}

impl<R: Default, const N: usize> Default for HashLock<R, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Default, const N: usize> HashLock<R, N> {
    #[must_use]
    pub fn new() -> Self {
        const { assert!(N > 0, "a hash lock needs at least one shard") };
        Self {
            shards: core::array::from_fn(|_| R::default()),
        }
    }
}

impl<R, const N: usize> HashLock<R, N> {
    /// Shard index for `key`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn shard_of(key: usize) -> usize {
        // Fibonacci hashing spreads sequential keys (addresses, ids) evenly.
        let h = (key as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ((h >> 32) as usize) % N
    }

    pub const fn shard(&self, key: usize) -> &R {
        &self.shards[Self::shard_of(key)]
    }
}

impl<R: RawLock + RawUnlock, const N: usize> HashLock<R, N> {
    pub fn lock(&self, key: usize) -> HashLockGuard<'_, R> {
        let raw = self.shard(key);
        raw.raw_lock();
        HashLockGuard { raw }
    }
}

pub struct HashLockGuard<'a, R: RawUnlock> {
    raw: &'a R,
}

impl<R: RawUnlock> Drop for HashLockGuard<'_, R> {
    fn drop(&mut self) {
        unsafe { self.raw.raw_unlock() }
    }
}
