use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::config::SHARD_COUNT;

/// Per-shard bounded set of offsets known to be reclaimable, kept to avoid
/// consulting the meta-store on the hot path. Entirely advisory: dropping an
/// entry is always safe because the meta-store remains authoritative.
///
/// Backed by a `VecDeque` per shard so the bound is enforced by evicting the
/// oldest entry.
pub struct FreeOffsetCache {
    shards: Vec<Mutex<VecDeque<i64>>>,
    capacity: usize,
}

impl FreeOffsetCache {
    pub fn new(shard_count: usize, capacity: usize) -> Self {
        let mut shards = Vec::with_capacity(shard_count.max(1));
        shards.resize_with(shard_count.max(1), || Mutex::new(VecDeque::new()));
        Self { shards, capacity }
    }

    /// Removes and returns one offset for `shard`, or `None` if empty.
    pub fn get(&self, shard: usize) -> Option<i64> {
        self.shards[shard].lock().pop_front()
    }

    /// Inserts `offset`, evicting the oldest entry first if `shard` is at
    /// capacity.
    pub fn set(&self, shard: usize, offset: i64) {
        let mut slots = self.shards[shard].lock();
        if slots.len() >= self.capacity {
            slots.pop_front();
        }
        slots.push_back(offset);
    }

    /// Removes `offset` from `shard`'s cache if present; a no-op otherwise.
    pub fn remove(&self, shard: usize, offset: i64) {
        let mut slots = self.shards[shard].lock();
        if let Some(pos) = slots.iter().position(|&o| o == offset) {
            slots.remove(pos);
        }
    }
}

impl Default for FreeOffsetCache {
    fn default() -> Self {
        Self::new(SHARD_COUNT, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_on_empty_shard_is_none() {
        let cache = FreeOffsetCache::new(4, 8);
        assert_eq!(cache.get(0), None);
    }

    #[test]
    fn test_set_then_get_returns_offset() {
        let cache = FreeOffsetCache::new(4, 8);
        cache.set(1, 4096);
        assert_eq!(cache.get(1), Some(4096));
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn test_remove_drops_specific_offset() {
        let cache = FreeOffsetCache::new(4, 8);
        cache.set(0, 100);
        cache.set(0, 200);
        cache.remove(0, 100);
        assert_eq!(cache.get(0), Some(200));
    }

    #[test]
    fn test_capacity_bound_evicts_oldest() {
        let cache = FreeOffsetCache::new(1, 2);
        cache.set(0, 1);
        cache.set(0, 2);
        cache.set(0, 3);
        // 1 was evicted when 3 was inserted.
        assert_eq!(cache.get(0), Some(2));
        assert_eq!(cache.get(0), Some(3));
        assert_eq!(cache.get(0), None);
    }
}
