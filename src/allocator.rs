use parking_lot::RwLock;

use crate::cache::FreeOffsetCache;
use crate::error::Result;
use crate::meta::MetaStore;

/// Per-shard boolean hint: does this shard have any reclaimable slot?
///
/// `true` means "a previous delete targeting this shard has not yet been
/// balanced by a Put that consumed a reclaimed slot", an over-approximation
/// that may go stale. `false` is only authoritative right after the
/// allocator has just observed both the cache and the meta-store return
/// nothing for that shard.
pub struct FreeShardsBitmap {
    flags: RwLock<Vec<bool>>,
}

impl FreeShardsBitmap {
    pub fn new(shard_count: usize) -> Self {
        Self {
            flags: RwLock::new(vec![false; shard_count]),
        }
    }

    pub fn mark_free(&self, shard: usize) {
        self.flags.write()[shard] = true;
    }

    fn is_free(&self, shard: usize) -> bool {
        self.flags.read()[shard]
    }

    fn clear(&self, shard: usize) {
        self.flags.write()[shard] = false;
    }
}

/// The offset the allocator found for a Put, and whether it came from the
/// reclaimed-slot pool (`true`) or is a fresh end-of-file position (`false`,
/// offset `-1`, meaning "seek to end").
pub struct Allocation {
    pub offset: i64,
    pub reclaimed: bool,
}

/// Looks for a reclaimable offset on `shard`. Called with the shard lock
/// already held; the free-shards lock taken inside here is always the
/// innermost lock.
pub fn get_offset(
    bitmap: &FreeShardsBitmap,
    cache: Option<&FreeOffsetCache>,
    meta: &dyn MetaStore,
    shard: usize,
) -> Result<Allocation> {
    if !bitmap.is_free(shard) {
        return Ok(Allocation {
            offset: -1,
            reclaimed: false,
        });
    }

    if let Some(cache) = cache {
        if let Some(offset) = cache.get(shard) {
            return Ok(Allocation {
                offset,
                reclaimed: true,
            });
        }
    }

    if let Some(offset) = meta.free_offset(shard)? {
        return Ok(Allocation {
            offset,
            reclaimed: true,
        });
    }

    bitmap.clear(shard);
    Ok(Allocation {
        offset: -1,
        reclaimed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MemMetaStore;

    #[test]
    fn test_free_false_short_circuits_without_touching_cache_or_meta() {
        let bitmap = FreeShardsBitmap::new(4);
        let cache = FreeOffsetCache::new(4, 8);
        let meta = MemMetaStore::new(4);

        let allocation = get_offset(&bitmap, Some(&cache), &meta, 1).unwrap();
        assert_eq!(allocation.offset, -1);
        assert!(!allocation.reclaimed);
    }

    #[test]
    fn test_empty_sources_clears_flag_and_returns_none() {
        let bitmap = FreeShardsBitmap::new(4);
        bitmap.mark_free(2);
        let cache = FreeOffsetCache::new(4, 8);
        let meta = MemMetaStore::new(4);

        let allocation = get_offset(&bitmap, Some(&cache), &meta, 2).unwrap();
        assert_eq!(allocation.offset, -1);
        assert!(!bitmap.is_free(2));
    }

    #[test]
    fn test_cache_hit_is_preferred_over_meta_store() {
        let bitmap = FreeShardsBitmap::new(4);
        bitmap.mark_free(0);
        let cache = FreeOffsetCache::new(4, 8);
        cache.set(0, 100);
        let meta = MemMetaStore::new(4);
        meta.release_offset(0, 200).unwrap();

        let allocation = get_offset(&bitmap, Some(&cache), &meta, 0).unwrap();
        assert_eq!(allocation.offset, 100);
        assert!(allocation.reclaimed);
    }

    #[test]
    fn test_falls_back_to_meta_store_on_cache_miss() {
        let bitmap = FreeShardsBitmap::new(4);
        bitmap.mark_free(0);
        let cache = FreeOffsetCache::new(4, 8);
        let meta = MemMetaStore::new(4);
        meta.release_offset(0, 4096).unwrap();

        let allocation = get_offset(&bitmap, Some(&cache), &meta, 0).unwrap();
        assert_eq!(allocation.offset, 4096);
        assert!(allocation.reclaimed);
    }
}
