use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Location and size of a stored chunk within its shard file.
///
/// `offset` is always a non-negative multiple of the store's
/// `max_chunk_size`; `size` is the true payload length, not the padded
/// section length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub size: u16,
    pub offset: i64,
}

/// A shard's free-slot bookkeeping as seen by [`MetaStore::shard_slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSlots {
    pub shard: usize,
    pub slots: u64,
}

/// The persistent address→location index the store is built over.
///
/// Implementations own the durability story entirely; the store only relies
/// on the contract below. All methods take `&self` so a `MetaStore` can be
/// shared behind an `Arc`/`Box<dyn MetaStore>` without an outer lock. Each
/// implementation is responsible for its own internal synchronization.
pub trait MetaStore: Send + Sync {
    /// Looks up a chunk's location. `Err(StoreError::NotFound)` on a miss.
    fn get(&self, addr: &[u8]) -> Result<Meta>;

    /// Upserts `addr`'s record. When `reclaimed` is true, `meta.offset` is
    /// removed from `shard`'s free-offset bookkeeping and its free-slot
    /// counter is decremented. Returns the previous record, if any existed.
    fn set(&self, addr: &[u8], shard: usize, reclaimed: bool, meta: Meta) -> Result<Option<Meta>>;

    /// Removes `addr`'s record and returns its offset to `shard`'s free
    /// pool, incrementing the persistent free-slot counter.
    fn remove(&self, addr: &[u8], shard: usize) -> Result<Meta>;

    /// Total number of live addresses.
    fn count(&self) -> Result<usize>;

    /// Returns some recorded free offset for `shard`, or `None` if it has
    /// none on record. Does not mutate any bookkeeping; the caller folds
    /// the offset back in via [`MetaStore::set`] (reclaim) or
    /// [`MetaStore::release_offset`] (orphan) once it has actually been used
    /// or abandoned.
    fn free_offset(&self, shard: usize) -> Result<Option<i64>>;

    /// Visits every `(addr, meta)` pair exactly once, in unspecified order.
    /// `f` returns `Ok(true)` to continue, `Ok(false)` to stop early, or an
    /// error to abort the iteration.
    fn iterate(&self, f: &mut dyn FnMut(&[u8], Meta) -> Result<bool>) -> Result<()>;

    /// Per-shard free-slot counts. When `sorted` is false, shards are
    /// returned in ascending id order; when true, in descending slot count
    /// with ties broken by ascending shard id.
    fn shard_slots(&self, sorted: bool) -> Result<Vec<ShardSlots>>;

    /// Folds `offset` back into `shard`'s free pool without touching any
    /// address record. Used when `Put` orphans a previous occupant's slot
    /// on overwrite.
    fn release_offset(&self, shard: usize, offset: i64) -> Result<()>;

    /// Flushes and releases resources. Idempotent.
    fn close(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct ShardFree {
    slots: u64,
    offsets: HashSet<i64>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<(Vec<u8>, usize, Meta)>,
    free: Vec<(u64, Vec<i64>)>,
}

/// Reference in-memory [`MetaStore`]. Not crash-consistent: `snapshot_to`/
/// `load_from` are a convenience for the demo CLI to reopen a store across
/// process runs, not a durability guarantee. A real deployment swaps this
/// for a backend with its own write-ahead log or B-tree.
pub struct MemMetaStore {
    entries: Mutex<HashMap<Vec<u8>, (usize, Meta)>>,
    free: Mutex<Vec<ShardFree>>,
}

impl MemMetaStore {
    pub fn new(shard_count: usize) -> Self {
        let mut free = Vec::with_capacity(shard_count);
        free.resize_with(shard_count, ShardFree::default);
        Self {
            entries: Mutex::new(HashMap::new()),
            free: Mutex::new(free),
        }
    }

    pub fn snapshot_to(&self, path: &Path) -> Result<()> {
        let entries = self
            .entries
            .lock()
            .iter()
            .map(|(addr, (shard, meta))| (addr.clone(), *shard, *meta))
            .collect();
        let free = self
            .free
            .lock()
            .iter()
            .map(|f| (f.slots, f.offsets.iter().copied().collect()))
            .collect();
        let snapshot = Snapshot { entries, free };
        let bytes = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .map_err(|e| StoreError::Allocator(format!("snapshot encode failed: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (snapshot, _): (Snapshot, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| StoreError::Allocator(format!("snapshot decode failed: {e}")))?;

        let entries = snapshot
            .entries
            .into_iter()
            .map(|(addr, shard, meta)| (addr, (shard, meta)))
            .collect();
        let free = snapshot
            .free
            .into_iter()
            .map(|(slots, offsets)| ShardFree {
                slots,
                offsets: offsets.into_iter().collect(),
            })
            .collect();

        Ok(Self {
            entries: Mutex::new(entries),
            free: Mutex::new(free),
        })
    }
}

impl MetaStore for MemMetaStore {
    fn get(&self, addr: &[u8]) -> Result<Meta> {
        self.entries
            .lock()
            .get(addr)
            .map(|(_, meta)| *meta)
            .ok_or(StoreError::NotFound)
    }

    fn set(&self, addr: &[u8], shard: usize, reclaimed: bool, meta: Meta) -> Result<Option<Meta>> {
        let previous = self
            .entries
            .lock()
            .insert(addr.to_vec(), (shard, meta))
            .map(|(_, meta)| meta);

        if reclaimed {
            let mut free = self.free.lock();
            let state = &mut free[shard];
            state.offsets.remove(&meta.offset);
            state.slots = state.slots.saturating_sub(1);
        }

        Ok(previous)
    }

    fn remove(&self, addr: &[u8], shard: usize) -> Result<Meta> {
        let (_, meta) = self
            .entries
            .lock()
            .remove(addr)
            .ok_or(StoreError::NotFound)?;

        let mut free = self.free.lock();
        let state = &mut free[shard];
        state.offsets.insert(meta.offset);
        state.slots += 1;

        Ok(meta)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.lock().len())
    }

    fn free_offset(&self, shard: usize) -> Result<Option<i64>> {
        Ok(self.free.lock()[shard].offsets.iter().next().copied())
    }

    fn iterate(&self, f: &mut dyn FnMut(&[u8], Meta) -> Result<bool>) -> Result<()> {
        let snapshot: Vec<(Vec<u8>, Meta)> = self
            .entries
            .lock()
            .iter()
            .map(|(addr, (_, meta))| (addr.clone(), *meta))
            .collect();

        for (addr, meta) in snapshot {
            if !f(&addr, meta)? {
                break;
            }
        }
        Ok(())
    }

    fn shard_slots(&self, sorted: bool) -> Result<Vec<ShardSlots>> {
        let free = self.free.lock();
        let mut result: Vec<ShardSlots> = free
            .iter()
            .enumerate()
            .map(|(shard, state)| ShardSlots {
                shard,
                slots: state.slots,
            })
            .collect();

        if sorted {
            result.sort_by(|a, b| b.slots.cmp(&a.slots).then(a.shard.cmp(&b.shard)));
        }
        Ok(result)
    }

    fn release_offset(&self, shard: usize, offset: i64) -> Result<()> {
        let mut free = self.free.lock();
        let state = &mut free[shard];
        state.offsets.insert(offset);
        state.slots += 1;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Lets a shared handle to a [`MemMetaStore`] be passed into [`crate::store::Store`]
/// while the caller keeps its own `Arc` around, for example to snapshot it
/// after the store closes, as the demo CLI does.
impl MetaStore for std::sync::Arc<MemMetaStore> {
    fn get(&self, addr: &[u8]) -> Result<Meta> {
        (**self).get(addr)
    }

    fn set(&self, addr: &[u8], shard: usize, reclaimed: bool, meta: Meta) -> Result<Option<Meta>> {
        (**self).set(addr, shard, reclaimed, meta)
    }

    fn remove(&self, addr: &[u8], shard: usize) -> Result<Meta> {
        (**self).remove(addr, shard)
    }

    fn count(&self) -> Result<usize> {
        (**self).count()
    }

    fn free_offset(&self, shard: usize) -> Result<Option<i64>> {
        (**self).free_offset(shard)
    }

    fn iterate(&self, f: &mut dyn FnMut(&[u8], Meta) -> Result<bool>) -> Result<()> {
        (**self).iterate(f)
    }

    fn shard_slots(&self, sorted: bool) -> Result<Vec<ShardSlots>> {
        (**self).shard_slots(sorted)
    }

    fn release_offset(&self, shard: usize, offset: i64) -> Result<()> {
        (**self).release_offset(shard, offset)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
