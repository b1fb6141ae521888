use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::allocator::{get_offset, FreeShardsBitmap};
use crate::cache::FreeOffsetCache;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lifecycle::ShutdownGuard;
use crate::meta::{Meta, MetaStore};
use crate::shard::{read_section, shard_for, write_section, Shard};

/// A chunk as returned by [`Store::iterate`]: its address and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub address: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Composes the shard file set, the free-offset cache, the free-shards
/// bitmap, the lifecycle guard, and an injected meta-store behind the
/// Put/Get/Has/Delete/Iterate/Count/Close surface.
pub struct Store {
    shards: Vec<Shard>,
    bitmap: FreeShardsBitmap,
    cache: Option<FreeOffsetCache>,
    meta: Box<dyn MetaStore>,
    guard: ShutdownGuard,
    max_chunk_size: usize,
    shard_count: usize,
}

impl Store {
    /// Opens (creating if absent) the shard file set rooted at
    /// `config.directory`, against the supplied meta-store. The meta-store
    /// is assumed ready (already opened/recovered by the caller); this
    /// store does not know or care what backs it.
    pub fn open(config: StoreConfig, meta: Box<dyn MetaStore>) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.directory)?;
        set_dir_permissive(&config.directory)?;

        let shard_count = config.shard_count();
        let mut shards = Vec::with_capacity(shard_count);
        for id in 0..shard_count {
            shards.push(Shard::open(&config.directory, id)?);
        }

        let cache = config
            .with_cache
            .then(|| FreeOffsetCache::new(shard_count, config.cache_capacity));

        info!(
            directory = %config.directory.display(),
            shard_count,
            max_chunk_size = config.max_chunk_size,
            with_cache = config.with_cache,
            "opened chunk store"
        );

        Ok(Self {
            shards,
            bitmap: FreeShardsBitmap::new(shard_count),
            cache,
            meta,
            guard: ShutdownGuard::new(),
            max_chunk_size: config.max_chunk_size,
            shard_count,
        })
    }

    /// Writes `payload` under `addr`, replacing any existing chunk at that
    /// address in place.
    pub fn put(&self, addr: &[u8], payload: &[u8]) -> Result<()> {
        let _token = self.guard.protect()?;

        if payload.len() > self.max_chunk_size {
            return Err(StoreError::PayloadTooLarge {
                max: self.max_chunk_size,
                actual: payload.len(),
            });
        }

        let shard_id = shard_for(addr, self.shard_count);
        let shard = &self.shards[shard_id];
        let mut file = shard.lock();

        let mut section = vec![0u8; self.max_chunk_size];
        section[..payload.len()].copy_from_slice(payload);

        let allocation = get_offset(&self.bitmap, self.cache.as_ref(), self.meta.as_ref(), shard_id)?;
        let actual_offset = write_section(&mut file, allocation.offset, &section)?;

        if allocation.reclaimed {
            if let Some(cache) = &self.cache {
                cache.remove(shard_id, actual_offset);
            }
        }

        let record = Meta {
            size: payload.len() as u16,
            offset: actual_offset,
        };
        let previous = self.meta.set(addr, shard_id, allocation.reclaimed, record)?;

        if let Some(prev) = previous {
            if prev.offset != actual_offset {
                // Overwrite: the old slot is no longer referenced by any
                // live address. Reclaim it now rather than leak it.
                self.bitmap.mark_free(shard_id);
                if let Some(cache) = &self.cache {
                    cache.set(shard_id, prev.offset);
                }
                self.meta.release_offset(shard_id, prev.offset)?;
            }
        }

        debug!(shard = shard_id, offset = actual_offset, size = payload.len(), "put");
        Ok(())
    }

    /// Reads the payload stored under `addr`.
    pub fn get(&self, addr: &[u8]) -> Result<Vec<u8>> {
        let _token = self.guard.protect()?;

        let shard_id = shard_for(addr, self.shard_count);
        let mut file = self.shards[shard_id].lock();

        let meta = self.meta.get(addr)?;
        let data = read_section(&mut file, meta.offset, meta.size as usize)?;
        if data.len() != meta.size as usize {
            warn!(
                shard = shard_id,
                offset = meta.offset,
                expected = meta.size,
                observed = data.len(),
                "incomplete chunk data"
            );
            return Err(StoreError::Corruption {
                expected: meta.size as usize,
                observed: data.len(),
            });
        }
        Ok(data)
    }

    /// Reports whether `addr` currently has a live chunk.
    pub fn has(&self, addr: &[u8]) -> Result<bool> {
        let _token = self.guard.protect()?;

        let shard_id = shard_for(addr, self.shard_count);
        let _file = self.shards[shard_id].lock();

        match self.meta.get(addr) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes the chunk stored under `addr`, freeing its slot for reuse.
    pub fn delete(&self, addr: &[u8]) -> Result<()> {
        let _token = self.guard.protect()?;

        let shard_id = shard_for(addr, self.shard_count);
        // Set before acquiring the shard lock: an over-approximating hint,
        // deliberately left in place even if a subsequent step fails.
        self.bitmap.mark_free(shard_id);

        let _file = self.shards[shard_id].lock();

        if let Some(cache) = &self.cache {
            match self.meta.get(addr) {
                Ok(meta) => cache.set(shard_id, meta.offset),
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        self.meta.remove(addr, shard_id)?;
        debug!(shard = shard_id, "delete");
        Ok(())
    }

    /// Total number of live addresses. Delegates straight to the
    /// meta-store, outside the per-shard lock regime.
    pub fn count(&self) -> Result<usize> {
        let _token = self.guard.protect()?;
        self.meta.count()
    }

    /// Visits every live chunk exactly once, in unspecified order. `f`
    /// returns `Ok(true)` to continue, `Ok(false)` to stop early.
    ///
    /// Acquires every shard lock, in ascending id order, for the duration
    /// of the walk. This is the only operation that holds more than one
    /// shard lock at a time.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Chunk) -> Result<bool>,
    {
        let _token = self.guard.protect()?;

        let mut files = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            files.push(shard.lock());
        }

        self.meta.iterate(&mut |addr, meta| {
            let shard_id = shard_for(addr, self.shard_count);
            let file = &mut *files[shard_id];
            let payload = read_section(file, meta.offset, meta.size as usize)?;
            if payload.len() != meta.size as usize {
                return Err(StoreError::Corruption {
                    expected: meta.size as usize,
                    observed: payload.len(),
                });
            }
            f(Chunk {
                address: addr.to_vec(),
                payload,
            })
        })
    }

    /// Stops new operations, waits (up to 15s) for in-flight ones to
    /// finish, then closes every shard file and the meta-store regardless
    /// of earlier failures, returning the first error encountered, if any.
    pub fn close(&self) -> Result<()> {
        self.guard.close();

        let mut first_err = None;
        for shard in &self.shards {
            if let Err(e) = shard.close() {
                warn!(shard = shard.id, error = %e, "error closing shard file");
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = self.meta.close() {
            warn!(error = %e, "error closing meta-store");
            first_err.get_or_insert(e);
        }

        info!("chunk store closed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
fn set_dir_permissive(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o777);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissive(_path: &Path) -> Result<()> {
    Ok(())
}
