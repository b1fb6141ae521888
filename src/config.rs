use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Number of shard files a production store is partitioned across.
///
/// Tests that need to exercise the allocator with a small, enumerable shard
/// space (e.g. the `shard_slots` ordering scenario) override this via
/// [`StoreConfig::shard_count`]; real stores always use this constant.
pub const SHARD_COUNT: usize = 32;

/// Construction-time configuration for a [`crate::store::Store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the shard files. Created (mode 0777) if absent.
    pub directory: PathBuf,
    /// Maximum payload size a chunk may have; also the fixed section size.
    pub max_chunk_size: usize,
    /// Whether to keep an in-memory free-offset cache per shard.
    pub with_cache: bool,
    /// Per-shard bound on the free-offset cache, when enabled.
    pub cache_capacity: usize,
    /// Shard count override, test-only; production code must leave this `None`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub shard_count_override: Option<usize>,
}

impl StoreConfig {
    pub fn new(directory: impl Into<PathBuf>, max_chunk_size: usize) -> Self {
        Self {
            directory: directory.into(),
            max_chunk_size,
            with_cache: true,
            cache_capacity: 64,
            shard_count_override: None,
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.with_cache = false;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Test-only hook: shrink the shard space so small-N scenarios are easy
    /// to reason about and enumerate exhaustively.
    pub fn with_shard_count(mut self, count: usize) -> Self {
        self.shard_count_override = Some(count);
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count_override.unwrap_or(SHARD_COUNT)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(StoreError::Allocator(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.max_chunk_size > u16::MAX as usize {
            return Err(StoreError::Allocator(format!(
                "max_chunk_size {} exceeds the {}-byte Meta::size limit",
                self.max_chunk_size,
                u16::MAX
            )));
        }
        Ok(())
    }

    /// Loads configuration from a TOML file, e.g. `store.toml`:
    ///
    /// ```toml
    /// directory = "/var/lib/chunkvault"
    /// max_chunk_size = 4194304
    /// with_cache = true
    /// cache_capacity = 64
    /// ```
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| StoreError::Allocator(format!("invalid config at {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}
