//! Per-item value cache
//!
//! Each cached item keeps its last value in `<cache_dir>/<item path>` as a
//! JSON document. The file's modification time is the item's restored
//! `last_change`. Writes go to a temp file first and are renamed into place.

use chrono::{DateTime, Local};
use sh_core::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{CacheError, CacheResult};

/// Directory of cached item values
#[derive(Debug, Clone)]
pub struct ValueCache {
    dir: PathBuf,
}

/// A value restored from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    /// Modification time of the cache file
    pub changed: DateTime<Local>,
}

impl ValueCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file of an item
    pub fn file_path(&self, item: &str) -> PathBuf {
        self.dir.join(item)
    }

    /// Read a cached value; `Ok(None)` when nothing was cached yet
    pub fn read(&self, item: &str) -> CacheResult<Option<CachedValue>> {
        let path = self.file_path(item);
        if !path.exists() {
            trace!(item = %item, "No cache file");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| CacheError::Read {
            path: path.clone(),
            source,
        })?;
        let changed = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Local>::from)
            .map_err(|source| CacheError::Read {
                path: path.clone(),
                source,
            })?;
        let value = serde_json::from_str(&content).map_err(|source| CacheError::Decode {
            path: path.clone(),
            source,
        })?;

        debug!(item = %item, "Restored cached value");
        Ok(Some(CachedValue { value, changed }))
    }

    /// Persist a value, replacing the previous cache file atomically
    pub fn write(&self, item: &str, value: &Value) -> CacheResult<()> {
        let path = self.file_path(item);
        let temp_path = self.file_path(&format!("{item}.tmp"));
        let write_err = |source| CacheError::Write {
            path: path.clone(),
            source,
        };

        let content = serde_json::to_string(value).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        fs::write(&temp_path, content).map_err(write_err)?;
        fs::rename(&temp_path, &path).map_err(write_err)?;

        trace!(item = %item, "Wrote cache file");
        Ok(())
    }
}
