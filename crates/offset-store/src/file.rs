//! File-based offset storage implementation.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::OffsetStore;

/// File implementation of the OffsetStore trait.
///
/// Holds the full key/offset map in memory and persists it as one JSON
/// file. `flush` writes a sibling temp file and renames it over the real
/// one, so a crash mid-write leaves the previous snapshot intact.
pub struct FileOffsetStore {
    path: PathBuf,
    offsets: HashMap<String, i64>,
    dirty: bool,
}

impl FileOffsetStore {
    /// Open a store at the given path, loading any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let offsets = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read offset store {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Offset store {} is not valid JSON", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            offsets,
            dirty: false,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl OffsetStore for FileOffsetStore {
    fn has_offset(&self, key: &str) -> Result<bool> {
        Ok(self.offsets.contains_key(key))
    }

    fn load_offset(&self, key: &str) -> Result<i64> {
        self.offsets
            .get(key)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No offset stored for key: {key}"))
    }

    fn save_offset(&mut self, key: &str, offset: i64) -> Result<()> {
        self.offsets.insert(key.to_string(), offset);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.offsets)?)
            .with_context(|| format!("Failed to write offset store {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace offset store {}", self.path.display()))?;
        self.dirty = false;
        tracing::debug!("Flushed {} offsets to {}", self.offsets.len(), self.path.display());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}
