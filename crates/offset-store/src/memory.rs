//! In-memory offset storage implementation.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::OffsetStore;

/// In-memory implementation of the OffsetStore trait.
///
/// Clones share one underlying map, so a test can hand a clone to a source
/// and inspect what the source wrote. Failure injection covers the
/// swallowed-error paths a file-backed store would exercise.
#[derive(Clone, Default)]
pub struct MemoryOffsetStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    offsets: HashMap<String, i64>,
    flushes: usize,
    closed: bool,
    fail_writes: bool,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an offset, as if a previous run had stored it.
    pub fn with_offset(self, key: &str, offset: i64) -> Self {
        self.inner.lock().offsets.insert(key.to_string(), offset);
        self
    }

    /// Make every subsequent `save_offset` and `flush` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// How many times `flush` has been called.
    pub fn flushes(&self) -> usize {
        self.inner.lock().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Snapshot of everything stored.
    pub fn offsets(&self) -> HashMap<String, i64> {
        self.inner.lock().offsets.clone()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn has_offset(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().offsets.contains_key(key))
    }

    fn load_offset(&self, key: &str) -> Result<i64> {
        self.inner
            .lock()
            .offsets
            .get(key)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No offset stored for key: {key}"))
    }

    fn save_offset(&mut self, key: &str, offset: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            anyhow::bail!("Offset store write rejected (failure injection)");
        }
        inner.offsets.insert(key.to_string(), offset);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            anyhow::bail!("Offset store flush rejected (failure injection)");
        }
        inner.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.flushes += 1;
        inner.closed = true;
        Ok(())
    }
}
