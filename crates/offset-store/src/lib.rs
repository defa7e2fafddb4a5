//! External offset persistence for logtap
//!
//! A source can mirror its committed read positions into a store that
//! outlives the broker's own bookkeeping. The store is keyed per
//! (topic, partition, consumer group) and is strictly best-effort on the
//! write path: a source keeps committing to the broker even when the
//! store misbehaves.
//!
//! ## Storage backends
//!
//! - `FileOffsetStore` - Persists offsets as a JSON file
//! - `MemoryOffsetStore` - Keeps offsets in memory, for tests and wiring

mod file;
mod memory;

#[cfg(test)]
mod tests;

pub use file::FileOffsetStore;
pub use memory::MemoryOffsetStore;

use anyhow::Result;

/// Trait for offset storage operations.
///
/// Implementations only need to be safe for a single writer; the owning
/// source serializes all access.
pub trait OffsetStore: Send {
    /// Whether the store holds an offset for this key.
    fn has_offset(&self, key: &str) -> Result<bool>;

    /// Read the offset stored for this key.
    ///
    /// Callers check `has_offset` first; loading an absent key is an error.
    fn load_offset(&self, key: &str) -> Result<i64>;

    /// Record an offset for this key. Visible to `load_offset` immediately,
    /// durable only after `flush`.
    fn save_offset(&mut self, key: &str, offset: i64) -> Result<()>;

    /// Make previously saved offsets durable.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the store.
    fn close(&mut self) -> Result<()>;
}

/// Derive the store key for a (topic, partition, consumer group) triple.
///
/// The format is load-bearing: stores written by older deployments must
/// keep resolving after an upgrade, so this must never change.
pub fn offset_store_key(topic: &str, partition: i32, group_id: &str) -> String {
    format!("{topic}-{partition}-{group_id}")
}
