//! Duplicate and unmodified-item suppression stages.

use super::Sink;
use anyhow::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Drops items already seen (by equality) within a bounded LRU window.
///
/// The cache holds at most `capacity` items; inserting past that evicts the
/// least recently seen entry, so a small cache over a thrashing workload
/// degrades to forwarding everything rather than dropping anything wrongly.
/// An optional inactivity window clears the whole cache when no item has
/// arrived for that long.
pub struct SuppressDuplicatesSink<T, S> {
    destination: S,
    capacity: usize,
    seen: HashMap<T, u64>,
    stamp: u64,
    expire_after: Option<Duration>,
    last_activity: Instant,
}

impl<T, S> SuppressDuplicatesSink<T, S>
where
    T: Eq + Hash + Clone + Send,
    S: Sink<T>,
{
    pub fn new(capacity: usize, destination: S) -> Self {
        assert!(capacity > 0, "duplicate cache capacity must be at least 1");
        Self {
            destination,
            capacity,
            seen: HashMap::new(),
            stamp: 0,
            expire_after: None,
            last_activity: Instant::now(),
        }
    }

    /// Clear the whole cache after `window` without any item arriving.
    pub fn expire_after(mut self, window: Duration) -> Self {
        self.expire_after = Some(window);
        self
    }

    /// Forget one cached item so its next occurrence forwards again.
    pub fn invalidate(&mut self, item: &T) {
        self.seen.remove(item);
    }

    /// Forget everything.
    pub fn invalidate_all(&mut self) {
        self.seen.clear();
    }

    pub fn cached(&self) -> usize {
        self.seen.len()
    }

    fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .seen
            .iter()
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(item, _)| item.clone())
        {
            self.seen.remove(&oldest);
        }
    }
}

impl<T, S> Sink<T> for SuppressDuplicatesSink<T, S>
where
    T: Eq + Hash + Clone + Send,
    S: Sink<T>,
{
    fn send(&mut self, item: T) -> Result<()> {
        if let Some(window) = self.expire_after {
            if self.last_activity.elapsed() >= window {
                self.seen.clear();
            }
        }
        self.last_activity = Instant::now();

        let stamp = self.next_stamp();
        if let Some(seen_stamp) = self.seen.get_mut(&item) {
            *seen_stamp = stamp;
            return Ok(());
        }

        if self.seen.len() >= self.capacity {
            self.evict_oldest();
        }
        self.seen.insert(item.clone(), stamp);
        self.destination.send(item)
    }

    fn close(&mut self) -> Result<()> {
        self.destination.close()
    }
}

/// Drops an item when its comparison value is unchanged for its key.
///
/// Unlike [`SuppressDuplicatesSink`] this compares an extracted value per
/// extracted key, so an item forwards whenever the part that matters
/// changed, even if the item as a whole was seen before.
pub struct SuppressUnmodifiedSink<K, V, FK, FV, C, S> {
    destination: S,
    extract_key: FK,
    extract_value: FV,
    unchanged: C,
    capacity: usize,
    last: HashMap<K, (V, u64)>,
    stamp: u64,
}

impl<K, V, FK, FV, C, S> SuppressUnmodifiedSink<K, V, FK, FV, C, S>
where
    K: Eq + Hash + Clone,
{
    /// `unchanged(previous, current)` returning true drops the item.
    pub fn new(capacity: usize, extract_key: FK, extract_value: FV, unchanged: C, destination: S) -> Self {
        assert!(capacity > 0, "comparison cache capacity must be at least 1");
        Self {
            destination,
            extract_key,
            extract_value,
            unchanged,
            capacity,
            last: HashMap::new(),
            stamp: 0,
        }
    }

    pub fn cached(&self) -> usize {
        self.last.len()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .last
            .iter()
            .min_by_key(|(_, (_, stamp))| *stamp)
            .map(|(key, _)| key.clone())
        {
            self.last.remove(&oldest);
        }
    }
}

impl<T, K, V, FK, FV, C, S> Sink<T> for SuppressUnmodifiedSink<K, V, FK, FV, C, S>
where
    T: Send,
    K: Eq + Hash + Clone + Send,
    V: Send,
    FK: FnMut(&T) -> K + Send,
    FV: FnMut(&T) -> V + Send,
    C: FnMut(&V, &V) -> bool + Send,
    S: Sink<T>,
{
    fn send(&mut self, item: T) -> Result<()> {
        let key = (self.extract_key)(&item);
        let value = (self.extract_value)(&item);
        self.stamp += 1;

        if let Some((previous, stamp)) = self.last.get_mut(&key) {
            if (self.unchanged)(previous, &value) {
                *stamp = self.stamp;
                return Ok(());
            }
            *previous = value;
            *stamp = self.stamp;
            return self.destination.send(item);
        }

        if self.last.len() >= self.capacity {
            self.evict_oldest();
        }
        self.last.insert(key, (value, self.stamp));
        self.destination.send(item)
    }

    fn close(&mut self) -> Result<()> {
        self.destination.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectorSink;

    #[test]
    fn test_duplicates_dropped_within_capacity() {
        let collected = CollectorSink::new();
        let mut sink = SuppressDuplicatesSink::new(8, collected.clone());

        for item in ["a", "a", "b"] {
            sink.send(item).unwrap();
        }
        assert_eq!(collected.items(), vec!["a", "b"]);
    }

    #[test]
    fn test_capacity_one_thrashes_and_forwards_everything() {
        let collected = CollectorSink::new();
        let mut sink = SuppressDuplicatesSink::new(1, collected.clone());

        for item in ["a", "b", "a", "b"] {
            sink.send(item).unwrap();
        }
        assert_eq!(collected.items(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_lru_eviction_prefers_least_recently_seen() {
        let collected = CollectorSink::new();
        let mut sink = SuppressDuplicatesSink::new(2, collected.clone());

        sink.send("a").unwrap();
        sink.send("b").unwrap();
        sink.send("a").unwrap(); // dropped, refreshes a
        sink.send("c").unwrap(); // evicts b
        sink.send("a").unwrap(); // still cached, dropped
        sink.send("b").unwrap(); // was evicted, forwards again

        assert_eq!(collected.items(), vec!["a", "b", "c", "b"]);
    }

    #[test]
    fn test_invalidation_reopens_for_one_item() {
        let collected = CollectorSink::new();
        let mut sink = SuppressDuplicatesSink::new(8, collected.clone());

        sink.send("a").unwrap();
        sink.send("b").unwrap();
        sink.invalidate(&"a");
        sink.send("a").unwrap();
        sink.send("b").unwrap(); // still cached, dropped

        assert_eq!(collected.items(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_inactivity_expiry_clears_cache() {
        let collected = CollectorSink::new();
        let mut sink =
            SuppressDuplicatesSink::new(8, collected.clone()).expire_after(Duration::from_millis(20));

        sink.send("a").unwrap();
        std::thread::sleep(Duration::from_millis(40));
        sink.send("a").unwrap();

        assert_eq!(collected.items(), vec!["a", "a"]);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Update {
        id: &'static str,
        revision: u64,
    }

    #[test]
    fn test_unmodified_dropped_changed_forwarded() {
        let collected = CollectorSink::new();
        let mut sink = SuppressUnmodifiedSink::new(
            8,
            |u: &Update| u.id,
            |u: &Update| u.revision,
            |prev: &u64, current: &u64| prev == current,
            collected.clone(),
        );

        sink.send(Update { id: "x", revision: 1 }).unwrap();
        sink.send(Update { id: "x", revision: 1 }).unwrap(); // unchanged
        sink.send(Update { id: "x", revision: 2 }).unwrap();
        sink.send(Update { id: "y", revision: 1 }).unwrap();

        let revisions: Vec<(_, _)> = collected
            .items()
            .into_iter()
            .map(|u| (u.id, u.revision))
            .collect();
        assert_eq!(revisions, vec![("x", 1), ("x", 2), ("y", 1)]);
    }

    #[test]
    fn test_unmodified_custom_comparator() {
        let collected = CollectorSink::new();
        // Treat revisions within 10 of each other as unchanged.
        let mut sink = SuppressUnmodifiedSink::new(
            8,
            |u: &Update| u.id,
            |u: &Update| u.revision,
            |prev: &u64, current: &u64| current.abs_diff(*prev) < 10,
            collected.clone(),
        );

        sink.send(Update { id: "x", revision: 100 }).unwrap();
        sink.send(Update { id: "x", revision: 105 }).unwrap(); // within band
        sink.send(Update { id: "x", revision: 200 }).unwrap();

        assert_eq!(collected.len(), 2);
    }
}
