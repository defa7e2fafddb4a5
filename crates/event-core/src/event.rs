//! Neutral event envelope shared by sources and sinks.
//!
//! An [`Event`] is immutable once built: the `with_*` methods return a new
//! event and leave the original untouched, which is what callers need when
//! retrofitting events read from one format into another.

use serde::Serialize;

/// Position of the broker record an event was decoded from.
///
/// Present only on events produced by a broker-backed source; events built
/// by hand or replayed from files carry no handle. The handle is what the
/// commit protocol uses to map an event back to a partition offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceHandle {
    /// Topic the record was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset of the record within the partition
    pub offset: i64,
}

impl std::fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Immutable event envelope: key, value and an ordered header multi-map.
///
/// Headers keep insertion order and permit duplicate names. Equality and
/// hashing cover the header set (order-insensitive), key and value, and
/// deliberately exclude the source handle: the same logical event read from
/// two partitions compares equal.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    key: Option<String>,
    value: Option<String>,
    headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<SourceHandle>,
}

impl Event {
    /// Create an event with no headers and no source handle.
    pub fn new(key: Option<String>, value: Option<String>) -> Self {
        Self {
            key,
            value,
            headers: Vec::new(),
            source: None,
        }
    }

    /// Append a header, keeping insertion order. Duplicate names are allowed.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach the broker position this event was decoded from.
    pub fn with_source(mut self, source: SourceHandle) -> Self {
        self.source = Some(source);
        self
    }

    /// Return a copy of this event with a different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.key = Some(key.into());
        copy
    }

    /// Return a copy of this event with a different value.
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.value = Some(value.into());
        copy
    }

    /// Return a copy with all occurrences of `name` replaced by a single
    /// header, appended at the end if the name was absent.
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let mut copy = self.clone();
        copy.headers.retain(|(n, _)| n != &name);
        copy.headers.push((name, value.into()));
        copy
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// All headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header with the given name, if any.
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn source(&self) -> Option<&SourceHandle> {
        self.source.as_ref()
    }

    fn sorted_headers(&self) -> Vec<&(String, String)> {
        let mut sorted: Vec<_> = self.headers.iter().collect();
        sorted.sort();
        sorted
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.sorted_headers() == other.sorted_headers()
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.hash(state);
        self.sorted_headers().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &str, value: &str) -> Event {
        Event::new(Some(key.to_string()), Some(value.to_string()))
    }

    #[test]
    fn test_replacement_leaves_original_untouched() {
        let original = event("k", "v").header("h", "1");
        let replaced = original.with_value("v2").with_header("h", "2");

        assert_eq!(original.value(), Some("v"));
        assert_eq!(original.first_header("h"), Some("1"));
        assert_eq!(replaced.value(), Some("v2"));
        assert_eq!(replaced.first_header("h"), Some("2"));
    }

    #[test]
    fn test_with_header_replaces_all_occurrences() {
        let e = event("k", "v").header("h", "1").header("h", "2");
        let replaced = e.with_header("h", "3");

        assert_eq!(replaced.headers(), &[("h".to_string(), "3".to_string())]);
    }

    #[test]
    fn test_equality_ignores_header_order() {
        let a = event("k", "v").header("x", "1").header("y", "2");
        let b = event("k", "v").header("y", "2").header("x", "1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_respects_header_multiplicity() {
        let a = event("k", "v").header("x", "1").header("x", "1");
        let b = event("k", "v").header("x", "1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_equality_excludes_source_handle() {
        let a = event("k", "v").with_source(SourceHandle {
            topic: "t".to_string(),
            partition: 0,
            offset: 1,
        });
        let b = event("k", "v").with_source(SourceHandle {
            topic: "t".to_string(),
            partition: 5,
            offset: 99,
        });
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_key_and_value() {
        let e = Event::new(None, None);
        assert_eq!(e.key(), None);
        assert_eq!(e.value(), None);
        assert_ne!(e, event("k", "v"));
    }
}
