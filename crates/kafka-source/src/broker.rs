//! Broker client abstraction.
//!
//! The source core is written against these traits rather than rdkafka
//! directly. `KafkaClient` implements them over a `BaseConsumer`; the
//! `testing` module provides an in-memory implementation for protocol
//! tests.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A (topic, partition) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// One record as fetched from the broker, before decoding.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl FetchedRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Where a seek should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    Beginning,
    End,
    Offset(i64),
}

/// Errors surfaced by a broker client.
///
/// `Interrupted` is the one recoverable case: a fetch woken by shutdown
/// cancellation. Everything else indicates the source cannot make
/// progress without operator action.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("fetch interrupted")]
    Interrupted,

    #[error("invalid offset for {topic}[{partition}]: {detail}")]
    InvalidOffset {
        topic: String,
        partition: i32,
        detail: String,
    },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("no partitions assigned: {0}")]
    NoPartitionsAssigned(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

/// The narrow surface an assignment callback may touch.
///
/// Rebalance callbacks run inside the client's own poll, so they get a
/// borrowed handle restricted to seeking and position queries.
pub trait SeekHandle {
    fn seek(&self, tp: &TopicPartition, target: SeekTarget) -> Result<(), BrokerError>;

    /// Next offset this consumer would read, if known.
    fn position(&self, tp: &TopicPartition) -> Result<Option<i64>, BrokerError>;
}

/// Full broker client surface consumed by the event source.
///
/// Commit maps carry the offset of the next record to read per partition
/// (highest observed + 1), following the broker's own commit convention.
pub trait BrokerClient: SeekHandle + Send {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    fn unsubscribe(&self);

    fn assign(&self, partitions: &[TopicPartition]) -> Result<(), BrokerError>;

    /// Partitions currently owned by this consumer.
    fn assignment(&self) -> Result<Vec<TopicPartition>, BrokerError>;

    /// Fetch up to `max_records`, blocking up to `timeout` for the first.
    fn fetch(
        &self,
        timeout: Duration,
        max_records: usize,
        out: &mut Vec<FetchedRecord>,
    ) -> Result<(), BrokerError>;

    /// Commit explicit next-read offsets, synchronously.
    fn commit(&self, offsets: &BTreeMap<TopicPartition, i64>) -> Result<(), BrokerError>;

    /// Commit the client's own last-fetch bookkeeping, synchronously.
    /// Succeeds as a no-op when nothing has been fetched yet.
    fn commit_current(&self) -> Result<(), BrokerError>;

    fn partitions_for(&self, topic: &str, timeout: Duration) -> Result<Vec<i32>, BrokerError>;

    /// (low, high) watermark offsets for a partition.
    fn watermarks(&self, tp: &TopicPartition, timeout: Duration) -> Result<(i64, i64), BrokerError>;

    fn close(&self);
}

/// Receives partition assignment changes, however the client learns of
/// them (group rebalance or manual assign).
pub trait AssignmentObserver: Send + Sync {
    fn on_assigned(&self, client: &dyn SeekHandle, partitions: &[TopicPartition]);

    fn on_revoked(&self, partitions: &[TopicPartition]);
}

/// Outcome of one topic-existence probe attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    /// Worth retrying: broker unreachable, metadata not yet propagated.
    #[error("transient probe failure: {0}")]
    Transient(String),

    /// Never worth retrying: the credentials cannot see the topic.
    #[error("security failure probing topic: {0}")]
    Security(String),
}

/// Asks the broker whether a topic exists.
pub trait TopicProbe: Send + Sync {
    fn describe(&self, topic: &str, timeout: Duration) -> Result<bool, ProbeError>;
}
