//! Kafka event source for logtap.
//!
//! This crate provides:
//! - Buffered pull-based consumer that surfaces Kafka records as [`Event`]s
//! - Offset bookkeeping with auto-commit on decode or explicit acknowledgement
//! - Read policies for subscribe/assign placement and start positions
//! - Topic existence gating so consumers can start before their topics exist
//!
//! # Design
//!
//! The consumer side is split across a narrow [`broker::BrokerClient`] trait
//! and the generic engine in [`source`]. [`client::KafkaClient`] is the rdkafka
//! implementation used in production; [`testing::MockBroker`] is a scripted
//! implementation used by the test suite. Everything above the trait (buffering,
//! commit arithmetic, seek planning, existence gating) is broker-agnostic.
//!
//! [`Event`]: event_core::Event

/// Broker abstraction: the trait surface the engine consumes.
pub mod broker;

/// rdkafka-backed implementation of the broker traits.
pub mod client;
pub mod error;

/// Background topic-existence probing with a monotonic cache.
pub mod existence;
pub mod metrics;
pub mod options;

/// Read policies: assignment mode, start position, and seek planning.
pub mod policy;
pub mod shutdown;

/// The buffered source engine and its commit bookkeeping.
pub mod source;
pub mod testing;


pub use broker::{
    AssignmentObserver, BrokerClient, BrokerError, FetchedRecord, ProbeError, SeekHandle,
    SeekTarget, TopicPartition, TopicProbe,
};
pub use client::{connect, KafkaClient, KafkaTopicProbe};
pub use error::{Result, SourceError};
pub use existence::TopicExistenceChecker;
pub use metrics::{MetricsSnapshot, SourceMetrics};
pub use options::{Codec, SaslPlainLogin, SourceOptions};
pub use policy::{AssignmentMode, ReadPolicy, SeekPlan, SharedOffsetStore, StartPosition};
pub use shutdown::ShutdownToken;
pub use source::{Acknowledger, EventSource};
