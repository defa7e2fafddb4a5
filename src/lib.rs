//! Logtap Library
//!
//! An event-sourcing layer over Kafka: a buffered pull-based event source
//! with pluggable read policies and offset bookkeeping, plus a composable
//! sink pipeline for whatever consumes the events.
//!
//! # Crates
//!
//! The workspace splits along the broker boundary:
//!
//! - `event_core` - neutral [`Event`] envelope, buffered pull engine, sinks
//! - `offset_store` - external offset persistence (file and in-memory)
//! - `logtap_kafka_source` - the Kafka-backed source, re-exported as [`kafka`]
//! - `logtap_kafka_producer` - test/demo producer used by `populate`
//!
//! # CLI Usage
//!
//! ```bash
//! # Dump a topic from the beginning as JSON lines, stop after 5 quiet polls
//! logtap dump --brokers localhost:9092 --topic events --from beginning
//!
//! # Follow a topic live, committing progress to a local file for resume
//! logtap dump --brokers localhost:9092 --topic events \
//!   --from stored --offset-file .logtap-offsets.json --max-stalls 100000
//!
//! # Publish 1000 sequential test records
//! logtap populate --brokers localhost:9092 --topic events --count 1000
//! ```

pub mod dump;
pub mod populate;

// Re-export the building blocks for embedding applications
pub use event_core::{Event, Sink, SourceHandle};
pub use logtap_kafka_source as kafka;

pub use dump::{run_dump, DumpConfig, DumpStats, JsonLineSink};
pub use populate::{run_populate, PopulateConfig, PopulateStats};
