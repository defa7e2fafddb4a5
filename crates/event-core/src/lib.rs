//! Broker-independent event plumbing.
//!
//! This crate carries the pieces that do not care which broker the records
//! came from: the [`Event`] envelope handed to consumers, the buffered
//! pull engine driving a [`SourceBackend`], and the [`Sink`] stages an
//! application composes behind a source.

pub mod event;
pub mod sink;
pub mod source;

pub use event::{Event, SourceHandle};
pub use sink::{
    BreakerController, BreakerState, CircuitBreakerSink, CleanupSink, CollectorSink, FilterSink,
    MapSink, NullSink, Sink, SuppressDuplicatesSink, SuppressUnmodifiedSink, ThroughputSink,
};
pub use source::{BufferedEventSource, SourceBackend};
