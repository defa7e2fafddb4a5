//! Composable sink pipeline.
//!
//! Every stage shares the same two-method contract: `send` an item, `close`
//! the stage. Stages wrap a destination sink and forward transformed or
//! filtered items to it; `close` always propagates to the destination.
//! Stages that take no explicit destination discard into [`NullSink`].
//!
//! Chains are built inside-out with plain generics, so dispatch is static:
//!
//! ```
//! use event_core::sink::{CollectorSink, FilterSink, Sink};
//!
//! let collected = CollectorSink::new();
//! let mut chain = FilterSink::with_destination(|n: &i64| n % 2 == 0, collected.clone());
//! for n in 0..6 {
//!     chain.send(n).unwrap();
//! }
//! chain.close().unwrap();
//! assert_eq!(collected.items(), vec![0, 2, 4]);
//! ```

mod breaker;
mod cleanup;
mod suppress;
mod throughput;

pub use breaker::{BreakerController, BreakerState, CircuitBreakerSink};
pub use cleanup::CleanupSink;
pub use suppress::{SuppressDuplicatesSink, SuppressUnmodifiedSink};
pub use throughput::ThroughputSink;

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-consumer sink stage.
pub trait Sink<T>: Send {
    /// Process one item, forwarding to the destination where applicable.
    fn send(&mut self, item: T) -> Result<()>;

    /// Shut the stage down, propagating to the destination.
    fn close(&mut self) -> Result<()>;
}

/// Discards everything. The default destination for stages built without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        Self
    }
}

impl<T: Send> Sink<T> for NullSink {
    fn send(&mut self, _item: T) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Accumulates every item it receives.
///
/// Clones share the same backing store, so a test can keep a handle while
/// the sink itself is moved into a chain.
#[derive(Debug, Default)]
pub struct CollectorSink<T> {
    items: Arc<Mutex<Vec<T>>>,
    closed: Arc<AtomicBool>,
}

impl<T> CollectorSink<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<T: Clone> CollectorSink<T> {
    /// Snapshot of everything collected so far.
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T> Clone for CollectorSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T: Send> Sink<T> for CollectorSink<T> {
    fn send(&mut self, item: T) -> Result<()> {
        self.items.lock().push(item);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Forwards only items the predicate accepts.
pub struct FilterSink<F, S> {
    should_forward: F,
    destination: S,
}

impl<F> FilterSink<F, NullSink> {
    pub fn new(should_forward: F) -> Self {
        Self {
            should_forward,
            destination: NullSink,
        }
    }
}

impl<F, S> FilterSink<F, S> {
    pub fn with_destination(should_forward: F, destination: S) -> Self {
        Self {
            should_forward,
            destination,
        }
    }
}

impl<T, F, S> Sink<T> for FilterSink<F, S>
where
    T: Send,
    F: FnMut(&T) -> bool + Send,
    S: Sink<T>,
{
    fn send(&mut self, item: T) -> Result<()> {
        if (self.should_forward)(&item) {
            self.destination.send(item)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.destination.close()
    }
}

/// Applies a transform before forwarding; the destination consumes the
/// output type.
pub struct MapSink<F, S> {
    transform: F,
    destination: S,
}

impl<F, S> MapSink<F, S> {
    pub fn with_destination(transform: F, destination: S) -> Self {
        Self {
            transform,
            destination,
        }
    }
}

impl<T, U, F, S> Sink<T> for MapSink<F, S>
where
    T: Send,
    F: FnMut(T) -> U + Send,
    S: Sink<U>,
{
    fn send(&mut self, item: T) -> Result<()> {
        self.destination.send((self.transform)(item))
    }

    fn close(&mut self) -> Result<()> {
        self.destination.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_drops_rejected_items() {
        let collected = CollectorSink::new();
        let mut sink = FilterSink::with_destination(|n: &i64| *n > 0, collected.clone());

        sink.send(-1).unwrap();
        sink.send(1).unwrap();
        sink.send(0).unwrap();
        sink.send(2).unwrap();

        assert_eq!(collected.items(), vec![1, 2]);
    }

    #[test]
    fn test_filter_close_propagates() {
        let collected = CollectorSink::<i64>::new();
        let mut sink = FilterSink::with_destination(|_: &i64| true, collected.clone());
        sink.close().unwrap();
        assert!(collected.is_closed());
    }

    #[test]
    fn test_map_transforms_before_forwarding() {
        let collected = CollectorSink::new();
        let mut sink = MapSink::with_destination(|n: i64| format!("#{n}"), collected.clone());

        sink.send(7).unwrap();
        assert_eq!(collected.items(), vec!["#7".to_string()]);
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let mut sink = NullSink::new();
        for n in 0..100 {
            sink.send(n).unwrap();
        }
        Sink::<i32>::close(&mut sink).unwrap();
    }

    #[test]
    fn test_collector_clones_share_items() {
        let collected = CollectorSink::new();
        let mut handle = collected.clone();
        handle.send("a").unwrap();
        assert_eq!(collected.items(), vec!["a"]);
    }
}
