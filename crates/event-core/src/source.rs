//! Generic buffered pull engine.
//!
//! [`BufferedEventSource`] owns a FIFO of broker-native records and decodes
//! them into [`Event`]s one `poll` at a time. Everything broker-specific
//! lives behind [`SourceBackend`]: how the buffer is refilled, what happens
//! when it drains (commit bookkeeping), how a record decodes, and what a
//! close must tear down. Separating "do we have buffered data" from "how do
//! we get more" lets a backend interleave commit bookkeeping with refills
//! without the engine knowing broker details.

use crate::event::Event;
use std::collections::VecDeque;
use std::time::Duration;

/// Broker-specific half of a buffered source.
///
/// Implementations keep whatever state the hooks need (client handles,
/// commit maps, metrics). All hooks run on the polling thread.
pub trait SourceBackend {
    /// Broker-native record type held in the buffer between fetch and decode.
    type Record;
    /// Error type surfaced through `poll` and `close`.
    type Error;

    /// Error value returned when the source is used after `close`.
    fn closed_error(&self) -> Self::Error;

    /// Invoked on every poll that finds the buffer empty, before any refill
    /// attempt. The place for end-of-batch bookkeeping such as commits.
    fn buffer_exhausted(&mut self) -> Result<(), Self::Error>;

    /// Attempt to pull more records into `buffer` within `timeout`. Leaving
    /// the buffer empty is not an error; the poll simply returns nothing.
    fn try_fill_buffer(
        &mut self,
        timeout: Duration,
        buffer: &mut VecDeque<Self::Record>,
    ) -> Result<(), Self::Error>;

    /// Decode one record popped from the buffer.
    fn decode(&mut self, record: Self::Record) -> Result<Event, Self::Error>;

    /// Tear down backend resources. Runs exactly once, from the first
    /// `close`; `buffer` holds any records fetched but never decoded.
    fn on_close(&mut self, buffer: &mut VecDeque<Self::Record>) -> Result<(), Self::Error>;
}

/// Pull-model event source over a [`SourceBackend`].
///
/// Single-consumer by contract: one thread polls and decodes. `ready` is a
/// cheap hint, not a reservation.
pub struct BufferedEventSource<B: SourceBackend> {
    backend: B,
    buffer: VecDeque<B::Record>,
    closed: bool,
}

impl<B: SourceBackend> BufferedEventSource<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            buffer: VecDeque::new(),
            closed: false,
        }
    }

    /// Return the next event, waiting at most `timeout` for new records.
    ///
    /// A buffered record is decoded and returned immediately without
    /// consuming any of the timeout. On an empty buffer the backend first
    /// gets its `buffer_exhausted` hook, then one refill attempt, then one
    /// more decode try; `Ok(None)` means nothing arrived within the budget.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<Event>, B::Error> {
        if self.closed {
            return Err(self.backend.closed_error());
        }

        if let Some(record) = self.buffer.pop_front() {
            return self.backend.decode(record).map(Some);
        }

        self.backend.buffer_exhausted()?;
        self.backend.try_fill_buffer(timeout, &mut self.buffer)?;

        match self.buffer.pop_front() {
            Some(record) => self.backend.decode(record).map(Some),
            None => Ok(None),
        }
    }

    /// True iff not closed and at least one record is already buffered.
    pub fn ready(&self) -> bool {
        !self.closed && !self.buffer.is_empty()
    }

    /// Number of fetched records not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Close the source. Idempotent: the backend hook runs only on the
    /// first call, and the source is marked closed even if the hook fails.
    pub fn close(&mut self) -> Result<(), B::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.backend.on_close(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Closed,
        Decode,
    }

    /// Backend with a scripted sequence of fills, counting hook invocations.
    struct ScriptedBackend {
        fills: VecDeque<Vec<i64>>,
        exhausted_calls: usize,
        close_calls: usize,
        fail_decode_on: Option<i64>,
    }

    impl ScriptedBackend {
        fn new(fills: Vec<Vec<i64>>) -> Self {
            Self {
                fills: fills.into(),
                exhausted_calls: 0,
                close_calls: 0,
                fail_decode_on: None,
            }
        }
    }

    impl SourceBackend for ScriptedBackend {
        type Record = i64;
        type Error = TestError;

        fn closed_error(&self) -> TestError {
            TestError::Closed
        }

        fn buffer_exhausted(&mut self) -> Result<(), TestError> {
            self.exhausted_calls += 1;
            Ok(())
        }

        fn try_fill_buffer(
            &mut self,
            _timeout: Duration,
            buffer: &mut VecDeque<i64>,
        ) -> Result<(), TestError> {
            if let Some(batch) = self.fills.pop_front() {
                buffer.extend(batch);
            }
            Ok(())
        }

        fn decode(&mut self, record: i64) -> Result<Event, TestError> {
            if self.fail_decode_on == Some(record) {
                return Err(TestError::Decode);
            }
            Ok(Event::new(Some(record.to_string()), None))
        }

        fn on_close(&mut self, _buffer: &mut VecDeque<i64>) -> Result<(), TestError> {
            self.close_calls += 1;
            Ok(())
        }
    }

    fn keys(source: &mut BufferedEventSource<ScriptedBackend>, polls: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..polls {
            if let Some(event) = source.poll(Duration::from_millis(10)).unwrap() {
                out.push(event.key().unwrap().to_string());
            }
        }
        out
    }

    #[test]
    fn test_all_fetched_records_decode_in_order_exactly_once() {
        let backend = ScriptedBackend::new(vec![vec![1, 2, 3], vec![], vec![4, 5]]);
        let mut source = BufferedEventSource::new(backend);

        let decoded = keys(&mut source, 7);
        assert_eq!(decoded, vec!["1", "2", "3", "4", "5"]);
        assert!(source.poll(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_buffered_record_skips_hooks() {
        let backend = ScriptedBackend::new(vec![vec![1, 2]]);
        let mut source = BufferedEventSource::new(backend);

        source.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(source.backend().exhausted_calls, 1);

        // Second record comes straight from the buffer
        source.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(source.backend().exhausted_calls, 1);
    }

    #[test]
    fn test_exhausted_hook_runs_on_every_empty_poll() {
        let backend = ScriptedBackend::new(vec![]);
        let mut source = BufferedEventSource::new(backend);

        for _ in 0..3 {
            assert!(source.poll(Duration::from_millis(1)).unwrap().is_none());
        }
        assert_eq!(source.backend().exhausted_calls, 3);
    }

    #[test]
    fn test_ready_reflects_buffer_and_closed_state() {
        let backend = ScriptedBackend::new(vec![vec![1, 2]]);
        let mut source = BufferedEventSource::new(backend);
        assert!(!source.ready());

        source.poll(Duration::from_millis(10)).unwrap();
        assert!(source.ready());
        assert_eq!(source.buffered(), 1);

        source.close().unwrap();
        assert!(!source.ready());
    }

    #[test]
    fn test_poll_after_close_fails() {
        let backend = ScriptedBackend::new(vec![]);
        let mut source = BufferedEventSource::new(backend);
        source.close().unwrap();

        assert_eq!(
            source.poll(Duration::from_millis(1)).unwrap_err(),
            TestError::Closed
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = ScriptedBackend::new(vec![]);
        let mut source = BufferedEventSource::new(backend);
        source.close().unwrap();
        source.close().unwrap();
        assert_eq!(source.backend().close_calls, 1);
    }

    #[test]
    fn test_decode_error_surfaces_and_buffer_continues() {
        let mut backend = ScriptedBackend::new(vec![vec![1, 2, 3]]);
        backend.fail_decode_on = Some(2);
        let mut source = BufferedEventSource::new(backend);

        assert!(source.poll(Duration::from_millis(10)).unwrap().is_some());
        assert_eq!(
            source.poll(Duration::from_millis(10)).unwrap_err(),
            TestError::Decode
        );
        // The failing record was popped; the rest of the buffer is intact.
        let next = source.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(next.key(), Some("3"));
    }
}
