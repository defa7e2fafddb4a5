//! Circuit breaker stage: hold items without losing them.
//!
//! While the breaker is open, items accumulate on a bounded FIFO and the
//! sender blocks once the queue is full. Closing the breaker drains the
//! queue into the destination before anything sent afterwards, preserving
//! order. This is the pipeline's pause valve: upstream keeps its data, the
//! destination sees a gap and then a burst, nothing is dropped.

use super::Sink;
use anyhow::{bail, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Flow state of a [`CircuitBreakerSink`].
///
/// `Open` holds items back (circuit interrupted), `Closed` lets them flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Open,
    Closed,
}

struct Inner<T, S> {
    state: BreakerState,
    queue: VecDeque<T>,
    destination: S,
}

struct Shared<T, S> {
    inner: Mutex<Inner<T, S>>,
    space: Condvar,
    capacity: usize,
}

impl<T: Send, S: Sink<T>> Shared<T, S> {
    fn set_state(&self, state: BreakerState) -> Result<()> {
        let mut guard = self.inner.lock();
        guard.state = state;
        if state == BreakerState::Closed {
            let inner = &mut *guard;
            while let Some(held) = inner.queue.pop_front() {
                inner.destination.send(held)?;
            }
        }
        // Wake senders blocked on a full queue; they re-check the state.
        self.space.notify_all();
        Ok(())
    }
}

/// Pausable pass-through sink with a bounded holding queue.
///
/// Clones share state: keep one clone on the sending side and hand a
/// [`BreakerController`] to whichever thread decides when to pause.
pub struct CircuitBreakerSink<T, S: Sink<T>> {
    shared: Arc<Shared<T, S>>,
}

impl<T: Send, S: Sink<T>> CircuitBreakerSink<T, S> {
    /// Create a breaker in the `Closed` (flowing) state.
    ///
    /// `capacity` bounds the holding queue and must be at least 1.
    pub fn new(capacity: usize, destination: S) -> Self {
        assert!(capacity > 0, "breaker queue capacity must be at least 1");
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: BreakerState::Closed,
                    queue: VecDeque::with_capacity(capacity),
                    destination,
                }),
                space: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Handle for flipping the breaker from another thread.
    pub fn controller(&self) -> BreakerController<T, S> {
        BreakerController {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.shared.inner.lock().state
    }

    /// Number of items currently held.
    pub fn queued(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn set_state(&self, state: BreakerState) -> Result<()> {
        self.shared.set_state(state)
    }
}

impl<T: Send, S: Sink<T>> Clone for CircuitBreakerSink<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send, S: Sink<T>> Sink<T> for CircuitBreakerSink<T, S> {
    fn send(&mut self, item: T) -> Result<()> {
        let mut guard = self.shared.inner.lock();
        loop {
            match guard.state {
                BreakerState::Closed => {
                    // Finish any leftover drain before the new item so
                    // queued items never get overtaken.
                    let inner = &mut *guard;
                    while let Some(held) = inner.queue.pop_front() {
                        inner.destination.send(held)?;
                    }
                    inner.destination.send(item)?;
                    self.shared.space.notify_all();
                    return Ok(());
                }
                BreakerState::Open => {
                    if guard.queue.len() < self.shared.capacity {
                        guard.queue.push_back(item);
                        return Ok(());
                    }
                    // Full: block until a state change makes room.
                    self.shared.space.wait(&mut guard);
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut guard = self.shared.inner.lock();
        let held = guard.queue.len();
        // The destination is closed no matter what; an undrained queue is
        // still a caller bug and reported as one.
        let closed = guard.destination.close();
        if held > 0 {
            bail!("circuit breaker closed while holding {held} undrained items");
        }
        closed
    }
}

/// Cloneable state toggle for a [`CircuitBreakerSink`].
pub struct BreakerController<T, S: Sink<T>> {
    shared: Arc<Shared<T, S>>,
}

impl<T: Send, S: Sink<T>> BreakerController<T, S> {
    /// Flip the breaker. Transitioning to `Closed` drains held items into
    /// the destination before returning; forwarding errors surface here.
    pub fn set_state(&self, state: BreakerState) -> Result<()> {
        self.shared.set_state(state)
    }

    pub fn state(&self) -> BreakerState {
        self.shared.inner.lock().state
    }
}

impl<T, S: Sink<T>> Clone for BreakerController<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectorSink;
    use std::time::{Duration, Instant};

    #[test]
    fn test_closed_breaker_passes_through() {
        let collected = CollectorSink::new();
        let mut breaker = CircuitBreakerSink::new(4, collected.clone());

        breaker.send(1).unwrap();
        breaker.send(2).unwrap();

        assert_eq!(collected.items(), vec![1, 2]);
        assert_eq!(breaker.queued(), 0);
    }

    #[test]
    fn test_open_breaker_holds_items() {
        let collected = CollectorSink::new();
        let mut breaker = CircuitBreakerSink::new(4, collected.clone());
        breaker.set_state(BreakerState::Open).unwrap();

        breaker.send(1).unwrap();
        breaker.send(2).unwrap();

        assert!(collected.is_empty());
        assert_eq!(breaker.queued(), 2);
    }

    #[test]
    fn test_held_items_drain_before_later_sends() {
        let collected = CollectorSink::new();
        let mut breaker = CircuitBreakerSink::new(4, collected.clone());

        breaker.set_state(BreakerState::Open).unwrap();
        breaker.send(1).unwrap();
        breaker.send(2).unwrap();
        breaker.set_state(BreakerState::Closed).unwrap();
        breaker.send(3).unwrap();

        assert_eq!(collected.items(), vec![1, 2, 3]);
    }

    #[test]
    fn test_full_queue_blocks_sender_until_closed() {
        let collected = CollectorSink::new();
        let breaker = CircuitBreakerSink::new(2, collected.clone());
        breaker.set_state(BreakerState::Open).unwrap();
        let controller = breaker.controller();

        let mut sender = breaker.clone();
        let handle = std::thread::spawn(move || {
            for n in 0..4 {
                sender.send(n).unwrap();
            }
        });

        // Sender fills the queue and then blocks on the third item.
        let deadline = Instant::now() + Duration::from_secs(2);
        while breaker.queued() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(breaker.queued(), 2);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished(), "sender should be blocked, not dropping");

        controller.set_state(BreakerState::Closed).unwrap();
        handle.join().unwrap();

        assert_eq!(collected.items(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_close_with_held_items_errors_but_closes_destination() {
        let collected = CollectorSink::new();
        let mut breaker = CircuitBreakerSink::new(2, collected.clone());
        breaker.set_state(BreakerState::Open).unwrap();
        breaker.send(1).unwrap();

        let err = breaker.close().unwrap_err();
        assert!(err.to_string().contains("undrained"));
        assert!(collected.is_closed());
    }

    #[test]
    fn test_close_with_empty_queue_succeeds() {
        let collected = CollectorSink::<i64>::new();
        let mut breaker = CircuitBreakerSink::new(2, collected.clone());
        breaker.close().unwrap();
        assert!(collected.is_closed());
    }
}
