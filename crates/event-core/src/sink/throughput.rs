//! Throughput accounting for a sink chain.

use super::Sink;
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

/// Forwards everything, counting received and forwarded items and logging
/// the observed rate.
///
/// Received and forwarded diverge only when the destination rejects an
/// item. A rate line is logged once per `log_every` forwarded items and
/// once more on close, so quiet streams still report their totals at
/// shutdown.
pub struct ThroughputSink<S> {
    destination: S,
    log_every: u64,
    received: u64,
    forwarded: u64,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

impl<S> ThroughputSink<S> {
    pub fn new(log_every: u64, destination: S) -> Self {
        assert!(log_every > 0, "log interval must be at least 1");
        Self {
            destination,
            log_every,
            received: 0,
            forwarded: 0,
            first_seen: None,
            last_seen: None,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn rate_per_second(&self) -> f64 {
        match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => {
                let elapsed = (last - first).num_milliseconds().max(1) as f64 / 1000.0;
                self.forwarded as f64 / elapsed
            }
            _ => 0.0,
        }
    }

    fn log_rate(&self, context: &str) {
        info!(
            received = self.received,
            forwarded = self.forwarded,
            rate_per_sec = format!("{:.1}", self.rate_per_second()),
            "{context}"
        );
    }
}

impl<T, S> Sink<T> for ThroughputSink<S>
where
    T: Send,
    S: Sink<T>,
{
    fn send(&mut self, item: T) -> Result<()> {
        let now = Utc::now();
        if self.first_seen.is_none() {
            self.first_seen = Some(now);
        }
        self.last_seen = Some(now);
        self.received += 1;

        self.destination.send(item)?;
        self.forwarded += 1;
        if self.forwarded % self.log_every == 0 {
            self.log_rate("throughput checkpoint");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log_rate("throughput at close");
        self.destination.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectorSink;

    #[test]
    fn test_counts_forwarded_items() {
        let collected = CollectorSink::new();
        let mut sink = ThroughputSink::new(10, collected.clone());

        for n in 0..25 {
            sink.send(n).unwrap();
        }
        assert_eq!(sink.received(), 25);
        assert_eq!(sink.forwarded(), 25);
        assert_eq!(collected.len(), 25);
    }

    #[test]
    fn test_close_propagates_to_destination() {
        let collected: CollectorSink<i32> = CollectorSink::new();
        let mut sink = ThroughputSink::new(10, collected.clone());

        sink.close().unwrap();
        assert!(collected.is_closed());
    }

    #[test]
    fn test_failed_send_not_counted() {
        struct Failing;
        impl Sink<i32> for Failing {
            fn send(&mut self, _item: i32) -> Result<()> {
                anyhow::bail!("destination refused")
            }
            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let mut sink = ThroughputSink::new(10, Failing);
        assert!(sink.send(1).is_err());
        assert_eq!(sink.received(), 1);
        assert_eq!(sink.forwarded(), 0);
    }
}
