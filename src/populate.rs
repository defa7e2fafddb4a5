//! Populate: publish sequential test records to a topic.
//!
//! The counterpart of `dump` for smoke tests and demos. Record `i` carries
//! key `key-{i:06}` and value `value-{i:06}`, so a following dump can assert
//! both content and order.

use anyhow::Result;
use clap::Parser;
use logtap_kafka_producer::TestProducer;
use std::time::{Duration, Instant};
use tracing::info;

/// Configuration for the populate command.
#[derive(Debug, Clone, Parser)]
pub struct PopulateConfig {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(long, value_delimiter = ',', required = true)]
    pub brokers: Vec<String>,
    /// Topic to publish to
    #[clap(long)]
    pub topic: String,
    /// Number of records to publish
    #[clap(long, default_value_t = 1000)]
    pub count: u64,
    /// Partition count used when the topic needs creating. One partition
    /// keeps the published sequence globally ordered.
    #[clap(long, default_value_t = 1)]
    pub partitions: i32,
}

/// Counters from a completed populate run.
#[derive(Debug, Clone)]
pub struct PopulateStats {
    /// Records acknowledged by the broker.
    pub published: u64,
    /// Total wall-clock duration.
    pub duration: Duration,
}

impl PopulateStats {
    pub fn records_per_second(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.published as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Create the topic if needed and publish the sequence.
pub async fn run_populate(config: PopulateConfig) -> Result<PopulateStats> {
    let brokers = config.brokers.join(",");
    let producer = TestProducer::new(&brokers).await?;
    producer
        .create_topic_if_not_exists(&config.topic, config.partitions)
        .await?;

    let started = Instant::now();
    let published = producer.publish_sequence(&config.topic, config.count).await?;
    let stats = PopulateStats {
        published,
        duration: started.elapsed(),
    };
    info!(
        "Populate complete: {} records in {:?} ({:.1} records/sec)",
        stats.published,
        stats.duration,
        stats.records_per_second()
    );
    Ok(stats)
}
