//! Kafka producer library for testing logtap
//!
//! This library provides plain key/value message publishing utilities for
//! exercising the logtap event source against a real broker.
//!
//! ## Features
//!
//! - **Kafka producer**: Helper struct for publishing test messages to Kafka topics
//! - **Topic management**: Utilities for creating Kafka topics before a test run
//! - **Sequences**: Helper for publishing N sequential key/value pairs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use logtap_kafka_producer::TestProducer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let producer = TestProducer::new("localhost:9092").await?;
//!
//!     // Create topic
//!     producer.create_topic_if_not_exists("events-topic", 1).await?;
//!
//!     // Publish a single message with a header
//!     producer
//!         .publish(
//!             "events-topic",
//!             Some("user_001"),
//!             Some("logged in"),
//!             &[("origin".to_string(), "browser".to_string())],
//!         )
//!         .await?;
//!
//!     // Publish a numbered sequence for ordering assertions
//!     producer.publish_sequence("events-topic", 1000).await?;
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;

/// Kafka producer wrapper for testing
pub struct TestProducer {
    producer: FutureProducer,
    brokers: String,
}

/// Key of the `i`-th record produced by [`TestProducer::publish_sequence`].
pub fn sequence_key(index: u64) -> String {
    format!("key-{index:06}")
}

/// Value of the `i`-th record produced by [`TestProducer::publish_sequence`].
pub fn sequence_value(index: u64) -> String {
    format!("value-{index:06}")
}

impl TestProducer {
    /// Create a new Kafka test producer
    pub async fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Kafka producer")?;

        Ok(Self {
            producer,
            brokers: brokers.to_string(),
        })
    }

    /// Create Kafka topic if it doesn't exist
    pub async fn create_topic_if_not_exists(&self, topic: &str, partitions: i32) -> Result<()> {
        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .context("Failed to create admin client")?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

        match admin_client.create_topics(&[new_topic], &opts).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(topic_name) => {
                            tracing::info!("Topic '{topic_name}' created successfully");
                        }
                        Err((topic_name, err)) => {
                            if err.to_string().contains("already exists") {
                                tracing::info!("Topic '{topic_name}' already exists");
                            } else {
                                return Err(anyhow::anyhow!("Failed to create topic: {err}"));
                            }
                        }
                    }
                }
            }
            Err(e) => return Err(anyhow::anyhow!("Failed to create topics: {e}")),
        }

        Ok(())
    }

    /// Publish one message to Kafka.
    ///
    /// Key, value, and headers are all optional in the wire format; pass
    /// `None` / an empty slice to leave them out.
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Option<&str>,
        headers: &[(String, String)],
    ) -> Result<()> {
        let mut record: FutureRecord<str, str> = FutureRecord::to(topic);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(value) = value {
            record = record.payload(value);
        }
        if !headers.is_empty() {
            let mut owned = OwnedHeaders::new_with_capacity(headers.len());
            for (name, val) in headers {
                owned = owned.insert(Header {
                    key: name,
                    value: Some(val.as_str()),
                });
            }
            record = record.headers(owned);
        }

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| err)
            .context("Failed to send message to Kafka")?;

        tracing::debug!("Published message: topic={topic}, key={key:?}");
        Ok(())
    }

    /// Publish `count` sequential key/value pairs to a topic.
    ///
    /// Record `i` carries key [`sequence_key`]`(i)` and value
    /// [`sequence_value`]`(i)`. On a single-partition topic the records land
    /// in index order, which is what the end-to-end tests assert against.
    /// Returns the number of records acknowledged by the broker.
    pub async fn publish_sequence(&self, topic: &str, count: u64) -> Result<u64> {
        tracing::info!("Publishing {count} sequential messages to topic '{topic}'");

        let pairs: Vec<(String, String)> = (0..count)
            .map(|i| (sequence_key(i), sequence_value(i)))
            .collect();

        // Enqueue everything, then await delivery; the producer preserves
        // per-partition send order.
        let mut futures = Vec::with_capacity(pairs.len());
        for (key, value) in &pairs {
            let record = FutureRecord::to(topic).key(key.as_str()).payload(value.as_str());
            futures.push(self.producer.send(record, Duration::from_secs(30)));
        }

        let mut published = 0u64;
        for future in futures {
            future
                .await
                .map_err(|(err, _)| err)
                .context("Failed to send sequence message to Kafka")?;
            published += 1;
        }

        tracing::info!("Published {published} messages to '{topic}'");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_pairs_are_zero_padded_and_ordered() {
        assert_eq!(sequence_key(0), "key-000000");
        assert_eq!(sequence_key(42), "key-000042");
        assert_eq!(sequence_value(999), "value-000999");

        let keys: Vec<String> = (0..1000).map(sequence_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
