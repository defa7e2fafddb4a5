//! Dump end-to-end test against a live Kafka broker
//!
//! Test flow:
//! 1. Create a single-partition topic (so global order is well defined)
//! 2. Publish 1000 sequential key/value pairs
//! 3. Run the dump path with max-stalls=1 into a collector sink
//! 4. Verify all 1000 events arrive in publish order and that exactly one
//!    empty poll was observed before termination
//!
//! The broker address defaults to `kafka:9092` and can be overridden with
//! the `LOGTAP_TEST_BROKERS` environment variable.

use event_core::CollectorSink;
use logtap::dump::{run_dump, DumpConfig};
use logtap::kafka::ShutdownToken;
use logtap_kafka_producer::{sequence_key, sequence_value, TestProducer};
use std::time::Duration;
use tokio::time::sleep;

/// Kafka broker address for testing
const KAFKA_BROKERS: &str = "kafka:9092";

fn test_brokers() -> String {
    std::env::var("LOGTAP_TEST_BROKERS").unwrap_or_else(|_| KAFKA_BROKERS.to_string())
}

fn generate_test_id() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_millis()
    )
}

#[tokio::test]
async fn test_dump_sequential_records_e2e() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter("logtap=debug,logtap_kafka_source=debug")
        .try_init()
        .ok();

    let test_id = generate_test_id();
    let topic = format!("test-dump-{test_id}");
    let brokers = test_brokers();

    tracing::info!("Using topic {} on {}", topic, brokers);

    // Step 1: Create the topic with a single partition
    let producer = TestProducer::new(&brokers).await?;
    producer.create_topic_if_not_exists(&topic, 1).await?;

    // Give Kafka a moment to propagate topic metadata
    sleep(Duration::from_millis(500)).await;

    // Step 2: Publish 1000 sequential key/value pairs
    let published = producer.publish_sequence(&topic, 1000).await?;
    assert_eq!(published, 1000);

    // Give a small delay to ensure messages are committed
    sleep(Duration::from_millis(200)).await;

    // Step 3: Dump the topic into a collector. Manual assignment from the
    // beginning avoids the group-join delay, so the only empty poll is the
    // terminal one.
    let collected = CollectorSink::new();
    let config = DumpConfig {
        brokers: vec![brokers.clone()],
        topics: vec![topic.clone()],
        group_id: format!("test-dump-group-{test_id}"),
        from: "beginning".to_string(),
        assign: true,
        key_codec: "utf8".to_string(),
        value_codec: "utf8".to_string(),
        max_fetch_records: 500,
        poll_timeout_ms: 5000,
        max_stalls: 1,
        max_events: None,
        no_commit: false,
        offset_file: None,
        lag_report_interval: None,
        log_every: 250,
        sasl_username: None,
        sasl_password: None,
        properties: Vec::new(),
    };

    let stats = run_dump(config, ShutdownToken::new(), collected.clone()).await?;

    // Step 4: Verify counts, order, and the single exhaustion report
    assert_eq!(stats.events, 1000, "every published record is decoded");
    assert_eq!(stats.stalls, 1, "exactly one empty poll before terminating");
    assert_eq!(stats.source.events_decoded, 1000);
    assert_eq!(stats.source.records_fetched, 1000);
    assert!(stats.source.commits >= 1, "progress was committed");

    let events = collected.items();
    assert_eq!(events.len(), 1000);
    for (i, event) in events.iter().enumerate() {
        let i = i as u64;
        assert_eq!(event.key(), Some(sequence_key(i).as_str()));
        assert_eq!(event.value(), Some(sequence_value(i).as_str()));
        let source = event.source().expect("broker-sourced event has a handle");
        assert_eq!(source.topic, topic);
        assert_eq!(source.partition, 0);
        assert_eq!(source.offset, i as i64);
    }
    assert!(collected.is_closed(), "close propagated through the chain");

    tracing::info!("Dump end-to-end test completed successfully");

    Ok(())
}
