//! rdkafka-backed implementations of the broker client and topic probe.

use crate::broker::{
    AssignmentObserver, BrokerClient, BrokerError, FetchedRecord, ProbeError, SeekHandle,
    SeekTarget, TopicPartition, TopicProbe,
};
use crate::error::{Result, SourceError};
use crate::metrics::SourceMetrics;
use crate::options::SourceOptions;
use crate::policy::ReadPolicy;
use crate::shutdown::ShutdownToken;
use crate::source::EventSource;
use offset_store::OffsetStore;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Slice length for shutdown-aware blocking polls.
const POLL_SLICE: Duration = Duration::from_millis(100);
/// Poll budget while draining locally queued records after the first.
const DRAIN_POLL: Duration = Duration::from_millis(10);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Client context routing rebalance callbacks into the seek plan.
pub struct SourceContext {
    observer: Arc<dyn AssignmentObserver>,
}

impl ClientContext for SourceContext {}

impl ConsumerContext for SourceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            self.observer.on_revoked(&tpl_to_partitions(tpl));
        }
    }

    fn post_rebalance(&self, consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                // The callback runs inside poll, on the owning thread, so
                // handing the consumer out for seeking is safe.
                let handle = RebalanceSeekHandle(consumer);
                self.observer.on_assigned(&handle, &tpl_to_partitions(tpl));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!("Rebalance error: {e}"),
        }
    }
}

struct RebalanceSeekHandle<'a>(&'a BaseConsumer<SourceContext>);

impl SeekHandle for RebalanceSeekHandle<'_> {
    fn seek(&self, tp: &TopicPartition, target: SeekTarget) -> std::result::Result<(), BrokerError> {
        seek_consumer(self.0, tp, target)
    }

    fn position(&self, tp: &TopicPartition) -> std::result::Result<Option<i64>, BrokerError> {
        consumer_position(self.0, tp)
    }
}

/// Synchronous Kafka client built on a `BaseConsumer`.
///
/// Polls are sliced so a cancelled shutdown token interrupts a blocked
/// fetch within one slice instead of hanging out the caller's timeout.
pub struct KafkaClient {
    consumer: BaseConsumer<SourceContext>,
    shutdown: ShutdownToken,
}

impl KafkaClient {
    pub fn create(
        options: &SourceOptions,
        policy: &ReadPolicy,
        observer: Arc<dyn AssignmentObserver>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let mut config = base_config(options);
        config
            .set("group.id", &options.group_id)
            // Every commit is issued explicitly by the commit protocol.
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000");

        let mut policy_props = Vec::new();
        policy.prepare_consumer_config(&mut policy_props);
        for (key, value) in &policy_props {
            config.set(key, value);
        }

        // Raw passthrough applies last so it wins over everything above.
        for (key, value) in &options.properties {
            config.set(key, value);
        }

        let consumer: BaseConsumer<SourceContext> = config
            .create_with_context(SourceContext { observer })
            .map_err(|e| SourceError::InvalidConfig(format!("Failed to create consumer: {e}")))?;

        Ok(Self { consumer, shutdown })
    }
}

impl SeekHandle for KafkaClient {
    fn seek(&self, tp: &TopicPartition, target: SeekTarget) -> std::result::Result<(), BrokerError> {
        seek_consumer(&self.consumer, tp, target)
    }

    fn position(&self, tp: &TopicPartition) -> std::result::Result<Option<i64>, BrokerError> {
        consumer_position(&self.consumer, tp)
    }
}

impl BrokerClient for KafkaClient {
    fn subscribe(&self, topics: &[String]) -> std::result::Result<(), BrokerError> {
        let refs: Vec<&str> = topics.iter().map(|t| t.as_str()).collect();
        self.consumer
            .subscribe(&refs)
            .map_err(|e| map_kafka_error(None, e))
    }

    fn unsubscribe(&self) {
        self.consumer.unsubscribe();
    }

    fn assign(&self, partitions: &[TopicPartition]) -> std::result::Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        for tp in partitions {
            tpl.add_partition(&tp.topic, tp.partition);
        }
        self.consumer
            .assign(&tpl)
            .map_err(|e| map_kafka_error(partitions.first(), e))
    }

    fn assignment(&self) -> std::result::Result<Vec<TopicPartition>, BrokerError> {
        let tpl = self
            .consumer
            .assignment()
            .map_err(|e| map_kafka_error(None, e))?;
        Ok(tpl_to_partitions(&tpl))
    }

    fn fetch(
        &self,
        timeout: Duration,
        max_records: usize,
        out: &mut Vec<FetchedRecord>,
    ) -> std::result::Result<(), BrokerError> {
        let deadline = Instant::now() + timeout;

        // Wait for the first record in shutdown-aware slices.
        loop {
            if self.shutdown.is_cancelled() {
                return Err(BrokerError::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            match self.consumer.poll(POLL_SLICE.min(deadline - now)) {
                Some(Ok(message)) => {
                    out.push(convert_message(&message));
                    break;
                }
                Some(Err(e)) => return Err(map_kafka_error(None, e)),
                None => continue,
            }
        }

        // Drain whatever librdkafka already queued locally.
        while out.len() < max_records {
            match self.consumer.poll(DRAIN_POLL) {
                Some(Ok(message)) => out.push(convert_message(&message)),
                Some(Err(e)) => return Err(map_kafka_error(None, e)),
                None => break,
            }
        }
        Ok(())
    }

    fn commit(
        &self,
        offsets: &BTreeMap<TopicPartition, i64>,
    ) -> std::result::Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        for (tp, next) in offsets {
            tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*next))
                .map_err(|e| map_kafka_error(Some(tp), e))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| map_kafka_error(offsets.keys().next(), e))
    }

    fn commit_current(&self) -> std::result::Result<(), BrokerError> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // Nothing fetched yet; an empty commit is a success.
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(map_kafka_error(None, e)),
        }
    }

    fn partitions_for(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> std::result::Result<Vec<i32>, BrokerError> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(topic), timeout)
            .map_err(|e| map_kafka_error(None, e))?;
        let Some(topic_meta) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Err(BrokerError::InvalidTopic(format!(
                "{topic} missing from metadata response"
            )));
        };
        if let Some(err) = topic_meta.error() {
            let code: RDKafkaErrorCode = err.into();
            return Err(match code {
                RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
                    BrokerError::InvalidTopic(format!("{topic} does not exist"))
                }
                RDKafkaErrorCode::TopicAuthorizationFailed => {
                    BrokerError::Authorization(format!("not authorized to describe {topic}"))
                }
                other => BrokerError::Other(format!("metadata error for {topic}: {other}")),
            });
        }
        Ok(topic_meta.partitions().iter().map(|p| p.id()).collect())
    }

    fn watermarks(
        &self,
        tp: &TopicPartition,
        timeout: Duration,
    ) -> std::result::Result<(i64, i64), BrokerError> {
        self.consumer
            .fetch_watermarks(&tp.topic, tp.partition, timeout)
            .map_err(|e| map_kafka_error(Some(tp), e))
    }

    fn close(&self) {
        self.consumer.unsubscribe();
    }
}

/// Existence probe backed by a dedicated metadata client, so background
/// checks never touch the polling consumer.
pub struct KafkaTopicProbe {
    client: BaseConsumer,
}

impl KafkaTopicProbe {
    pub fn create(options: &SourceOptions) -> Result<Self> {
        let mut config = base_config(options);
        config
            .set("group.id", &options.group_id)
            // A probe must never create the topic it is asking about.
            .set("allow.auto.create.topics", "false");
        for (key, value) in &options.properties {
            config.set(key, value);
        }
        let client: BaseConsumer = config.create().map_err(|e| {
            SourceError::InvalidConfig(format!("Failed to create metadata client: {e}"))
        })?;
        Ok(Self { client })
    }
}

impl TopicProbe for KafkaTopicProbe {
    fn describe(&self, topic: &str, timeout: Duration) -> std::result::Result<bool, ProbeError> {
        let metadata = match self.client.fetch_metadata(Some(topic), timeout) {
            Ok(metadata) => metadata,
            Err(e) => {
                return Err(match e.rdkafka_error_code() {
                    Some(
                        RDKafkaErrorCode::SaslAuthenticationFailed
                        | RDKafkaErrorCode::Authentication
                        | RDKafkaErrorCode::TopicAuthorizationFailed
                        | RDKafkaErrorCode::GroupAuthorizationFailed
                        | RDKafkaErrorCode::ClusterAuthorizationFailed,
                    ) => ProbeError::Security(e.to_string()),
                    _ => ProbeError::Transient(e.to_string()),
                });
            }
        };

        let Some(topic_meta) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Ok(false);
        };
        match topic_meta.error() {
            None => Ok(!topic_meta.partitions().is_empty()),
            Some(err) => {
                let code: RDKafkaErrorCode = err.into();
                match code {
                    RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
                        Ok(false)
                    }
                    RDKafkaErrorCode::TopicAuthorizationFailed
                    | RDKafkaErrorCode::GroupAuthorizationFailed
                    | RDKafkaErrorCode::ClusterAuthorizationFailed => {
                        Err(ProbeError::Security(format!("{topic}: {code}")))
                    }
                    other => Err(ProbeError::Transient(format!("{topic}: {other}"))),
                }
            }
        }
    }
}

/// Connect a source to a real Kafka cluster.
pub fn connect(
    options: SourceOptions,
    policy: ReadPolicy,
    store: Option<Box<dyn OffsetStore>>,
    metrics: SourceMetrics,
    shutdown: ShutdownToken,
) -> Result<EventSource<KafkaClient>> {
    options.validate()?;
    let probe = Arc::new(KafkaTopicProbe::create(&options)?);
    let client_options = options.clone();
    let client_policy = policy.clone();
    EventSource::from_parts(options, policy, store, probe, metrics, move |plan| {
        KafkaClient::create(&client_options, &client_policy, plan, shutdown)
    })
}

fn base_config(options: &SourceOptions) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &options.brokers);
    if let Some(sasl) = &options.sasl {
        config
            .set("security.protocol", "SASL_PLAINTEXT")
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", &sasl.username)
            .set("sasl.password", &sasl.password);
    }
    config
}

fn tpl_to_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

fn convert_message(message: &BorrowedMessage<'_>) -> FetchedRecord {
    let mut headers = Vec::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            headers.push((
                header.key.to_string(),
                header.value.map(|v| v.to_vec()).unwrap_or_default(),
            ));
        }
    }
    FetchedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(|k| k.to_vec()),
        value: message.payload().map(|p| p.to_vec()),
        headers,
    }
}

fn seek_consumer(
    consumer: &BaseConsumer<SourceContext>,
    tp: &TopicPartition,
    target: SeekTarget,
) -> std::result::Result<(), BrokerError> {
    let offset = match target {
        SeekTarget::Beginning => Offset::Beginning,
        SeekTarget::End => Offset::End,
        SeekTarget::Offset(n) => Offset::Offset(n),
    };
    consumer
        .seek(&tp.topic, tp.partition, offset, SEEK_TIMEOUT)
        .map_err(|e| map_kafka_error(Some(tp), e))
}

fn consumer_position(
    consumer: &BaseConsumer<SourceContext>,
    tp: &TopicPartition,
) -> std::result::Result<Option<i64>, BrokerError> {
    let tpl = consumer
        .position()
        .map_err(|e| map_kafka_error(Some(tp), e))?;
    for elem in tpl.elements() {
        if elem.topic() == tp.topic && elem.partition() == tp.partition {
            return Ok(match elem.offset() {
                Offset::Offset(n) => Some(n),
                _ => None,
            });
        }
    }
    Ok(None)
}

fn map_kafka_error(tp: Option<&TopicPartition>, e: KafkaError) -> BrokerError {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::OffsetOutOfRange) => match tp {
            Some(tp) => BrokerError::InvalidOffset {
                topic: tp.topic.clone(),
                partition: tp.partition,
                detail: e.to_string(),
            },
            None => BrokerError::Other(format!("offset out of range: {e}")),
        },
        Some(
            RDKafkaErrorCode::SaslAuthenticationFailed | RDKafkaErrorCode::Authentication,
        ) => BrokerError::Authentication(e.to_string()),
        Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => BrokerError::Authorization(e.to_string()),
        Some(
            RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::InvalidTopic,
        ) => BrokerError::InvalidTopic(e.to_string()),
        Some(RDKafkaErrorCode::OperationTimedOut) => BrokerError::Timeout(e.to_string()),
        _ => BrokerError::Other(e.to_string()),
    }
}
