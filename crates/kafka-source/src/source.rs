//! The broker-backed event source and its offset-commit protocol.
//!
//! [`EventSource`] wraps the generic pull engine around a
//! [`KafkaBackend`], which owns the client, the read policy, the
//! existence checker and the external offset store. Everything commit
//! related funnels through the backend: auto-commit bookkeeping rides on
//! decoding, buffer exhaustion issues the no-argument commit, and
//! `processed` either applies immediately on the owning thread or defers
//! through a lock-free queue.

use crate::broker::{BrokerClient, BrokerError, FetchedRecord, TopicPartition, TopicProbe};
use crate::error::{Result, SourceError};
use crate::existence::TopicExistenceChecker;
use crate::metrics::SourceMetrics;
use crate::options::{Codec, SourceOptions};
use crate::policy::{BoundPolicy, ReadPolicy, SeekPlan, SharedOffsetStore, StartPosition};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossbeam_queue::SegQueue;
use event_core::{BufferedEventSource, Event, SourceBackend, SourceHandle};
use offset_store::{offset_store_key, OffsetStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Next-read offset to commit, per partition.
type CommitMap = BTreeMap<TopicPartition, i64>;

/// Kafka-specific half of the pull engine.
pub struct KafkaBackend<C: BrokerClient> {
    client: C,
    options: SourceOptions,
    policy: BoundPolicy,
    existence: TopicExistenceChecker,
    store: Option<SharedOffsetStore>,
    metrics: SourceMetrics,
    deferred: Arc<SegQueue<CommitMap>>,
    auto_offsets: CommitMap,
    committed: CommitMap,
    owner: Option<ThreadId>,
    started: bool,
    first_run: bool,
    decoded_since_lag_report: u64,
}

impl<C: BrokerClient> KafkaBackend<C> {
    /// Apply deferred cross-thread commits. Only ever called on the
    /// owning thread.
    fn drain_deferred(&mut self) -> Result<()> {
        while let Some(offsets) = self.deferred.pop() {
            self.apply_commit(offsets)?;
        }
        Ok(())
    }

    /// Commit explicit next-read offsets synchronously, mirroring them
    /// into the external store.
    fn apply_commit(&mut self, offsets: CommitMap) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }

        // Never re-commit below an offset this source already committed.
        let mut to_commit = CommitMap::new();
        for (tp, next) in offsets {
            let clamped = self.committed.get(&tp).map_or(next, |prev| next.max(*prev));
            to_commit.insert(tp, clamped);
        }

        // The broker rejects commits for partitions this consumer no
        // longer owns; drop them up front.
        let assigned = self
            .client
            .assignment()
            .map_err(SourceError::from_broker)?;
        let requested = to_commit.len();
        to_commit.retain(|tp, _| assigned.contains(tp));
        if to_commit.len() < requested {
            debug!(
                "Dropped {} unassigned partition(s) from commit",
                requested - to_commit.len()
            );
        }
        if to_commit.is_empty() {
            self.nothing_to_commit();
            return Ok(());
        }

        self.client
            .commit(&to_commit)
            .map_err(|e| SourceError::Commit(e.to_string()))?;
        for (tp, next) in &to_commit {
            self.committed.insert(tp.clone(), *next);
        }
        self.metrics.commit();
        self.sync_store(&to_commit);
        Ok(())
    }

    /// Every partition in the request was dropped; distinguishable from a
    /// successful commit in both logs and counters.
    fn nothing_to_commit(&mut self) {
        debug!("Nothing to commit after dropping unassigned partitions");
        self.metrics.commit_skipped();
    }

    /// The no-argument commit: the client commits its own last-fetch
    /// bookkeeping. Only called with an empty buffer, where the client's
    /// positions equal the tracked decoded offsets.
    fn commit_current_with_store(&mut self) -> Result<()> {
        self.client
            .commit_current()
            .map_err(|e| SourceError::Commit(e.to_string()))?;
        self.metrics.commit();
        let tracked = self.auto_offsets.clone();
        if tracked.is_empty() {
            return Ok(());
        }
        for (tp, next) in &tracked {
            let entry = self.committed.entry(tp.clone()).or_insert(*next);
            *entry = (*entry).max(*next);
        }
        self.sync_store(&tracked);
        Ok(())
    }

    /// Mirror committed offsets into the external store. Best-effort by
    /// contract: failures are logged and swallowed so they can never take
    /// down the broker-native commit path.
    fn sync_store(&self, offsets: &CommitMap) {
        let Some(store) = &self.store else {
            return;
        };
        let mut store = store.lock();
        for (tp, next) in offsets {
            let key = offset_store_key(&tp.topic, tp.partition, &self.options.group_id);
            if let Err(e) = store.save_offset(&key, *next) {
                warn!("Failed to record offset {next} for {key} in offset store: {e:#}");
                self.metrics.store_write_failure();
            }
        }
        if let Err(e) = store.flush() {
            warn!("Failed to flush offset store: {e:#}");
            self.metrics.store_write_failure();
        }
    }

    fn classify_fetch_error(&self, e: BrokerError) -> SourceError {
        match &e {
            BrokerError::InvalidOffset {
                topic,
                partition,
                detail,
            } => error!(
                "Invalid offset on {topic}[{partition}] ({detail}); reset the read policy \
                 or clear the group's committed offsets"
            ),
            BrokerError::Authentication(detail) => {
                error!("Authentication failed ({detail}); check the configured credentials")
            }
            BrokerError::Authorization(detail) => {
                error!("Authorization failed ({detail}); topic or group ACLs deny access")
            }
            BrokerError::NoPartitionsAssigned(detail) => {
                error!("No partitions assigned ({detail}); the group may have no free partitions")
            }
            BrokerError::InvalidTopic(detail) => {
                error!("Invalid topic ({detail}); check the configured topic names")
            }
            _ => error!("Fetch failed: {e}"),
        }
        SourceError::from_broker(e)
    }

    fn maybe_report_lag(&mut self) {
        let Some(interval) = self.options.lag_report_interval else {
            return;
        };
        self.decoded_since_lag_report += 1;
        if self.decoded_since_lag_report < interval {
            return;
        }
        self.decoded_since_lag_report = 0;
        for topic in &self.options.topics {
            match self.policy.current_lag(&self.client, topic) {
                Some(lag) => info!("Lag for {topic}: {lag}"),
                None => debug!("Lag for {topic} not currently known"),
            }
        }
    }
}

impl<C: BrokerClient> SourceBackend for KafkaBackend<C> {
    type Record = FetchedRecord;
    type Error = SourceError;

    fn closed_error(&self) -> SourceError {
        SourceError::Closed
    }

    fn buffer_exhausted(&mut self) -> Result<()> {
        if self.first_run {
            // Nothing has been fetched yet, so there is nothing to commit.
            self.first_run = false;
            return Ok(());
        }
        if self.options.auto_commit && self.started {
            debug!("Buffer exhausted, committing current offsets");
            self.commit_current_with_store()?;
            self.metrics.exhaustion_commit();
        }
        Ok(())
    }

    fn try_fill_buffer(
        &mut self,
        timeout: Duration,
        buffer: &mut VecDeque<FetchedRecord>,
    ) -> Result<()> {
        if self.owner.is_none() {
            self.owner = Some(std::thread::current().id());
        }

        // The existence check shares the caller's budget; whatever it
        // consumes comes off the fetch timeout.
        let fill_started = Instant::now();
        if !self.existence.any_topic_exists(timeout)? {
            debug!("No configured topic exists yet, skipping fetch");
            return Ok(());
        }
        let remaining = timeout.saturating_sub(fill_started.elapsed());

        if !self.started {
            // Lazy connect: subscribe only once a topic is known to
            // exist, on the first fill rather than at construction.
            let topics = self.options.topics.clone();
            for topic in &topics {
                self.policy.start_events(&self.client, topic)?;
            }
            self.started = true;
        }

        let mut fetched = Vec::new();
        match self
            .client
            .fetch(remaining, self.options.max_fetch_records, &mut fetched)
        {
            Ok(()) => {}
            Err(BrokerError::Interrupted) => {
                // Woken during shutdown; recoverable, the next poll
                // simply retries.
                debug!("Fetch interrupted, leaving buffer empty");
                return Ok(());
            }
            Err(e) => return Err(self.classify_fetch_error(e)),
        }

        if !fetched.is_empty() {
            debug!("Fetched {} record(s)", fetched.len());
            self.metrics.records_fetched(fetched.len() as u64);
            buffer.extend(fetched);
        }
        Ok(())
    }

    fn decode(&mut self, record: FetchedRecord) -> Result<Event> {
        // Commits handed over from other threads are applied here, on the
        // thread that owns the client.
        self.drain_deferred()?;

        let key = decode_field(self.options.key_codec, record.key.as_deref(), &record, "key")?;
        let value = decode_field(
            self.options.value_codec,
            record.value.as_deref(),
            &record,
            "value",
        )?;

        let mut event = Event::new(key, value);
        for (name, raw) in &record.headers {
            event = event.header(name.clone(), String::from_utf8_lossy(raw).into_owned());
        }
        event = event.with_source(SourceHandle {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
        });

        if self.options.auto_commit {
            // Bookkeeping is a side effect of decoding, so an exhaustion
            // commit is correct even if the caller never marks anything
            // processed.
            self.auto_offsets
                .insert(record.topic_partition(), record.offset + 1);
        }

        self.metrics.event_decoded();
        self.maybe_report_lag();
        Ok(event)
    }

    fn on_close(&mut self, buffer: &mut VecDeque<FetchedRecord>) -> Result<()> {
        info!("Closing event source");
        let mut first_error: Option<SourceError> = None;

        // 1. Commit decoded progress before anything can disturb the
        //    client's view of its assignment.
        if self.options.auto_commit && self.started {
            let result = if buffer.is_empty() {
                self.commit_current_with_store()
            } else {
                let tracked = self.auto_offsets.clone();
                self.apply_commit(tracked)
            };
            if let Err(e) = result {
                error!("Final commit failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        // 2. Apply commits still queued from other threads.
        if let Err(e) = self.drain_deferred() {
            error!("Applying deferred commits failed: {e}");
            first_error.get_or_insert(e);
        }

        // 3. Flush and release the external store; best-effort by
        //    contract.
        if let Some(store) = self.store.take() {
            let mut store = store.lock();
            if let Err(e) = store.flush() {
                warn!("Failed to flush offset store at close: {e:#}");
            }
            if let Err(e) = store.close() {
                warn!("Failed to close offset store: {e:#}");
            }
        }

        // 4. Only now stop per-topic streaming. Any earlier and the
        //    client would believe it owns nothing, silently dropping the
        //    commits above.
        if self.started {
            let topics = self.options.topics.clone();
            for topic in &topics {
                if let Err(e) = self.policy.stop_events(&self.client, topic) {
                    warn!("Failed to stop events for {topic}: {e}");
                }
            }
        }

        // 5. Abort in-flight existence checks.
        self.existence.close();

        // 6. Release the client connection.
        self.client.close();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn decode_field(
    codec: Codec,
    bytes: Option<&[u8]>,
    record: &FetchedRecord,
    field: &str,
) -> Result<Option<String>> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    match codec {
        Codec::Utf8 => match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Some(s.to_string())),
            Err(e) => Err(SourceError::MalformedRecord {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                detail: format!("{field} is not valid UTF-8: {e}"),
            }),
        },
        Codec::Base64 => Ok(Some(BASE64.encode(bytes))),
    }
}

/// Group processed events by partition and keep the highest offset, plus
/// one: the next record the group should read.
fn offsets_to_commit(events: &[Event]) -> CommitMap {
    let mut offsets = CommitMap::new();
    for event in events {
        let Some(source) = event.source() else {
            debug!("Ignoring processed event with no source handle");
            continue;
        };
        let tp = TopicPartition::new(source.topic.clone(), source.partition);
        let next = source.offset + 1;
        offsets
            .entry(tp)
            .and_modify(|existing| *existing = (*existing).max(next))
            .or_insert(next);
    }
    offsets
}

/// Cloneable handle for marking events processed from threads that do not
/// own the source. Commits always defer; the owning thread applies them
/// on its next decode or at close.
#[derive(Clone)]
pub struct Acknowledger {
    deferred: Arc<SegQueue<CommitMap>>,
    metrics: SourceMetrics,
}

impl Acknowledger {
    pub fn processed(&self, events: &[Event]) {
        let offsets = offsets_to_commit(events);
        if offsets.is_empty() {
            return;
        }
        self.deferred.push(offsets);
        self.metrics.commit_deferred();
    }
}

/// Pull-based event source over a Kafka-like broker.
///
/// Single consumer by contract: one thread polls. A second thread may
/// mark events processed through an [`Acknowledger`], or through
/// [`EventSource::processed`] if it has exclusive access; either way the
/// commit lands on the owning thread.
pub struct EventSource<C: BrokerClient> {
    engine: BufferedEventSource<KafkaBackend<C>>,
}

impl<C: BrokerClient> EventSource<C> {
    /// Assemble a source from parts.
    ///
    /// The factory receives the seek plan so it can register it wherever
    /// the client reports assignment changes (the rebalance callback for
    /// the real client, a direct hook for test doubles).
    pub fn from_parts<F>(
        options: SourceOptions,
        policy: ReadPolicy,
        store: Option<Box<dyn OffsetStore>>,
        probe: Arc<dyn TopicProbe>,
        metrics: SourceMetrics,
        factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<SeekPlan>) -> Result<C>,
    {
        options.validate()?;
        if matches!(policy.start, StartPosition::Stored { .. }) && store.is_none() {
            return Err(SourceError::InvalidConfig(
                "Stored start position requires an offset store".to_string(),
            ));
        }

        let store: Option<SharedOffsetStore> =
            store.map(|s| Arc::new(Mutex::new(s)) as SharedOffsetStore);
        let plan = Arc::new(SeekPlan::new(
            policy.start.clone(),
            options.group_id.clone(),
            store.clone(),
        ));
        let client = factory(plan.clone())?;
        let existence = TopicExistenceChecker::new(options.topics.clone(), probe);

        let backend = KafkaBackend {
            client,
            options,
            policy: BoundPolicy::new(policy.mode, plan),
            existence,
            store,
            metrics,
            deferred: Arc::new(SegQueue::new()),
            auto_offsets: CommitMap::new(),
            committed: CommitMap::new(),
            owner: None,
            started: false,
            first_run: true,
            decoded_since_lag_report: 0,
        };
        Ok(Self {
            engine: BufferedEventSource::new(backend),
        })
    }

    /// Return the next event, waiting at most `timeout` for new records.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<Event>> {
        self.engine.poll(timeout)
    }

    /// True iff the source is open and the next poll needs no broker
    /// round trip.
    pub fn ready(&self) -> bool {
        self.engine.ready()
    }

    /// Records fetched but not yet handed to the caller.
    pub fn buffered(&self) -> usize {
        self.engine.buffered()
    }

    /// Mark events as processed, committing max(offset)+1 per partition.
    ///
    /// Called on the owning thread this commits synchronously; called on
    /// any other thread the commit defers and is applied by the owning
    /// thread on its next decode or at close.
    pub fn processed(&mut self, events: &[Event]) -> Result<()> {
        let offsets = offsets_to_commit(events);
        if offsets.is_empty() {
            return Ok(());
        }
        let backend = self.engine.backend_mut();
        match backend.owner {
            Some(owner) if owner != std::thread::current().id() => {
                debug!("Deferring commit from non-owning thread");
                backend.deferred.push(offsets);
                backend.metrics.commit_deferred();
                Ok(())
            }
            _ => backend.apply_commit(offsets),
        }
    }

    /// Handle for marking events processed from another thread.
    pub fn acknowledger(&self) -> Acknowledger {
        let backend = self.engine.backend();
        Acknowledger {
            deferred: backend.deferred.clone(),
            metrics: backend.metrics.clone(),
        }
    }

    /// Broker-reported lag across all configured topics plus the buffered
    /// record count. `None` while lag is unknown for some topic.
    pub fn remaining(&self) -> Option<i64> {
        let backend = self.engine.backend();
        let mut total = self.engine.buffered() as i64;
        for topic in &backend.options.topics {
            total += backend.policy.current_lag(&backend.client, topic)?;
        }
        Some(total)
    }

    /// Queue an explicit starting-offset override for a partition,
    /// applied at its next assignment even if it was already seeked.
    pub fn request_offset_reset(&self, topic: &str, partition: i32, offset: i64) {
        self.engine
            .backend()
            .policy
            .plan()
            .request_offset_reset(TopicPartition::new(topic, partition), offset);
    }

    pub fn metrics(&self) -> SourceMetrics {
        self.engine.backend().metrics.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Commit outstanding progress and release every owned resource, in
    /// an order that cannot lose commits. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.engine.close()
    }
}
