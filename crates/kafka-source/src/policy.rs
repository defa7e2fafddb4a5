//! Read policies: partition assignment mode and starting-offset selection.
//!
//! A policy is plain configuration until a source binds it to a client.
//! The bound half splits in two:
//!
//! - [`BoundPolicy`] runs on the polling thread and drives subscribe,
//!   unsubscribe and manual assignment per topic.
//! - [`SeekPlan`] is shared with the client's rebalance callback and owns
//!   the one piece of cross-callback state: which partitions have already
//!   been seeked this consumer lifetime, and which have a pending offset
//!   reset that must win over that bookkeeping.

use crate::broker::{
    AssignmentObserver, BrokerClient, SeekHandle, SeekTarget, TopicPartition,
};
use crate::error::{Result, SourceError};
use offset_store::{offset_store_key, OffsetStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const WATERMARK_TIMEOUT: Duration = Duration::from_secs(1);

/// Offset store handle shared between the commit path and the seek plan.
pub type SharedOffsetStore = Arc<Mutex<Box<dyn OffsetStore>>>;

/// Where a consumer starts reading a newly assigned partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// No seeking; the broker resumes from the group's committed position,
    /// falling back to the oldest available record.
    Earliest,
    /// No seeking; the broker resumes from the group's committed position,
    /// falling back to the live end.
    Latest,
    /// Seek every assigned partition to its first available record.
    Beginning,
    /// Seek every assigned partition to its live end.
    End,
    /// Seek to an explicit offset per partition. Unlisted partitions
    /// default to offset 0.
    Offsets(HashMap<i32, i64>),
    /// Seek to whatever the external offset store recorded for this
    /// (topic, partition, group), falling back to `default_offset`.
    Stored { default_offset: i64 },
}

impl StartPosition {
    /// Whether this position is realized by seeking, as opposed to broker
    /// side auto-offset-reset configuration.
    pub fn is_seeking(&self) -> bool {
        !matches!(self, StartPosition::Earliest | StartPosition::Latest)
    }
}

/// How the consumer acquires partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentMode {
    /// Join the consumer group and let the broker distribute partitions.
    Subscribe,
    /// Statically take every partition of every configured topic, so one
    /// process reads 100% of the data with no group rebalancing.
    Assign,
}

/// Assignment mode plus starting position. Plain configuration; a source
/// binds it at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPolicy {
    pub mode: AssignmentMode,
    pub start: StartPosition,
}

impl ReadPolicy {
    pub fn subscribe(start: StartPosition) -> Self {
        Self {
            mode: AssignmentMode::Subscribe,
            start,
        }
    }

    pub fn assign(start: StartPosition) -> Self {
        Self {
            mode: AssignmentMode::Assign,
            start,
        }
    }

    /// Inject policy-driven client configuration. Non-seeking positions
    /// delegate start-position selection to the broker client itself.
    pub fn prepare_consumer_config(&self, properties: &mut Vec<(String, String)>) {
        match self.start {
            StartPosition::Earliest => {
                properties.push(("auto.offset.reset".to_string(), "earliest".to_string()));
            }
            StartPosition::Latest => {
                properties.push(("auto.offset.reset".to_string(), "latest".to_string()));
            }
            _ => {}
        }
    }
}

/// Seek bookkeeping shared with the assignment callback.
///
/// Guarantees the seek primitive runs at most once per partition across
/// the consumer's lifetime, however many times the partition is revoked
/// and reassigned. A pending offset reset wins over that guarantee once,
/// then re-arms it.
pub struct SeekPlan {
    start: StartPosition,
    group_id: String,
    store: Option<SharedOffsetStore>,
    seeked: Mutex<BTreeSet<TopicPartition>>,
    resets: Mutex<BTreeMap<TopicPartition, i64>>,
}

impl SeekPlan {
    pub fn new(start: StartPosition, group_id: String, store: Option<SharedOffsetStore>) -> Self {
        Self {
            start,
            group_id,
            store,
            seeked: Mutex::new(BTreeSet::new()),
            resets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Queue an explicit offset override for a partition. Consumed by the
    /// next assignment of that partition, even if it was already seeked.
    pub fn request_offset_reset(&self, tp: TopicPartition, offset: i64) {
        info!("Queued offset reset for {tp} to {offset}");
        self.resets.lock().insert(tp, offset);
    }

    /// Partitions already seeked this lifetime.
    pub fn seeked_partitions(&self) -> Vec<TopicPartition> {
        self.seeked.lock().iter().cloned().collect()
    }

    fn resolve_target(&self, tp: &TopicPartition) -> SeekTarget {
        match &self.start {
            StartPosition::Beginning => SeekTarget::Beginning,
            StartPosition::End => SeekTarget::End,
            StartPosition::Offsets(offsets) => {
                SeekTarget::Offset(offsets.get(&tp.partition).copied().unwrap_or(0))
            }
            StartPosition::Stored { default_offset } => {
                SeekTarget::Offset(self.stored_offset(tp, *default_offset))
            }
            // Not reached: non-seeking positions never resolve a target.
            StartPosition::Earliest | StartPosition::Latest => SeekTarget::Beginning,
        }
    }

    /// Look up the externally stored offset for a partition, falling back
    /// to `default_offset` when the store has nothing or misbehaves.
    fn stored_offset(&self, tp: &TopicPartition, default_offset: i64) -> i64 {
        let Some(store) = &self.store else {
            return default_offset;
        };
        let key = offset_store_key(&tp.topic, tp.partition, &self.group_id);
        let store = store.lock();
        match store.has_offset(&key) {
            Ok(true) => match store.load_offset(&key) {
                Ok(offset) => {
                    info!("Resuming {tp} from stored offset {offset} (key {key})");
                    offset
                }
                Err(e) => {
                    warn!("Failed to load stored offset for {key}: {e:#}");
                    default_offset
                }
            },
            Ok(false) => {
                debug!("No stored offset for {key}, starting at {default_offset}");
                default_offset
            }
            Err(e) => {
                warn!("Failed to query offset store for {key}: {e:#}");
                default_offset
            }
        }
    }

    fn seek_assigned(&self, client: &dyn SeekHandle, tp: &TopicPartition) {
        if let Some(offset) = self.resets.lock().remove(tp) {
            // A reset wins over idempotence, then re-arms it.
            self.seeked.lock().insert(tp.clone());
            match client.seek(tp, SeekTarget::Offset(offset)) {
                Ok(()) => info!("Seeked {tp} to reset offset {offset}"),
                Err(e) => warn!("Failed to seek {tp} to reset offset {offset}: {e}"),
            }
            return;
        }

        if !self.start.is_seeking() {
            return;
        }

        {
            // Mark before seeking so a failed seek is not retried; the
            // guarantee is at most one seek per partition per lifetime.
            let mut seeked = self.seeked.lock();
            if !seeked.insert(tp.clone()) {
                debug!("Skipping already-seeked partition {tp}");
                return;
            }
        }

        let target = self.resolve_target(tp);
        match client.seek(tp, target) {
            Ok(()) => info!("Seeked {tp} to {target:?}"),
            Err(e) => warn!("Failed to seek {tp} to {target:?}: {e}"),
        }
    }
}

impl AssignmentObserver for SeekPlan {
    fn on_assigned(&self, client: &dyn SeekHandle, partitions: &[TopicPartition]) {
        info!("Assigned {} partition(s)", partitions.len());
        for tp in partitions {
            self.seek_assigned(client, tp);
            match client.position(tp) {
                Ok(Some(offset)) => info!("Read position for {tp}: {offset}"),
                Ok(None) => debug!("Read position for {tp} not yet known"),
                Err(e) => debug!("Could not read position for {tp}: {e}"),
            }
        }
    }

    fn on_revoked(&self, partitions: &[TopicPartition]) {
        for tp in partitions {
            info!("Revoked {tp}");
        }
    }
}

/// A read policy bound to one source. Lives on the polling thread.
pub struct BoundPolicy {
    mode: AssignmentMode,
    plan: Arc<SeekPlan>,
    subscribed: BTreeSet<String>,
    assigned: BTreeSet<TopicPartition>,
}

impl BoundPolicy {
    pub fn new(mode: AssignmentMode, plan: Arc<SeekPlan>) -> Self {
        Self {
            mode,
            plan,
            subscribed: BTreeSet::new(),
            assigned: BTreeSet::new(),
        }
    }

    pub fn plan(&self) -> &Arc<SeekPlan> {
        &self.plan
    }

    /// Begin receiving a topic's records, merging with whatever this
    /// policy already reads.
    pub fn start_events<C: BrokerClient>(&mut self, client: &C, topic: &str) -> Result<()> {
        match self.mode {
            AssignmentMode::Subscribe => {
                if !self.subscribed.insert(topic.to_string()) {
                    return Ok(());
                }
                let topics: Vec<String> = self.subscribed.iter().cloned().collect();
                info!("Subscribing to {topics:?}");
                client
                    .subscribe(&topics)
                    .map_err(SourceError::from_broker)?;
            }
            AssignmentMode::Assign => {
                if self.assigned.iter().any(|tp| tp.topic == topic) {
                    return Ok(());
                }
                let partitions = client
                    .partitions_for(topic, METADATA_TIMEOUT)
                    .map_err(SourceError::from_broker)?;
                let new: Vec<TopicPartition> = partitions
                    .into_iter()
                    .map(|p| TopicPartition::new(topic, p))
                    .collect();
                info!("Assigning all {} partition(s) of {topic}", new.len());
                self.assigned.extend(new.iter().cloned());
                let all: Vec<TopicPartition> = self.assigned.iter().cloned().collect();
                client.assign(&all).map_err(SourceError::from_broker)?;
                // Manual assignment never triggers a rebalance callback,
                // so the seek plan is driven directly here.
                self.plan.on_assigned(client, &new);
            }
        }
        Ok(())
    }

    /// Stop receiving a topic's records, logging final read positions
    /// first.
    pub fn stop_events<C: BrokerClient>(&mut self, client: &C, topic: &str) -> Result<()> {
        self.log_read_positions(client, topic);
        match self.mode {
            AssignmentMode::Subscribe => {
                self.subscribed.remove(topic);
                if self.subscribed.is_empty() {
                    info!("Unsubscribing from all topics");
                    client.unsubscribe();
                } else {
                    let topics: Vec<String> = self.subscribed.iter().cloned().collect();
                    info!("Unsubscribing from {topic}, still reading {topics:?}");
                    client
                        .subscribe(&topics)
                        .map_err(SourceError::from_broker)?;
                }
            }
            AssignmentMode::Assign => {
                self.assigned.retain(|tp| tp.topic != topic);
                let remaining: Vec<TopicPartition> = self.assigned.iter().cloned().collect();
                client.assign(&remaining).map_err(SourceError::from_broker)?;
            }
        }
        Ok(())
    }

    /// Log the next-read offset of every currently assigned partition of
    /// a topic.
    pub fn log_read_positions<C: BrokerClient>(&self, client: &C, topic: &str) {
        let assigned = match client.assignment() {
            Ok(assigned) => assigned,
            Err(e) => {
                debug!("Could not list assignment for {topic}: {e}");
                return;
            }
        };
        for tp in assigned.iter().filter(|tp| tp.topic == topic) {
            match client.position(tp) {
                Ok(Some(offset)) => info!("Read position for {tp}: {offset}"),
                Ok(None) => info!("Read position for {tp}: unknown"),
                Err(e) => debug!("Could not read position for {tp}: {e}"),
            }
        }
    }

    /// Broker-reported lag summed over this topic's assigned partitions.
    /// `None` when no partitions are assigned or a position is unknown.
    pub fn current_lag<C: BrokerClient>(&self, client: &C, topic: &str) -> Option<i64> {
        let assigned: Vec<TopicPartition> = client
            .assignment()
            .ok()?
            .into_iter()
            .filter(|tp| tp.topic == topic)
            .collect();
        if assigned.is_empty() {
            return None;
        }

        let mut total = 0i64;
        for tp in &assigned {
            let (_, high) = client.watermarks(tp, WATERMARK_TIMEOUT).ok()?;
            let position = client.position(tp).ok()??;
            total += (high - position).max(0);
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_seeking_positions_inject_offset_reset() {
        let mut props = Vec::new();
        ReadPolicy::subscribe(StartPosition::Earliest).prepare_consumer_config(&mut props);
        assert_eq!(
            props,
            vec![("auto.offset.reset".to_string(), "earliest".to_string())]
        );

        props.clear();
        ReadPolicy::subscribe(StartPosition::Latest).prepare_consumer_config(&mut props);
        assert_eq!(
            props,
            vec![("auto.offset.reset".to_string(), "latest".to_string())]
        );
    }

    #[test]
    fn test_seeking_positions_leave_config_alone() {
        for start in [
            StartPosition::Beginning,
            StartPosition::End,
            StartPosition::Offsets(HashMap::new()),
            StartPosition::Stored { default_offset: 0 },
        ] {
            let mut props = Vec::new();
            ReadPolicy::subscribe(start).prepare_consumer_config(&mut props);
            assert!(props.is_empty());
        }
    }

    #[test]
    fn test_explicit_offsets_default_to_zero() {
        let plan = SeekPlan::new(
            StartPosition::Offsets(HashMap::from([(1, 50)])),
            "g".to_string(),
            None,
        );
        assert_eq!(
            plan.resolve_target(&TopicPartition::new("t", 1)),
            SeekTarget::Offset(50)
        );
        assert_eq!(
            plan.resolve_target(&TopicPartition::new("t", 0)),
            SeekTarget::Offset(0)
        );
    }

    #[test]
    fn test_stored_position_falls_back_without_a_store() {
        let plan = SeekPlan::new(
            StartPosition::Stored { default_offset: 7 },
            "g".to_string(),
            None,
        );
        assert_eq!(
            plan.resolve_target(&TopicPartition::new("t", 0)),
            SeekTarget::Offset(7)
        );
    }

    #[test]
    fn test_seeking_classification() {
        assert!(!StartPosition::Earliest.is_seeking());
        assert!(!StartPosition::Latest.is_seeking());
        assert!(StartPosition::Beginning.is_seeking());
        assert!(StartPosition::End.is_seeking());
        assert!(StartPosition::Offsets(HashMap::new()).is_seeking());
        assert!(StartPosition::Stored { default_offset: 0 }.is_seeking());
    }
}
