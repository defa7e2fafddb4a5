//! In-memory broker and probe for tests.
//!
//! [`MockBroker`] scripts fetch outcomes and records every client call,
//! so tests can assert on commit contents and call ordering without a
//! running cluster. Clones share state.

use crate::broker::{
    AssignmentObserver, BrokerClient, BrokerError, FetchedRecord, ProbeError, SeekHandle,
    SeekTarget, TopicPartition, TopicProbe,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

type CommitMap = BTreeMap<TopicPartition, i64>;

#[derive(Default)]
struct MockState {
    fetch_script: VecDeque<Result<Vec<FetchedRecord>, BrokerError>>,
    ops: Vec<String>,
    subscribed: Vec<String>,
    assignment: Vec<TopicPartition>,
    partitions: HashMap<String, Vec<i32>>,
    positions: BTreeMap<TopicPartition, i64>,
    watermarks: BTreeMap<TopicPartition, (i64, i64)>,
    committed: CommitMap,
    commits: Vec<CommitMap>,
    commit_current_calls: usize,
    seeks: Vec<(TopicPartition, SeekTarget)>,
    observer: Option<Arc<dyn AssignmentObserver>>,
    fetch_calls: usize,
    closed: bool,
}

/// Scriptable in-memory broker client.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a topic's partitions. Undeclared topics have a single
    /// partition 0.
    pub fn with_partitions(self, topic: &str, partitions: Vec<i32>) -> Self {
        self.state
            .lock()
            .partitions
            .insert(topic.to_string(), partitions);
        self
    }

    /// Queue the outcome of one fetch call. Once the script runs dry,
    /// fetches return empty.
    pub fn push_fetch(&self, records: Vec<FetchedRecord>) {
        self.state.lock().fetch_script.push_back(Ok(records));
    }

    pub fn push_fetch_error(&self, error: BrokerError) {
        self.state.lock().fetch_script.push_back(Err(error));
    }

    pub fn set_watermarks(&self, tp: TopicPartition, low: i64, high: i64) {
        self.state.lock().watermarks.insert(tp, (low, high));
    }

    pub fn set_position(&self, tp: TopicPartition, offset: i64) {
        self.state.lock().positions.insert(tp, offset);
    }

    /// Install the observer a real client would drive from its rebalance
    /// callback.
    pub fn set_observer(&self, observer: Arc<dyn AssignmentObserver>) {
        self.state.lock().observer = Some(observer);
    }

    /// Simulate the group handing partitions to this consumer.
    pub fn fire_assign(&self, partitions: Vec<TopicPartition>) {
        let observer = {
            let mut state = self.state.lock();
            for tp in &partitions {
                if !state.assignment.contains(tp) {
                    state.assignment.push(tp.clone());
                }
            }
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.on_assigned(self, &partitions);
        }
    }

    /// Simulate the group taking partitions away from this consumer.
    pub fn fire_revoke(&self, partitions: Vec<TopicPartition>) {
        let observer = {
            let mut state = self.state.lock();
            state.assignment.retain(|tp| !partitions.contains(tp));
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.on_revoked(&partitions);
        }
    }

    /// Every call made against this client, in order.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().ops.clone()
    }

    /// Index of the first op starting with `prefix`.
    pub fn op_index(&self, prefix: &str) -> Option<usize> {
        self.state
            .lock()
            .ops
            .iter()
            .position(|op| op.starts_with(prefix))
    }

    /// Every explicit commit, in order.
    pub fn commits(&self) -> Vec<CommitMap> {
        self.state.lock().commits.clone()
    }

    /// Latest committed next-read offset per partition.
    pub fn committed(&self) -> CommitMap {
        self.state.lock().committed.clone()
    }

    pub fn commit_current_calls(&self) -> usize {
        self.state.lock().commit_current_calls
    }

    pub fn seeks(&self) -> Vec<(TopicPartition, SeekTarget)> {
        self.state.lock().seeks.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.state.lock().subscribed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn known_partitions(state: &MockState, topic: &str) -> Vec<i32> {
        state.partitions.get(topic).cloned().unwrap_or_else(|| vec![0])
    }
}

impl SeekHandle for MockBroker {
    fn seek(&self, tp: &TopicPartition, target: SeekTarget) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.ops.push(format!("seek:{tp}:{target:?}"));
        state.seeks.push((tp.clone(), target));
        let position = match target {
            SeekTarget::Beginning => state.watermarks.get(tp).map_or(0, |w| w.0),
            SeekTarget::End => state.watermarks.get(tp).map_or(0, |w| w.1),
            SeekTarget::Offset(n) => n,
        };
        state.positions.insert(tp.clone(), position);
        Ok(())
    }

    fn position(&self, tp: &TopicPartition) -> Result<Option<i64>, BrokerError> {
        Ok(self.state.lock().positions.get(tp).copied())
    }
}

impl BrokerClient for MockBroker {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let (observer, assigned) = {
            let mut state = self.state.lock();
            state.ops.push(format!("subscribe:{}", topics.join(",")));
            state.subscribed = topics.to_vec();
            let mut assigned = Vec::new();
            for topic in topics {
                for partition in Self::known_partitions(&state, topic) {
                    assigned.push(TopicPartition::new(topic.clone(), partition));
                }
            }
            state.assignment = assigned.clone();
            (state.observer.clone(), assigned)
        };
        // Fired outside the lock so the observer can seek back into this
        // client, as a real rebalance callback would.
        if let Some(observer) = observer {
            observer.on_assigned(self, &assigned);
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        let mut state = self.state.lock();
        state.ops.push("unsubscribe".to_string());
        state.subscribed.clear();
        state.assignment.clear();
    }

    fn assign(&self, partitions: &[TopicPartition]) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let rendered: Vec<String> = partitions.iter().map(|tp| tp.to_string()).collect();
        state.ops.push(format!("assign:{}", rendered.join(",")));
        state.assignment = partitions.to_vec();
        Ok(())
    }

    fn assignment(&self) -> Result<Vec<TopicPartition>, BrokerError> {
        Ok(self.state.lock().assignment.clone())
    }

    fn fetch(
        &self,
        timeout: Duration,
        max_records: usize,
        out: &mut Vec<FetchedRecord>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;
        state.ops.push(format!("fetch:{}ms", timeout.as_millis()));
        match state.fetch_script.pop_front() {
            None => Ok(()),
            Some(Err(e)) => Err(e),
            Some(Ok(records)) => {
                for record in records.into_iter().take(max_records) {
                    state
                        .positions
                        .insert(record.topic_partition(), record.offset + 1);
                    out.push(record);
                }
                Ok(())
            }
        }
    }

    fn commit(&self, offsets: &CommitMap) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let rendered: Vec<String> = offsets
            .iter()
            .map(|(tp, next)| format!("{tp}={next}"))
            .collect();
        state.ops.push(format!("commit:{}", rendered.join(",")));
        state
            .committed
            .extend(offsets.iter().map(|(tp, next)| (tp.clone(), *next)));
        state.commits.push(offsets.clone());
        Ok(())
    }

    fn commit_current(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.ops.push("commit_current".to_string());
        state.commit_current_calls += 1;
        let positions: Vec<(TopicPartition, i64)> = state
            .positions
            .iter()
            .map(|(tp, next)| (tp.clone(), *next))
            .collect();
        state.committed.extend(positions);
        Ok(())
    }

    fn partitions_for(&self, topic: &str, _timeout: Duration) -> Result<Vec<i32>, BrokerError> {
        let mut state = self.state.lock();
        state.ops.push(format!("partitions_for:{topic}"));
        Ok(Self::known_partitions(&state, topic))
    }

    fn watermarks(
        &self,
        tp: &TopicPartition,
        _timeout: Duration,
    ) -> Result<(i64, i64), BrokerError> {
        Ok(self.state.lock().watermarks.get(tp).copied().unwrap_or((0, 0)))
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.ops.push("close".to_string());
        state.closed = true;
    }
}

/// Scriptable in-memory topic probe.
pub struct MockProbe {
    state: Mutex<ProbeState>,
}

struct ProbeState {
    script: HashMap<String, VecDeque<Result<bool, ProbeError>>>,
    fallback: Result<bool, ProbeError>,
    calls: HashMap<String, usize>,
}

impl MockProbe {
    /// A probe answering `exists` for every topic.
    pub fn answering(exists: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProbeState {
                script: HashMap::new(),
                fallback: Ok(exists),
                calls: HashMap::new(),
            }),
        })
    }

    /// A probe failing every attempt with `error`.
    pub fn failing(error: ProbeError) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProbeState {
                script: HashMap::new(),
                fallback: Err(error),
                calls: HashMap::new(),
            }),
        })
    }

    /// Queue per-attempt outcomes for one topic; the fallback answers
    /// once the script is exhausted.
    pub fn script(&self, topic: &str, outcomes: Vec<Result<bool, ProbeError>>) {
        self.state
            .lock()
            .script
            .entry(topic.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn describe_count(&self, topic: &str) -> usize {
        self.state.lock().calls.get(topic).copied().unwrap_or(0)
    }
}

impl TopicProbe for MockProbe {
    fn describe(&self, topic: &str, _timeout: Duration) -> Result<bool, ProbeError> {
        let mut state = self.state.lock();
        *state.calls.entry(topic.to_string()).or_insert(0) += 1;
        if let Some(queue) = state.script.get_mut(topic) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        state.fallback.clone()
    }
}

/// A record with UTF-8 key and value and no headers.
pub fn record(topic: &str, partition: i32, offset: i64, key: &str, value: &str) -> FetchedRecord {
    FetchedRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(key.as_bytes().to_vec()),
        value: Some(value.as_bytes().to_vec()),
        headers: Vec::new(),
    }
}
