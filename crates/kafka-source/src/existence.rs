//! Cached, background topic-existence checking.
//!
//! Polling a topic that does not exist yet makes the client log storms of
//! fetch failures, so the source refuses to fetch until at least one
//! configured topic is known to exist. Probes run on background threads
//! and land in a concurrent cache; existence is monotonic, so a topic
//! once seen is never probed again.

use crate::broker::{ProbeError, TopicProbe};
use crate::error::{Result, SourceError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_PAUSE: Duration = Duration::from_millis(250);
const POLL_PAUSE: Duration = Duration::from_millis(25);

pub struct TopicExistenceChecker {
    topics: Vec<String>,
    probe: Option<Arc<dyn TopicProbe>>,
    cache: Arc<DashMap<String, bool>>,
    hard_failure: Arc<Mutex<Option<ProbeError>>>,
    in_flight: HashMap<String, JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    closed: bool,
}

impl TopicExistenceChecker {
    pub fn new(topics: Vec<String>, probe: Arc<dyn TopicProbe>) -> Self {
        Self {
            topics,
            probe: Some(probe),
            cache: Arc::new(DashMap::new()),
            hard_failure: Arc::new(Mutex::new(None)),
            in_flight: HashMap::new(),
            stop: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }

    /// Whether at least one configured topic exists, waiting up to
    /// `timeout` for in-flight probes. Once closed, answers from the
    /// cache alone.
    pub fn any_topic_exists(&mut self, timeout: Duration) -> Result<bool> {
        if self.closed {
            return Ok(self.cached_any());
        }
        let deadline = Instant::now() + timeout;

        // Results land in the cache from the worker itself; reaping only
        // clears the slot so an unknown topic can be probed again later.
        self.in_flight.retain(|_, handle| !handle.is_finished());
        self.check_hard_failure()?;

        let to_launch: Vec<String> = self
            .topics
            .iter()
            .filter(|topic| !self.known_to_exist(topic) && !self.in_flight.contains_key(*topic))
            .cloned()
            .collect();
        for topic in to_launch {
            self.launch(topic, timeout);
        }

        if self.cached_any() {
            return Ok(true);
        }

        loop {
            self.check_hard_failure()?;
            if self.cached_any() {
                return Ok(true);
            }
            self.in_flight.retain(|_, handle| !handle.is_finished());
            if self.in_flight.is_empty() {
                // Every probe gave up within its budget.
                return Ok(false);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_PAUSE.min(deadline - now));
        }
    }

    pub fn known_to_exist(&self, topic: &str) -> bool {
        self.cache.get(topic).map(|v| *v).unwrap_or(false)
    }

    /// Stop background probing and release the admin connection.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.store(true, Ordering::SeqCst);
        for (topic, handle) in self.in_flight.drain() {
            if handle.join().is_err() {
                warn!("Existence check thread for {topic} panicked");
            }
        }
        self.probe = None;
    }

    fn cached_any(&self) -> bool {
        self.topics.iter().any(|topic| self.known_to_exist(topic))
    }

    fn check_hard_failure(&self) -> Result<()> {
        if let Some(failure) = self.hard_failure.lock().clone() {
            return Err(SourceError::Authorization(failure.to_string()));
        }
        Ok(())
    }

    fn launch(&mut self, topic: String, budget: Duration) {
        let Some(probe) = &self.probe else {
            return;
        };
        debug!("Launching background existence check for {topic}");
        let worker = Worker {
            probe: probe.clone(),
            cache: self.cache.clone(),
            hard_failure: self.hard_failure.clone(),
            stop: self.stop.clone(),
        };
        let name = format!("topic-check-{topic}");
        let thread_topic = topic.clone();
        match std::thread::Builder::new()
            .name(name)
            .spawn(move || worker.run(thread_topic, budget))
        {
            Ok(handle) => {
                self.in_flight.insert(topic, handle);
            }
            Err(e) => warn!("Could not spawn existence check for {topic}: {e}"),
        }
    }
}

struct Worker {
    probe: Arc<dyn TopicProbe>,
    cache: Arc<DashMap<String, bool>>,
    hard_failure: Arc<Mutex<Option<ProbeError>>>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self, topic: String, budget: Duration) {
        let deadline = Instant::now() + budget;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            // Another worker may have answered while this one slept.
            if self.cache.get(&topic).map(|v| *v).unwrap_or(false) {
                return;
            }
            match self.probe.describe(&topic, PROBE_ATTEMPT_TIMEOUT) {
                Ok(true) => {
                    info!("Topic {topic} exists");
                    self.cache.insert(topic, true);
                    return;
                }
                Ok(false) => {
                    debug!("Topic {topic} does not exist yet");
                    self.cache.insert(topic.clone(), false);
                }
                Err(ProbeError::Transient(e)) => {
                    debug!("Existence check for {topic} failed transiently: {e}");
                }
                Err(e @ ProbeError::Security(_)) => {
                    // Retrying cannot fix credentials; surface and stop.
                    warn!("Existence check for {topic} aborted: {e}");
                    *self.hard_failure.lock() = Some(e);
                    return;
                }
            }
            if Instant::now() + RETRY_PAUSE >= deadline {
                return;
            }
            std::thread::sleep(RETRY_PAUSE);
        }
    }
}
