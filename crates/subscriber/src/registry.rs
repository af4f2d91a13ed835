//! Subscription registry
//!
//! The only state shared between control-plane calls and delivery threads.
//! One mutex guards the topic table and is held only for the map operation
//! itself, never across handler calls or network I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{ConnectionState, SiteAddr, StreamError, SubscriptionStatus, Topic};
use delivery::{DeliveryGate, TopicMetrics};
use tracing::debug;

/// Registry-side view of one subscription
///
/// The owning delivery thread holds the rest of the subscription state.
#[derive(Debug)]
pub struct SubscriptionEntry {
    id: u64,
    topic: Topic,
    topic_str: Arc<str>,
    /// Delivery thread owning this subscription
    worker: usize,
    /// Closed once the subscription is released
    gate: Arc<DeliveryGate>,
    /// Whether the server should be told when the worker lets go
    notify_server: AtomicBool,
    metrics: Arc<TopicMetrics>,
    status: Mutex<SubscriptionStatus>,
}

impl SubscriptionEntry {
    pub(crate) fn new(id: u64, topic: Topic, worker: usize) -> Self {
        let topic_str: Arc<str> = Arc::from(topic.to_string());
        let status = SubscriptionStatus {
            state: ConnectionState::Init,
            site: topic.site(),
            site_index: 0,
            reconnect_attempts: 0,
        };
        Self {
            id,
            topic,
            topic_str,
            worker,
            gate: Arc::new(DeliveryGate::new()),
            notify_server: AtomicBool::new(true),
            metrics: Arc::new(TopicMetrics::new()),
            status: Mutex::new(status),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn topic_str(&self) -> &Arc<str> {
        &self.topic_str
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    pub(crate) fn gate(&self) -> Arc<DeliveryGate> {
        self.gate.clone()
    }

    pub fn metrics(&self) -> &Arc<TopicMetrics> {
        &self.metrics
    }

    /// Stop handler calls; the owning worker tears the connection down
    ///
    /// `notify_server` is false when a replacement subscription takes over
    /// the same topic on the server. Returns the number of handler calls
    /// still in flight; no new call starts once this returns.
    pub(crate) fn release(&self, notify_server: bool) -> usize {
        self.notify_server.store(notify_server, Ordering::Release);
        self.gate.close()
    }

    pub(crate) fn should_notify_server(&self) -> bool {
        self.notify_server.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_status(
        &self,
        state: ConnectionState,
        site: &SiteAddr,
        site_index: usize,
        attempts: u64,
    ) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        *status = SubscriptionStatus {
            state,
            site: site.clone(),
            site_index,
            reconnect_attempts: attempts,
        };
    }
}

/// Topic table of one streaming client
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<Topic, Arc<SubscriptionEntry>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Topic, Arc<SubscriptionEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique id for a new entry
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert `entry` under its topic
    ///
    /// # Returns
    /// The replaced entry when `resub` is set and the topic was present.
    ///
    /// # Errors
    /// `DuplicateSubscription` when the topic is present and `resub` is false.
    pub fn register(
        &self,
        entry: Arc<SubscriptionEntry>,
        resub: bool,
    ) -> Result<Option<Arc<SubscriptionEntry>>, StreamError> {
        let mut entries = self.lock();
        if !resub && entries.contains_key(entry.topic()) {
            return Err(StreamError::DuplicateSubscription {
                topic: entry.topic_str().to_string(),
            });
        }
        let previous = entries.insert(entry.topic().clone(), entry);
        debug!(
            topics = entries.len(),
            replaced = previous.is_some(),
            "subscription registered"
        );
        Ok(previous)
    }

    /// Remove `topic`; absent topics are ignored
    pub fn unregister(&self, topic: &Topic) -> Option<Arc<SubscriptionEntry>> {
        self.lock().remove(topic)
    }

    /// Remove `topic` only while it still maps to entry `id`
    ///
    /// Used by delivery threads so that a finished, replaced subscription
    /// never removes its successor.
    pub fn unregister_entry(&self, topic: &Topic, id: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(topic) {
            Some(current) if current.id() == id => {
                entries.remove(topic);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, topic: &Topic) -> Option<Arc<SubscriptionEntry>> {
        self.lock().get(topic).cloned()
    }

    /// Snapshot of topic strings, sorted
    pub fn list_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .lock()
            .values()
            .map(|e| e.topic_str().to_string())
            .collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
