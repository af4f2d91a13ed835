//! StreamingClient - public entry point
//!
//! Owns the subscription registry and the delivery runtime. Control-plane
//! calls (`subscribe`, `unsubscribe`, listing) may come from any thread,
//! including from inside a handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{ClientConfig, StreamError, SubscriptionStatus, Topic};
use delivery::{TopicDispatcher, TopicMetricsSnapshot};
use native_core::NativeCore;
use tracing::{debug, info, instrument, warn};

use crate::failover::FailoverState;
use crate::pipeline::TopicPipeline;
use crate::registry::{SubscriptionEntry, SubscriptionRegistry};
use crate::request::SubscribeRequest;
use crate::runtime::{build_runtime, DeliveryRuntime, RuntimeKind};
use crate::worker::{TopicTask, WorkerContext};

/// Client-side subscriber to a streaming table service
pub struct StreamingClient {
    ctx: Arc<WorkerContext>,
    runtime: Box<dyn DeliveryRuntime>,
    closed: AtomicBool,
}

impl StreamingClient {
    /// Start the delivery runtime
    ///
    /// `thread_count <= 1` selects the single-threaded runtime, anything
    /// larger a pool of that many threads.
    #[instrument(
        name = "streaming_client_new",
        skip(core, config),
        fields(thread_count = config.thread_count)
    )]
    pub fn new(core: Arc<dyn NativeCore>, config: ClientConfig) -> Result<Self, StreamError> {
        let ctx = Arc::new(WorkerContext {
            core,
            registry: Arc::new(SubscriptionRegistry::new()),
            credentials: config.credentials.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        });
        let runtime = build_runtime(ctx.clone(), config.thread_count)?;

        Ok(Self {
            ctx,
            runtime,
            closed: AtomicBool::new(false),
        })
    }

    pub fn runtime_kind(&self) -> RuntimeKind {
        self.runtime.kind()
    }

    /// Subscribe to a topic
    ///
    /// The first connection attempt happens before this returns.
    ///
    /// # Errors
    /// - `Configuration`: invalid request values or the client is shut down
    /// - `DuplicateSubscription`: topic active and `resub` not set
    /// - `Connection`: first attempt failed and `resub` not set
    /// - `SiteExhaustion`: no site left to retry
    #[instrument(
        name = "streaming_client_subscribe",
        skip(self, request),
        fields(topic = %request.topic())
    )]
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<(), StreamError> {
        let topic = request.topic();
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::configuration(
                topic.to_string(),
                "streaming client is shut down",
            ));
        }
        request.validate()?;

        let worker = self.runtime.assign();
        let entry = Arc::new(SubscriptionEntry::new(
            self.ctx.registry.next_id(),
            topic.clone(),
            worker,
        ));
        if let Some(previous) = self.ctx.registry.register(entry.clone(), request.resub)? {
            info!(topic = %topic, "replacing existing subscription");
            previous.release(false);
            self.runtime.wake(previous.worker());
        }

        let resub = request.resub;
        let mut task = self.build_task(&entry, request);
        let site = task.current_site().clone();

        if let Err(e) = task.connect_initial(&self.ctx) {
            if !resub {
                task.finish(&self.ctx);
                return Err(e.into_stream_error(&site));
            }
            warn!(topic = %topic, site = %site, error = %e, "initial connection failed, retrying in background");
            task.record_failure(Instant::now());
            if task.is_failed() {
                task.finish(&self.ctx);
                return Err(StreamError::SiteExhaustion {
                    topic: topic.to_string(),
                });
            }
        }

        self.runtime.attach(worker, task)?;
        observability::set_active_subscriptions(self.ctx.registry.len());
        debug!(topic = %topic, worker, "subscription handed to delivery worker");
        Ok(())
    }

    fn build_task(&self, entry: &Arc<SubscriptionEntry>, request: SubscribeRequest) -> TopicTask {
        let primary = request.primary_site();
        let SubscribeRequest {
            offset,
            filter,
            msg_as_table,
            batch_size,
            throttle,
            backup_sites,
            resubscribe_interval,
            sub_once,
            deserializer,
            handler,
            ..
        } = request;

        let dispatcher = TopicDispatcher::new(
            entry.topic_str().clone(),
            handler,
            entry.metrics().clone(),
            entry.gate(),
        );
        let pipeline = TopicPipeline::new(
            dispatcher,
            entry.metrics().clone(),
            msg_as_table,
            batch_size,
            throttle,
            deserializer,
        );
        let failover = FailoverState::new(primary, backup_sites, sub_once, resubscribe_interval);
        TopicTask::new(entry.clone(), filter, failover, pipeline, offset)
    }

    /// Cancel a subscription; unknown topics are ignored
    ///
    /// Returns without waiting. No handler call for the topic is admitted
    /// after this returns; one admitted earlier is allowed to finish.
    pub fn unsubscribe(&self, host: &str, port: u16, table: &str, action: &str) {
        self.unsubscribe_topic(&Topic::new(host, port, table, action));
    }

    #[instrument(name = "streaming_client_unsubscribe", skip(self), fields(topic = %topic))]
    pub fn unsubscribe_topic(&self, topic: &Topic) {
        match self.ctx.registry.unregister(topic) {
            Some(entry) => {
                let in_flight = entry.release(true);
                self.runtime.wake(entry.worker());
                observability::set_active_subscriptions(self.ctx.registry.len());
                info!(topic = %topic, in_flight, "unsubscribed");
            }
            None => debug!(topic = %topic, "unsubscribe of unknown topic ignored"),
        }
    }

    /// Active topics formatted `host/port/table/action`
    pub fn subscription_topics(&self) -> Vec<String> {
        self.ctx.registry.list_topics()
    }

    pub fn subscription_status(&self, topic: &Topic) -> Option<SubscriptionStatus> {
        self.ctx.registry.get(topic).map(|e| e.status())
    }

    pub fn topic_metrics(&self, topic: &Topic) -> Option<TopicMetricsSnapshot> {
        self.ctx.registry.get(topic).map(|e| e.metrics().snapshot())
    }

    /// Stop all workers, close connections and clear the registry
    ///
    /// Idempotent. Blocks until in-flight handler calls complete.
    #[instrument(name = "streaming_client_shutdown", skip(self))]
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.runtime.shutdown();
        observability::set_active_subscriptions(self.ctx.registry.len());
        info!(remaining = self.ctx.registry.len(), "streaming client shut down");
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
