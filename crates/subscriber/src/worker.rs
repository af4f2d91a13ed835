//! Delivery worker thread
//!
//! Each worker owns a set of topics and runs, per iteration:
//! commands -> released topics -> due reconnects -> receive -> throttle
//! flushes -> exhausted topics -> idle wait.
//!
//! Handlers run inline on this thread, so a slow handler delays every other
//! topic owned by the same worker. A panic in one topic's step tears down
//! that topic only; the worker keeps serving the rest.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TryRecvError};
use contracts::{
    Credentials, RawRowBatch, SiteAddr, StreamError, SubscriptionFilter, Topic, Value,
};
use native_core::{ConnectionHandle, CoreError, NativeCore, ReceiveOutcome, SubscribeParams};
use tracing::{debug, error, info, warn};

use crate::failover::{FailoverState, Transition};
use crate::pipeline::TopicPipeline;
use crate::registry::{SubscriptionEntry, SubscriptionRegistry};

/// Shortest receive wait per connection
const MIN_RECEIVE_SLICE: Duration = Duration::from_millis(1);

/// State shared by the client and all of its workers
pub(crate) struct WorkerContext {
    pub(crate) core: Arc<dyn NativeCore>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) credentials: Option<Credentials>,
    /// Upper bound of one receive round
    pub(crate) poll_interval: Duration,
}

/// Connect to `site` and subscribe to `topic`'s table from `offset`
///
/// # Returns
/// The open connection and the resolved first offset.
pub(crate) fn open_subscription(
    core: &dyn NativeCore,
    credentials: Option<&Credentials>,
    site: &SiteAddr,
    topic: &Topic,
    offset: i64,
    filter: Option<&[Value]>,
) -> Result<(ConnectionHandle, i64), CoreError> {
    let conn = core.connect(site, credentials)?;
    let params = SubscribeParams {
        table: topic.table(),
        action: topic.action(),
        offset,
        filter,
    };
    match core.send_subscribe_request(&conn, &params) {
        Ok(resolved) => Ok((conn, resolved)),
        Err(e) => {
            core.close(&conn);
            Err(e)
        }
    }
}

/// Everything a worker owns for one subscription
pub struct TopicTask {
    entry: Arc<SubscriptionEntry>,
    filter: Option<SubscriptionFilter>,
    failover: FailoverState,
    conn: Option<ConnectionHandle>,
    /// Offset to resume from; -1 until the server resolved one
    next_offset: i64,
    pipeline: TopicPipeline,
}

impl TopicTask {
    pub(crate) fn new(
        entry: Arc<SubscriptionEntry>,
        filter: Option<SubscriptionFilter>,
        failover: FailoverState,
        pipeline: TopicPipeline,
        offset: i64,
    ) -> Self {
        Self {
            entry,
            filter,
            failover,
            conn: None,
            next_offset: offset,
            pipeline,
        }
    }

    fn topic(&self) -> &Topic {
        self.entry.topic()
    }

    pub(crate) fn current_site(&self) -> &SiteAddr {
        self.failover.current_site()
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failover.state() == contracts::ConnectionState::Failed
    }

    fn publish_status(&self) {
        self.entry.set_status(
            self.failover.state(),
            self.failover.current_site(),
            self.failover.current_index(),
            self.failover.attempts(),
        );
    }

    /// First connection attempt, run on the subscribing thread
    pub(crate) fn connect_initial(&mut self, ctx: &WorkerContext) -> Result<(), CoreError> {
        self.failover.begin_connect();
        self.publish_status();

        let site = self.failover.current_site().clone();
        let (conn, resolved) = open_subscription(
            ctx.core.as_ref(),
            ctx.credentials.as_ref(),
            &site,
            self.entry.topic(),
            self.next_offset,
            self.filter.as_deref(),
        )?;
        self.attach_connection(ctx, conn, resolved);
        info!(topic = %self.topic(), site = %site, offset = resolved, "subscribed");
        Ok(())
    }

    /// Failed attempt outside the worker loop
    pub(crate) fn record_failure(&mut self, now: Instant) {
        let transition = self.failover.on_attempt_failed(now);
        self.apply(transition);
    }

    fn attach_connection(&mut self, ctx: &WorkerContext, conn: ConnectionHandle, resolved: i64) {
        self.next_offset = resolved;
        self.failover.on_subscribed();
        if self.pipeline.needs_schemas() {
            let core = &ctx.core;
            self.pipeline
                .resolve_schemas(|target| core.fetch_schema(&conn, target.namespace(), target.table()));
        }
        self.conn = Some(conn);
        self.publish_status();
    }

    fn try_reconnect(&mut self, ctx: &WorkerContext) {
        let site = self.failover.current_site().clone();
        let topic = self.entry.topic_str().clone();
        self.entry.metrics().inc_reconnect_attempts();

        match open_subscription(
            ctx.core.as_ref(),
            ctx.credentials.as_ref(),
            &site,
            self.entry.topic(),
            self.next_offset,
            self.filter.as_deref(),
        ) {
            Ok((conn, resolved)) => {
                observability::record_reconnect_attempt(&topic, &site.to_string(), true);
                self.attach_connection(ctx, conn, resolved);
                info!(topic = %topic, site = %site, offset = resolved, "resubscribed");
            }
            Err(e) => {
                observability::record_reconnect_attempt(&topic, &site.to_string(), false);
                warn!(topic = %topic, site = %site, error = %e, "reconnect failed");
                self.record_failure(Instant::now());
            }
        }
    }

    /// One bounded receive on the open connection, if any
    fn receive_round(&mut self, ctx: &WorkerContext, slice: Duration) {
        if !self.entry.is_active() {
            return;
        }
        let Some(conn) = self.conn.clone() else {
            return;
        };
        let wait = match self.pipeline.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(slice),
            None => slice,
        };
        match ctx.core.receive_next_batch(&conn, wait) {
            ReceiveOutcome::Batch(batch) => self.on_batch(batch),
            ReceiveOutcome::Idle => {}
            ReceiveOutcome::Disconnected => self.on_disconnect(ctx),
        }
    }

    fn on_batch(&mut self, batch: RawRowBatch) {
        self.next_offset = batch.next_offset();
        self.pipeline.ingest(batch, Instant::now());
    }

    fn on_disconnect(&mut self, ctx: &WorkerContext) {
        if let Some(conn) = self.conn.take() {
            ctx.core.close(&conn);
        }
        warn!(
            topic = %self.topic(),
            site = %self.failover.current_site(),
            next_offset = self.next_offset,
            "connection lost"
        );
        let transition = self.failover.on_disconnect(Instant::now());
        self.apply(transition);
    }

    fn apply(&mut self, transition: Transition) {
        let topic = self.entry.topic_str().clone();
        match transition {
            Transition::Retry { site } => {
                debug!(topic = %topic, site = %site, "retrying same site");
            }
            Transition::Switched { from, to } => {
                self.entry.metrics().inc_site_switches();
                observability::record_site_switch(&topic, &from.to_string(), &to.to_string());
                info!(topic = %topic, from = %from, to = %to, "failing over to next site");
            }
            Transition::Exhausted => {
                let err = StreamError::SiteExhaustion {
                    topic: topic.to_string(),
                };
                observability::record_subscription_exhausted(&topic);
                error!(topic = %topic, error = %err, "subscription failed");
            }
        }
        self.publish_status();
    }

    /// Tear down and drop the registry entry if it is still ours
    pub(crate) fn finish(mut self, ctx: &WorkerContext) {
        let notify_server = self.entry.should_notify_server();
        if let Some(conn) = self.conn.take() {
            if notify_server {
                let topic = self.entry.topic();
                if let Err(e) =
                    ctx.core
                        .send_unsubscribe_request(conn.site(), topic.table(), topic.action())
                {
                    warn!(topic = %topic, error = %e, "unsubscribe request failed");
                }
            }
            ctx.core.close(&conn);
        }
        if !self.failover.state().is_terminal() {
            self.failover.mark_unsubscribed();
        }
        self.publish_status();
        self.entry.release(notify_server);
        ctx.registry
            .unregister_entry(self.entry.topic(), self.entry.id());
        observability::set_active_subscriptions(ctx.registry.len());
        debug!(
            topic = %self.entry.topic(),
            state = %self.failover.state(),
            buffered = self.pipeline.buffered(),
            "subscription finished"
        );
    }

    fn wake_at(&self) -> Option<Instant> {
        match (self.failover.next_attempt(), self.pipeline.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

pub(crate) enum WorkerCommand {
    Attach(Box<TopicTask>),
    Stop,
}

/// Handle to one delivery thread
pub(crate) struct WorkerHandle {
    index: usize,
    tx: Sender<WorkerCommand>,
    thread: Thread,
    join: Mutex<Option<JoinHandle<()>>>,
    ctx: Arc<WorkerContext>,
}

impl WorkerHandle {
    pub(crate) fn spawn(index: usize, ctx: Arc<WorkerContext>) -> Result<Self, StreamError> {
        let (tx, rx) = async_channel::unbounded();
        let worker_ctx = ctx.clone();
        let join = thread::Builder::new()
            .name(format!("stream-sub-worker-{index}"))
            .spawn(move || run(index, worker_ctx, rx))?;

        Ok(Self {
            index,
            tx,
            thread: join.thread().clone(),
            join: Mutex::new(Some(join)),
            ctx,
        })
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Hand a task to this worker
    ///
    /// If the worker has already stopped the task is finished in place.
    pub(crate) fn attach(&self, task: TopicTask) -> Result<(), StreamError> {
        match self.tx.try_send(WorkerCommand::Attach(Box::new(task))) {
            Ok(()) => {
                self.thread.unpark();
                Ok(())
            }
            Err(e) => {
                let topic = match e.into_inner() {
                    WorkerCommand::Attach(task) => {
                        let topic = task.entry.topic_str().to_string();
                        task.finish(&self.ctx);
                        topic
                    }
                    WorkerCommand::Stop => String::new(),
                };
                Err(StreamError::configuration(topic, "delivery worker is stopped"))
            }
        }
    }

    pub(crate) fn wake(&self) {
        self.thread.unpark();
    }

    /// Ask the thread to stop without waiting
    pub(crate) fn request_stop(&self) {
        let _ = self.tx.try_send(WorkerCommand::Stop);
        self.thread.unpark();
    }

    /// Wait for the thread; in-flight handler calls complete first
    pub(crate) fn join(&self) {
        // Joining ourselves would deadlock (client dropped inside a handler)
        if thread::current().id() == self.thread.id() {
            return;
        }
        let handle = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker = self.index, "delivery worker panicked");
            }
        }
    }
}

fn run(index: usize, ctx: Arc<WorkerContext>, rx: Receiver<WorkerCommand>) {
    info!(worker = index, "delivery worker started");
    let mut tasks: Vec<TopicTask> = Vec::new();

    'outer: loop {
        // 1. commands
        loop {
            match rx.try_recv() {
                Ok(WorkerCommand::Attach(task)) => {
                    debug!(worker = index, topic = %task.topic(), "topic attached");
                    tasks.push(*task);
                }
                Ok(WorkerCommand::Stop) | Err(TryRecvError::Closed) => break 'outer,
                Err(TryRecvError::Empty) => break,
            }
        }

        // 2. released by unsubscribe or replaced by resubscription
        let mut i = 0;
        while i < tasks.len() {
            if tasks[i].entry.is_active() {
                i += 1;
            } else {
                teardown(tasks.remove(i), &ctx, index);
            }
        }

        // 3. reconnects that are due
        let now = Instant::now();
        run_guarded(&mut tasks, &ctx, index, |task, ctx| {
            if task.failover.is_due(now) {
                task.try_reconnect(ctx);
            }
        });

        // 4. receive round over open connections
        let connected = tasks.iter().filter(|t| t.conn.is_some()).count();
        if connected > 0 {
            let slice = (ctx.poll_interval / connected as u32).max(MIN_RECEIVE_SLICE);
            run_guarded(&mut tasks, &ctx, index, |task, ctx| {
                task.receive_round(ctx, slice)
            });
        }

        // 5. throttle flushes
        let now = Instant::now();
        run_guarded(&mut tasks, &ctx, index, |task, _| {
            task.pipeline.flush_expired(now)
        });

        // 6. exhausted under sub_once
        let mut i = 0;
        while i < tasks.len() {
            if tasks[i].is_failed() {
                teardown(tasks.remove(i), &ctx, index);
            } else {
                i += 1;
            }
        }

        // 7. nothing to receive on: sleep until the next timer or command
        if connected == 0 {
            let wait = tasks
                .iter()
                .filter_map(TopicTask::wake_at)
                .min()
                .map_or(ctx.poll_interval, |at| {
                    at.saturating_duration_since(Instant::now())
                        .min(ctx.poll_interval)
                });
            thread::park_timeout(wait);
        }
    }

    // Tasks attached after the stop request are torn down as well
    while let Ok(cmd) = rx.try_recv() {
        if let WorkerCommand::Attach(task) = cmd {
            tasks.push(*task);
        }
    }
    let count = tasks.len();
    for task in tasks {
        teardown(task, &ctx, index);
    }
    info!(worker = index, topics = count, "delivery worker stopped");
}

/// Run one step over every task
///
/// A task whose step panics is removed and torn down; the others continue.
fn run_guarded(
    tasks: &mut Vec<TopicTask>,
    ctx: &WorkerContext,
    worker: usize,
    mut step: impl FnMut(&mut TopicTask, &WorkerContext),
) {
    let mut i = 0;
    while i < tasks.len() {
        let task = &mut tasks[i];
        match panic::catch_unwind(AssertUnwindSafe(|| step(task, ctx))) {
            Ok(()) => i += 1,
            Err(payload) => {
                let task = tasks.remove(i);
                error!(
                    worker,
                    topic = %task.topic(),
                    panic = delivery::panic_message(payload.as_ref()),
                    "topic task panicked, tearing it down"
                );
                teardown(task, ctx, worker);
            }
        }
    }
}

/// `finish` a task; if that panics too, still drop its registry entry
fn teardown(task: TopicTask, ctx: &WorkerContext, worker: usize) {
    let entry = task.entry.clone();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.finish(ctx))) {
        entry.release(false);
        ctx.registry.unregister_entry(entry.topic(), entry.id());
        observability::set_active_subscriptions(ctx.registry.len());
        error!(
            worker,
            topic = %entry.topic(),
            panic = delivery::panic_message(payload.as_ref()),
            "topic teardown panicked"
        );
    }
}
