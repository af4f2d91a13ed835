//! Delivery runtimes
//!
//! Two variants behind one interface, chosen once by thread count:
//! - `SingleThreadRuntime`: one worker serves every topic of the client
//! - `PooledRuntime`: N workers, topics assigned round-robin at subscribe time
//!
//! Both run the same per-topic pipeline; only thread ownership differs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use contracts::StreamError;
use tracing::{debug, info};

use crate::worker::{TopicTask, WorkerContext, WorkerHandle};

/// Which runtime variant a client uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    SingleThreaded,
    Pooled { threads: usize },
}

/// Thread ownership policy for subscriptions
pub trait DeliveryRuntime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Worker that will own the next new topic
    fn assign(&self) -> usize;

    /// Hand a task to worker `worker`
    fn attach(&self, worker: usize, task: TopicTask) -> Result<(), StreamError>;

    /// Wake worker `worker` so it notices released topics
    fn wake(&self, worker: usize);

    /// Stop every worker and wait for in-flight handlers
    fn shutdown(&self);
}

/// One receiver thread for all topics
pub struct SingleThreadRuntime {
    worker: WorkerHandle,
}

impl SingleThreadRuntime {
    pub(crate) fn new(ctx: Arc<WorkerContext>) -> Result<Self, StreamError> {
        Ok(Self {
            worker: WorkerHandle::spawn(0, ctx)?,
        })
    }
}

impl DeliveryRuntime for SingleThreadRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::SingleThreaded
    }

    fn assign(&self) -> usize {
        0
    }

    fn attach(&self, _worker: usize, task: TopicTask) -> Result<(), StreamError> {
        self.worker.attach(task)
    }

    fn wake(&self, _worker: usize) {
        self.worker.wake();
    }

    fn shutdown(&self) {
        self.worker.request_stop();
        self.worker.join();
    }
}

/// N independent receiver threads
pub struct PooledRuntime {
    workers: Vec<WorkerHandle>,
    next: AtomicUsize,
}

impl PooledRuntime {
    pub(crate) fn new(ctx: Arc<WorkerContext>, threads: usize) -> Result<Self, StreamError> {
        let workers = (0..threads.max(1))
            .map(|i| WorkerHandle::spawn(i, ctx.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    fn worker(&self, index: usize) -> &WorkerHandle {
        &self.workers[index % self.workers.len()]
    }
}

impl DeliveryRuntime for PooledRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Pooled {
            threads: self.workers.len(),
        }
    }

    fn assign(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    fn attach(&self, worker: usize, task: TopicTask) -> Result<(), StreamError> {
        let handle = self.worker(worker);
        debug!(worker = handle.index(), "assigning topic to pooled worker");
        handle.attach(task)
    }

    fn wake(&self, worker: usize) {
        self.worker(worker).wake();
    }

    fn shutdown(&self) {
        // Signal all first so workers wind down in parallel
        for worker in &self.workers {
            worker.request_stop();
        }
        for worker in &self.workers {
            worker.join();
        }
    }
}

/// Build the runtime variant for `thread_count`
pub(crate) fn build_runtime(
    ctx: Arc<WorkerContext>,
    thread_count: usize,
) -> Result<Box<dyn DeliveryRuntime>, StreamError> {
    let runtime: Box<dyn DeliveryRuntime> = if thread_count <= 1 {
        Box::new(SingleThreadRuntime::new(ctx)?)
    } else {
        Box::new(PooledRuntime::new(ctx, thread_count)?)
    };
    info!(kind = ?runtime.kind(), "delivery runtime started");
    Ok(runtime)
}
