use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::Metrics;

/// A unit of background work.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Processes jobs of one kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()>;
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is not running")]
    NotRunning,
    #[error("work queue is full")]
    Full,
}

struct Running {
    sender: mpsc::Sender<QueuedJob>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Bounded in-process work queue served by a fixed pool of workers.
///
/// Cloning is cheap; all clones share the same channel and workers. Handlers
/// are registered before `start` and fixed afterwards.
#[derive(Clone)]
pub struct WorkQueue {
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
    workers: usize,
    capacity: usize,
    metrics: Metrics,
    running: Arc<Mutex<Option<Running>>>,
}

impl WorkQueue {
    pub fn new(workers: usize, capacity: usize, metrics: Metrics) -> Self {
        Self {
            handlers: Arc::new(HashMap::new()),
            workers: workers.max(1),
            capacity: capacity.max(1),
            metrics,
            running: Arc::new(Mutex::new(None)),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        Arc::make_mut(&mut self.handlers).insert(kind.into(), handler);
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Spawns the worker pool. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return false;
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let handles = (0..self.workers)
            .map(|worker| {
                let receiver = receiver.clone();
                let cancel = cancel.child_token();
                let handlers = self.handlers.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(async move {
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => None,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        let Some(job) = next else { break };
                        process(worker, &handlers, &job).await;
                        metrics.inc_queue_processed();
                    }
                })
            })
            .collect();

        *running = Some(Running { sender, cancel, handles });
        tracing::info!(workers = self.workers, capacity = self.capacity, "Work queue started");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn running_workers(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Queues a job without waiting. Fails when stopped or at capacity.
    pub fn enqueue(&self, kind: impl Into<String>, payload: Value) -> Result<Uuid, QueueError> {
        let sender = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.sender.clone())
            .ok_or(QueueError::NotRunning)?;

        let job = QueuedJob { id: Uuid::new_v4(), kind: kind.into(), payload, enqueued_at: Utc::now() };
        let id = job.id;
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::NotRunning,
        })?;
        Ok(id)
    }

    /// Stops accepting jobs and waits for workers. A job already being
    /// processed runs to completion; queued jobs are dropped.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(Running { sender, cancel, handles }) = running {
            drop(sender);
            cancel.cancel();
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    tracing::warn!("Queue worker ended abnormally: {}", e);
                }
            }
            tracing::info!("Work queue stopped");
        }
    }
}

async fn process(worker: usize, handlers: &HashMap<String, Arc<dyn JobHandler>>, job: &QueuedJob) {
    let Some(handler) = handlers.get(&job.kind) else {
        tracing::warn!(worker, job_id = %job.id, kind = %job.kind, "No handler registered for job kind; dropping");
        return;
    };
    match handler.handle(job).await {
        Ok(()) => tracing::debug!(worker, job_id = %job.id, kind = %job.kind, "Job processed"),
        Err(e) => tracing::error!(worker, job_id = %job.id, kind = %job.kind, "Job failed: {:#}", e),
    }
}
