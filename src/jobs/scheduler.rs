use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

/// A task run on a fixed interval for the life of the process.
#[async_trait]
pub trait RecurringJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn run(&self) -> anyhow::Result<()>;
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Runs registered [`RecurringJob`]s, one tokio task per job.
///
/// `start` is idempotent: a second call while running spawns nothing.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn RecurringJob>>,
    running: Mutex<Option<Running>>,
    metrics: Metrics,
}

impl JobScheduler {
    pub fn new(metrics: Metrics) -> Self {
        Self { jobs: Vec::new(), running: Mutex::new(None), metrics }
    }

    pub fn register(&mut self, job: Arc<dyn RecurringJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Spawns one timer task per job. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let handles = self
            .jobs
            .iter()
            .map(|job| spawn_job(job.clone(), cancel.child_token(), self.metrics.clone()))
            .collect();
        *running = Some(Running { cancel, handles });
        tracing::info!(jobs = ?self.job_names(), "Job scheduler started");
        true
    }

    /// Number of live timer tasks.
    pub fn running_jobs(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Cancels all timers and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(running) = running {
            running.cancel.cancel();
            for result in futures::future::join_all(running.handles).await {
                if let Err(e) = result {
                    tracing::warn!("Recurring job task ended abnormally: {}", e);
                }
            }
            tracing::info!("Job scheduler stopped");
        }
    }
}

fn spawn_job(job: Arc<dyn RecurringJob>, cancel: CancellationToken, metrics: Metrics) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(job.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; jobs first run one interval after start.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match job.run().await {
                        Ok(()) => metrics.inc_jobs_run(),
                        Err(e) => tracing::warn!(job = job.name(), "Recurring job failed: {:#}", e),
                    }
                }
            }
        }
    })
}
