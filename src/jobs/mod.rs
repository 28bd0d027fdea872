//! Background work: recurring jobs and the in-process work queue.
//!
//! Both are started by the startup sequencer before the listener binds and
//! stopped during graceful shutdown.

mod queue;
mod scheduler;

use std::time::Duration;

use async_trait::async_trait;

use crate::metrics::Metrics;
use crate::middleware::RateLimiter;

pub use queue::{JobHandler, QueueError, QueuedJob, WorkQueue};
pub use scheduler::{JobScheduler, RecurringJob};

/// Job kind enqueued by `POST /api/basic`.
pub const ECHO_JOB_KIND: &str = "basic.echo";

/// Drops rate-limiter entries for clients that went quiet.
pub struct RateLimitCleanupJob {
    limiter: RateLimiter,
    interval: Duration,
}

impl RateLimitCleanupJob {
    pub fn new(limiter: RateLimiter, interval: Duration) -> Self {
        Self { limiter, interval }
    }
}

#[async_trait]
impl RecurringJob for RateLimitCleanupJob {
    fn name(&self) -> &'static str {
        "rate-limit-cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let before = self.limiter.tracked_clients().await;
        self.limiter.cleanup_old_entries().await;
        let after = self.limiter.tracked_clients().await;
        tracing::debug!("Rate limiter cleanup: {} -> {} tracked clients", before, after);
        Ok(())
    }
}

/// Logs a snapshot of the request counters.
pub struct MetricsReportJob {
    metrics: Metrics,
    interval: Duration,
}

impl MetricsReportJob {
    pub fn new(metrics: Metrics, interval: Duration) -> Self {
        Self { metrics, interval }
    }
}

#[async_trait]
impl RecurringJob for MetricsReportJob {
    fn name(&self) -> &'static str {
        "metrics-report"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let s = self.metrics.get_snapshot();
        tracing::info!(
            requests = s.requests,
            failures = s.failures,
            unhandled = s.unhandled,
            rate_limited = s.rate_limited,
            not_found = s.not_found,
            queue_processed = s.queue_processed,
            uptime_seconds = s.uptime_seconds,
            "Metrics report"
        );
        Ok(())
    }
}

/// Handler for [`ECHO_JOB_KIND`]: records the echoed payload in the log.
pub struct LogJobHandler;

#[async_trait]
impl JobHandler for LogJobHandler {
    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()> {
        let latency_ms = (chrono::Utc::now() - job.enqueued_at).num_milliseconds();
        tracing::info!(job_id = %job.id, kind = %job.kind, latency_ms, payload = %job.payload, "Processed queued job");
        Ok(())
    }
}
