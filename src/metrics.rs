use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{AppError, FailureKind};

/// Request and background-work counters
#[derive(Clone)]
pub struct Metrics {
    pub requests: Arc<AtomicU64>,
    pub short_circuits: Arc<AtomicU64>,
    pub failures: Arc<AtomicU64>,
    pub unhandled: Arc<AtomicU64>,
    pub rate_limited: Arc<AtomicU64>,
    pub not_found: Arc<AtomicU64>,
    pub jobs_run: Arc<AtomicU64>,
    pub queue_processed: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(AtomicU64::new(0)),
            short_circuits: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            unhandled: Arc::new(AtomicU64::new(0)),
            rate_limited: Arc::new(AtomicU64::new(0)),
            not_found: Arc::new(AtomicU64::new(0)),
            jobs_run: Arc::new(AtomicU64::new(0)),
            queue_processed: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_short_circuits(&self) {
        self.short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &AppError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        match err.kind() {
            FailureKind::Unhandled => self.unhandled.fetch_add(1, Ordering::Relaxed),
            FailureKind::RateLimit => self.rate_limited.fetch_add(1, Ordering::Relaxed),
            FailureKind::NotFound => self.not_found.fetch_add(1, Ordering::Relaxed),
            FailureKind::Validation | FailureKind::Auth => 0,
        };
    }

    pub fn inc_jobs_run(&self) {
        self.jobs_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_queue_processed(&self) {
        self.queue_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            jobs_run: self.jobs_run.load(Ordering::Relaxed),
            queue_processed: self.queue_processed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub short_circuits: u64,
    pub failures: u64,
    pub unhandled: u64,
    pub rate_limited: u64,
    pub not_found: u64,
    pub jobs_run: u64,
    pub queue_processed: u64,
    pub uptime_seconds: u64,
}
