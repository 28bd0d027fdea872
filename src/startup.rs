//! Startup sequencer.
//!
//! Brings the process to a ready state in a fixed order: register the auth
//! strategy, start background work, then assemble the request pipeline. The
//! listener must only be bound once [`Startup::run`] has returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::Router;
use tokio::sync::OnceCell;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::auth::{AuthStrategy, AuthStrategyLoader, StaticTokenLoader};
use crate::config::AppConfig;
use crate::jobs::{
    JobHandler, JobScheduler, LogJobHandler, MetricsReportJob, RateLimitCleanupJob, RecurringJob, WorkQueue,
    ECHO_JOB_KIND,
};
use crate::metrics::Metrics;
use crate::middleware::{
    AllowList, BodyDecoderStage, ClientIpStage, CookieStage, CorsStage, ErrorReporter, ErrorTranslator,
    RateLimitStage, RateLimiter, RouteDispatchStage, SecurityHeadersStage, StaticAssetGate, Throttle, TracingReporter,
    TrimStage, TrustedProxies, UnknownRouteStage,
};
use crate::pipeline::{self, Pipeline};
use crate::routes;
use crate::state::AppState;

/// Everything needed to serve requests.
#[derive(Clone)]
pub struct Ready {
    pub pipeline: Arc<Pipeline>,
    pub state: AppState,
}

impl Ready {
    /// The transport router: every request goes through the pipeline.
    pub fn router(&self) -> Router {
        pipeline::into_router(self.pipeline.clone())
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
    }
}

pub struct Startup {
    config: Arc<AppConfig>,
    metrics: Metrics,
    limiter: RateLimiter,
    loader: Arc<dyn AuthStrategyLoader>,
    reporter: Arc<dyn ErrorReporter>,
    routes: Router<AppState>,
    scheduler: JobScheduler,
    queue: WorkQueue,
    auth: OnceCell<Arc<dyn AuthStrategy>>,
    ready: OnceCell<Ready>,
}

impl Startup {
    /// Sets up the default collaborators. Nothing is started yet.
    pub fn new(cfg: AppConfig) -> Self {
        let metrics = Metrics::new();
        let limiter = RateLimiter::new(cfg.rate_limit.max_requests, cfg.rate_limit.window_seconds);

        let mut scheduler = JobScheduler::new(metrics.clone());
        scheduler.register(Arc::new(RateLimitCleanupJob::new(
            limiter.clone(),
            Duration::from_secs(cfg.rate_limit.cleanup_interval_seconds),
        )));
        scheduler.register(Arc::new(MetricsReportJob::new(
            metrics.clone(),
            Duration::from_secs(cfg.jobs.metrics_report_interval_seconds),
        )));

        let mut queue = WorkQueue::new(cfg.queue.worker_count(), cfg.queue.capacity, metrics.clone());
        queue.register(ECHO_JOB_KIND, Arc::new(LogJobHandler));

        Self {
            config: Arc::new(cfg),
            metrics,
            limiter,
            loader: Arc::new(StaticTokenLoader),
            reporter: Arc::new(TracingReporter),
            routes: routes::api_routes(),
            scheduler,
            queue,
            auth: OnceCell::new(),
            ready: OnceCell::new(),
        }
    }

    /// Replaces the business route tables. Paths are relative to the API prefix.
    pub fn with_routes(mut self, routes: Router<AppState>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_auth_loader(mut self, loader: Arc<dyn AuthStrategyLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_job_handler(mut self, kind: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.queue.register(kind, handler);
        self
    }

    pub fn with_recurring_job(mut self, job: Arc<dyn RecurringJob>) -> Self {
        self.scheduler.register(job);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Runs the startup sequence once. Later calls, concurrent or not,
    /// return the same [`Ready`] without repeating any step.
    pub async fn run(&self) -> anyhow::Result<Ready> {
        let ready = self.ready.get_or_try_init(|| self.bootstrap()).await?;
        Ok(ready.clone())
    }

    async fn bootstrap(&self) -> anyhow::Result<Ready> {
        let started = Instant::now();

        let auth = self
            .auth
            .get_or_try_init(|| async {
                let strategy =
                    self.loader.load(&self.config.auth).await.context("failed to register auth strategy")?;
                tracing::info!(strategy = strategy.name(), "Auth strategy registered");
                Ok::<_, anyhow::Error>(strategy)
            })
            .await?
            .clone();

        if self.config.jobs.enabled {
            self.scheduler.start();
        } else {
            tracing::info!("Recurring jobs disabled");
        }
        self.queue.start();

        let state = AppState {
            config: self.config.clone(),
            auth,
            queue: self.queue.clone(),
            metrics: self.metrics.clone(),
        };
        let throttle: Arc<dyn Throttle> = Arc::new(self.limiter.clone());
        let pipeline = match standard_pipeline(
            &self.config,
            state.clone(),
            self.routes.clone(),
            throttle,
            self.reporter.clone(),
            self.metrics.clone(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.stop_background().await;
                return Err(e);
            }
        };

        let stages: Vec<String> = pipeline.kinds().iter().map(ToString::to_string).collect();
        tracing::info!(stages = %stages.join(" -> "), "Request pipeline ready");
        tracing::info!("Bootstrap completed in {:.2?}", started.elapsed());

        Ok(Ready { pipeline: Arc::new(pipeline), state })
    }

    /// Stops background work. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.stop_background().await;
    }

    async fn stop_background(&self) {
        self.scheduler.stop().await;
        self.queue.stop().await;
    }
}

/// Assembles the standard stage order around the given route tables.
pub fn standard_pipeline(
    cfg: &AppConfig,
    state: AppState,
    routes: Router<AppState>,
    throttle: Arc<dyn Throttle>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Metrics,
) -> anyhow::Result<Pipeline> {
    let prefix = cfg.server.api_prefix.as_str();
    // nest() rejects "/" as a prefix
    let api = if prefix == "/" { Router::new().merge(routes) } else { Router::new().nest(prefix, routes) };

    let trusted = TrustedProxies::parse(cfg.proxy.trusted.as_slice())?;

    let pipeline = Pipeline::builder()
        .stage(SecurityHeadersStage::new(cfg.security.as_ref()))
        .stage(BodyDecoderStage::new(cfg.server.body_limit_bytes))
        .stage(CookieStage)
        .stage(CorsStage::new().without_preflight_under(&cfg.static_assets.mount))
        .stage(ClientIpStage::new(trusted))
        .stage(TrimStage)
        .stage(StaticAssetGate::new(&cfg.static_assets.mount, &cfg.static_assets.dir, AllowList::default()))
        .stage(RateLimitStage::new(prefix, throttle))
        .stage(RouteDispatchStage::new(api.with_state(state)))
        .stage(UnknownRouteStage)
        .error_translation(ErrorTranslator::new(reporter))
        .metrics(metrics)
        .build()?;
    Ok(pipeline)
}
