//! Ordered request pipeline.
//!
//! A [`Pipeline`] is a fixed sequence of [`Stage`]s followed by exactly one
//! [`ErrorTranslator`]. For every request the stages run strictly in
//! registration order; the first stage that responds or fails ends the walk.
//! Failures are converted to a response by the translator and nowhere else.
//!
//! Pipelines are only constructed through [`PipelineBuilder`], which rejects
//! orderings that would let a request bypass the rate limiter, the unknown
//! route fallback or the error translator.

mod builder;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderName,
    response::Response,
    Router,
};
use futures::FutureExt;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::errors::ErrorTranslator;

pub use builder::{validate_order, PipelineBuilder, PipelineError};

/// What a stage wants to happen next.
pub enum Flow {
    /// Hand the request to the next stage.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
}

/// Role of a stage, used to validate ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    SecurityHeaders,
    BodyDecoder,
    Cookies,
    Cors,
    ClientIp,
    Trim,
    StaticAssets,
    RateLimit,
    Routes,
    UnknownRoute,
    ErrorTranslation,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::SecurityHeaders => "security-headers",
            StageKind::BodyDecoder => "body-decoder",
            StageKind::Cookies => "cookies",
            StageKind::Cors => "cors",
            StageKind::ClientIp => "client-ip",
            StageKind::Trim => "trim",
            StageKind::StaticAssets => "static-assets",
            StageKind::RateLimit => "rate-limit",
            StageKind::Routes => "routes",
            StageKind::UnknownRoute => "unknown-route",
            StageKind::ErrorTranslation => "error-translation",
        };
        f.write_str(name)
    }
}

/// One unit of request processing.
///
/// A stage receives the request context and either continues, answers the
/// request itself, or fails. It must not build error responses on its own;
/// returning `Err` hands the failure to the error translator.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow>;
}

/// An immutable, validated stage sequence.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    translator: Arc<ErrorTranslator>,
    metrics: Metrics,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Stage kinds in execution order, terminal error stage included.
    pub fn kinds(&self) -> Vec<StageKind> {
        let mut kinds: Vec<StageKind> = self.stages.iter().map(|s| s.kind()).collect();
        kinds.push(StageKind::ErrorTranslation);
        kinds
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Runs one request through every stage and returns the response to send.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        self.metrics.inc_requests();
        let mut ctx = RequestContext::new(req);

        let mut res = match self.run_stages(&mut ctx).await {
            Ok(res) => res,
            Err(err) => {
                self.metrics.record_failure(&err);
                self.translator.translate(&err, &ctx)
            }
        };
        finish(&mut ctx, &mut res);
        res
    }

    async fn run_stages(&self, ctx: &mut RequestContext) -> AppResult<Response> {
        for stage in &self.stages {
            let outcome = AssertUnwindSafe(stage.process(ctx)).catch_unwind().await;
            match outcome {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Respond(res))) => {
                    tracing::trace!(stage = stage.name(), status = %res.status(), "stage answered request");
                    // Route handlers answering is the normal path
                    if stage.kind() != StageKind::Routes {
                        self.metrics.inc_short_circuits();
                    }
                    return Ok(res);
                }
                Ok(Err(err)) => {
                    tracing::debug!(stage = stage.name(), error = %err, "stage failed");
                    return Err(err);
                }
                Err(_) => {
                    tracing::error!(stage = stage.name(), "stage panicked");
                    return Err(AppError::internal(anyhow::anyhow!("stage {} panicked", stage.name())));
                }
            }
        }
        // Unreachable for validated pipelines: the unknown-route stage always fails.
        Err(AppError::internal(anyhow::anyhow!("pipeline produced no response")))
    }
}

/// Headers that reveal the server implementation.
pub(crate) const FINGERPRINT_HEADERS: [HeaderName; 2] =
    [HeaderName::from_static("x-powered-by"), axum::http::header::SERVER];

fn finish(ctx: &mut RequestContext, res: &mut Response) {
    let staged = std::mem::take(&mut ctx.response_headers);
    let headers = res.headers_mut();
    headers.extend(staged);
    for name in &ctx.strip_headers {
        headers.remove(name);
    }
}

/// Wraps the pipeline in an axum router so every request reaches [`Pipeline::handle`].
pub fn into_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new().fallback(dispatch).with_state(pipeline)
}

async fn dispatch(State(pipeline): State<Arc<Pipeline>>, req: Request) -> Response {
    pipeline.handle(req).await
}
