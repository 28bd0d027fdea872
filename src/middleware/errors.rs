//! Error translation stage.
//!
//! The single place where an [`AppError`] becomes an HTTP response. Known
//! failure kinds map to fixed status codes; unrecognized failures become a
//! generic 500 and are forwarded to an [`ErrorReporter`] first.
//!
//! Response body:
//!
//! ```json
//! { "message": "...", "code": "ROUTE_NOT_FOUND", "status": 404,
//!   "timestamp": "...", "method": "GET", "path": "/api/x" }
//! ```

use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{AppError, FailureKind};

/// What the observability sink learns about an unrecognized failure.
#[derive(Debug)]
pub struct FailureReport<'a> {
    pub error_id: Uuid,
    pub method: &'a str,
    pub path: &'a str,
    pub client_ip: IpAddr,
    pub error: &'a AppError,
}

/// Receives unrecognized failures before the generic response is sent.
///
/// Called on the request path; implementations must not block.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &FailureReport<'_>);
}

/// Default sink: structured `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: &FailureReport<'_>) {
        tracing::error!(
            error_id = %report.error_id,
            method = report.method,
            path = report.path,
            client = %report.client_ip,
            "Unhandled error: {:?}",
            report.error
        );
    }
}

pub struct ErrorTranslator {
    reporter: Arc<dyn ErrorReporter>,
}

impl ErrorTranslator {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { reporter }
    }

    /// Converts a failure into a response. Never panics: if rendering fails,
    /// a bare 500 is returned instead.
    pub fn translate(&self, err: &AppError, ctx: &RequestContext) -> Response {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.render(err, ctx))) {
            Ok(res) => res,
            Err(_) => {
                tracing::error!("error translation panicked; sending fallback response");
                fallback_response()
            }
        }
    }

    fn render(&self, err: &AppError, ctx: &RequestContext) -> Response {
        let status = err.status();
        let error_id = match err.kind() {
            FailureKind::Unhandled => {
                let error_id = Uuid::new_v4();
                self.reporter.report(&FailureReport {
                    error_id,
                    method: ctx.method().as_str(),
                    path: ctx.path(),
                    client_ip: ctx.client_ip,
                    error: err,
                });
                Some(error_id)
            }
            FailureKind::Auth | FailureKind::RateLimit => {
                tracing::info!(method = %ctx.method(), path = ctx.path(), client = %ctx.client_ip, "{}", err);
                None
            }
            FailureKind::Validation | FailureKind::NotFound => {
                tracing::debug!(method = %ctx.method(), path = ctx.path(), "{}", err);
                None
            }
        };

        let (message, details) = err.public_parts();
        let mut body = json!({
            "message": message,
            "code": err.code(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let (Some(Value::Object(extra)), Some(obj)) = (details, body.as_object_mut()) {
            obj.extend(extra);
        }
        if let Some(id) = error_id {
            body["error_id"] = Value::String(id.to_string());
        }

        let mut res = (status, Json(body)).into_response();
        if let AppError::RateLimited { retry_after_seconds } = err {
            res.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
        }
        res
    }
}

fn fallback_response() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
