use std::error::Error;
use std::fmt;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};

/// The primary error type for the application.
///
/// Every stage and every business handler signals failure with an `AppError`.
/// Only the error translation stage turns one into a client-visible response.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Anything unexpected. Never shown to clients.
    Internal(Arc<anyhow::Error>),
    /// For client errors due to malformed requests.
    BadRequest(String),
    /// For when a specific field in a request fails validation.
    Validation {
        /// The name of the field that failed validation.
        field: String,
        /// A message describing the validation error.
        message: String,
    },
    /// The request body exceeds the configured limit.
    PayloadTooLarge {
        /// Maximum accepted body size in bytes.
        limit: usize,
    },
    /// No mounted route claimed the request.
    RouteNotFound {
        method: String,
        path: String,
    },
    /// Missing or invalid credential.
    Unauthorized(String),
    /// Valid credential without the required permission.
    Forbidden(String),
    /// For when a client has sent too many requests in a given amount of time.
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
}

/// Coarse failure taxonomy used for status mapping and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    NotFound,
    Auth,
    RateLimit,
    Unhandled,
}

impl AppError {
    pub fn internal<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        AppError::Internal(Arc::new(err.into()))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::BadRequest(_) | AppError::Validation { .. } | AppError::PayloadTooLarge { .. } => {
                FailureKind::Validation
            }
            AppError::RouteNotFound { .. } => FailureKind::NotFound,
            AppError::Unauthorized(_) | AppError::Forbidden(_) => FailureKind::Auth,
            AppError::RateLimited { .. } => FailureKind::RateLimit,
            AppError::Internal(_) => FailureKind::Unhandled,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::RateLimited { .. } => "RATE_LIMITED",
        }
    }

    /// Client-facing message and optional extra fields.
    ///
    /// `Internal` deliberately yields a generic message without the inner error.
    pub fn public_parts(&self) -> (String, Option<Value>) {
        match self {
            AppError::Internal(_) => ("An internal server error occurred".to_string(), None),
            AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::Validation { field, message } => (
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "reason": message })),
            ),
            AppError::PayloadTooLarge { limit } => (
                format!("Request body exceeds maximum size of {} bytes", limit),
                Some(json!({ "limit_bytes": limit })),
            ),
            AppError::RouteNotFound { method, path } => (
                format!("Cannot {} {}", method, path),
                Some(json!({ "method": method, "path": path })),
            ),
            AppError::Unauthorized(msg) => (msg.clone(), None),
            AppError::Forbidden(msg) => (msg.clone(), None),
            AppError::RateLimited { retry_after_seconds } => (
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Validation { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
            AppError::PayloadTooLarge { limit } => write!(f, "Payload too large (limit {} bytes)", limit),
            AppError::RouteNotFound { method, path } => write!(f, "No route for {} {}", method, path),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(&***e),
            _ => None,
        }
    }
}

/// Response extension carrying a failure raised inside a business handler.
///
/// The route dispatch stage takes it out of the response and hands it to the
/// error translation stage, so the handler's response itself is never sent.
#[derive(Debug, Clone)]
pub struct RaisedFailure(pub AppError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut res = self.status().into_response();
        res.extensions_mut().insert(RaisedFailure(self));
        res
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(Arc::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal(err)
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;
