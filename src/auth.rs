//! Authentication strategy.
//!
//! A strategy is registered once during startup and then shared read-only by
//! every request. Protected handlers opt in through the [`Authenticated`]
//! extractor.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use serde::Serialize;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Who a verified credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub strategy: &'static str,
}

/// Verifies a bearer token.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn verify(&self, token: &str) -> AppResult<Identity>;
}

/// Produces the process-wide strategy during startup. May perform I/O.
#[async_trait]
pub trait AuthStrategyLoader: Send + Sync {
    async fn load(&self, cfg: &AuthConfig) -> anyhow::Result<Arc<dyn AuthStrategy>>;
}

const DEFAULT_SUBJECT: &str = "api-client";

/// Accepts a fixed set of opaque tokens.
///
/// Entries are either `token` or `subject:token`.
pub struct StaticTokenStrategy {
    credentials: Vec<(String, Vec<u8>)>,
}

impl StaticTokenStrategy {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credentials = entries
            .into_iter()
            .filter_map(|entry| {
                let entry = entry.as_ref().trim();
                if entry.is_empty() || entry.starts_with('#') {
                    return None;
                }
                let (subject, token) = match entry.split_once(':') {
                    Some((subject, token)) if !subject.is_empty() => (subject, token),
                    _ => (DEFAULT_SUBJECT, entry),
                };
                Some((subject.to_string(), token.as_bytes().to_vec()))
            })
            .collect();
        Self { credentials }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[async_trait]
impl AuthStrategy for StaticTokenStrategy {
    fn name(&self) -> &'static str {
        "static-token"
    }

    async fn verify(&self, token: &str) -> AppResult<Identity> {
        // Check every credential so timing does not reveal which one matched
        let mut matched = None;
        for (subject, expected) in &self.credentials {
            if constant_time_eq(token.as_bytes(), expected) && matched.is_none() {
                matched = Some(subject);
            }
        }
        matched
            .map(|subject| Identity { subject: subject.clone(), strategy: self.name() })
            .ok_or_else(|| AppError::Unauthorized("Invalid bearer token".to_string()))
    }
}

/// Loads [`StaticTokenStrategy`] from configured tokens plus an optional token file.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticTokenLoader;

async fn read_token_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read auth.token_file {}: {}", path.display(), e))?;
    Ok(content.lines().map(str::to_string).collect())
}

#[async_trait]
impl AuthStrategyLoader for StaticTokenLoader {
    async fn load(&self, cfg: &AuthConfig) -> anyhow::Result<Arc<dyn AuthStrategy>> {
        let mut entries = cfg.tokens.clone();
        if let Some(path) = &cfg.token_file {
            entries.extend(read_token_file(path).await?);
        }
        let strategy = StaticTokenStrategy::new(entries);
        tracing::info!("Loaded {} API token(s)", strategy.len());
        Ok(Arc::new(strategy))
    }
}

/// Extractor for handlers that require a verified bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Malformed authorization header".to_string()))?;
        state.auth.verify(token).await.map(Authenticated)
    }
}
