//! # Gatehouse
//!
//! Bootstrap and request pipeline for a JSON web API.
//!
//! Every request walks one ordered list of stages: security headers, body
//! decoding, cookies, CORS, client address resolution, input trimming, the
//! static asset gate, the rate limiter, the business route tables, the
//! unknown-route fallback and finally error translation. The order is
//! validated when the pipeline is built.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP transport and business route tables
//! - **Tokio**: async runtime, background jobs and the work queue
//! - **tower-http**: static file serving, tracing and compression
//! - **Serde**: JSON payloads and configuration
//!
//! ## Core Components
//!
//! - [`config`]: Layered configuration and validation
//! - [`context`]: Per-request state threaded through the stages
//! - [`pipeline`]: The `Stage` trait, ordering rules and dispatch
//! - [`middleware`]: One stage per cross-cutting concern
//! - [`error`]: Failure taxonomy shared by stages and handlers
//! - [`auth`]: Authentication strategy and its startup loader
//! - [`jobs`]: Recurring jobs and the in-process work queue
//! - [`startup`]: The idempotent startup sequence
//! - [`routes`]: Business endpoints
//! - [`metrics`]: Request and background-work counters
//! - [`state`]: Shared state handed to route handlers

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod startup;
pub mod state;

#[cfg(test)]
mod tests;
