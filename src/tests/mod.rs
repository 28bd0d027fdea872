//! Tests that drive the assembled pipeline end to end.
//!
//! Requests go through [`crate::startup::Ready::router`] with
//! `tower::ServiceExt::oneshot`, so no socket is bound.
//!
//! ## Test Modules
//!
//! - **support**: shared config and request helpers
//! - **pipeline_tests**: ordering, fallback and header behaviour
//! - **static_tests**: the static asset gate and its origin allow-list
//! - **startup_tests**: idempotent startup and shutdown
//! - **api_tests**: business routes, trimming and rate limiting
//! - **error_tests**: failure translation and reporting
//! - **config_tests**: configuration loading and validation

pub mod static_tests;
pub mod support;
