//! Business route tables.
//!
//! Paths are relative to the API prefix; the startup sequencer nests them
//! under it.
//!
//! - `basic`: sample document endpoints
//! - `me`: identity of the authenticated caller
//! - `health`: liveness, version and metrics

use axum::{routing::get, Router};

use crate::state::AppState;

pub mod basic;
pub mod health;
pub mod me;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/basic", get(basic::show).post(basic::echo))
        .route("/me", get(me::show))
        .route("/healthz", get(health::healthz))
        .route("/version", get(health::version))
        .route("/metrics", get(health::metrics))
}
