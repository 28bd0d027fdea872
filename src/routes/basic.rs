use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::context::Payload;
use crate::jobs::ECHO_JOB_KIND;
use crate::state::AppState;

pub async fn show() -> impl IntoResponse {
    Json(json!({ "body": "body of doc" }))
}

// Echoes the (already trimmed) payload and hands a copy to the work queue.
pub async fn echo(State(state): State<AppState>, Payload(payload): Payload) -> impl IntoResponse {
    let job_id = match state.queue.enqueue(ECHO_JOB_KIND, payload.clone()) {
        Ok(id) => Some(id.to_string()),
        Err(e) => {
            tracing::warn!("Could not enqueue echo job: {}", e);
            None
        }
    };
    (StatusCode::OK, Json(json!({ "body": payload, "queued": job_id.is_some(), "job_id": job_id })))
}
