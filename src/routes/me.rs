use axum::{response::IntoResponse, Json};

use crate::auth::Authenticated;

/// Returns the identity behind the bearer token.
pub async fn show(Authenticated(identity): Authenticated) -> impl IntoResponse {
    Json(identity)
}
