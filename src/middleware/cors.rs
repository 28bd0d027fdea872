//! General API CORS stage.
//!
//! Any origin is allowed (`Access-Control-Allow-Origin: *`). The API relies on
//! bearer tokens, never on cookies, for protected routes, so the wildcard does
//! not expose credentials. The stage only attaches headers; the one request it
//! answers itself is the `OPTIONS` preflight. Paths under the static mount are
//! left to the static asset gate, which answers their preflight with its own
//! allow-list.

use async_trait::async_trait;
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::pipeline::{Flow, Stage, StageKind};

pub const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

#[derive(Debug, Default)]
pub struct CorsStage {
    static_mount: Option<String>,
}

impl CorsStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaves `OPTIONS` requests under `mount` to the static asset gate.
    pub fn without_preflight_under(mut self, mount: impl Into<String>) -> Self {
        self.static_mount = Some(mount.into());
        self
    }

    fn preflight(ctx: &RequestContext) -> Response {
        let mut res = StatusCode::NO_CONTENT.into_response();
        let headers = res.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        // Reflect whatever headers the browser asks for
        if let Some(requested) = ctx.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        res
    }
}

#[async_trait]
impl Stage for CorsStage {
    fn kind(&self) -> StageKind {
        StageKind::Cors
    }

    fn name(&self) -> &'static str {
        "cors"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        ctx.response_headers
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        let static_path = self.static_mount.as_deref().is_some_and(|m| ctx.path_is_under(m));
        if ctx.method() == Method::OPTIONS && !static_path {
            return Ok(Flow::Respond(Self::preflight(ctx)));
        }
        Ok(Flow::Continue)
    }
}
