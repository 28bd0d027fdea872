//! Route dispatch stage.
//!
//! Hands the request to an axum [`Router`] holding business route tables.
//! Three outcomes are distinguished by response extensions:
//! - the router's own fallback fired: no route claimed the request, continue;
//! - a handler returned an [`AppError`]: surface it as a stage failure;
//! - anything else: the handler's response is the answer.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_LENGTH, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use crate::context::{BodyFormat, ClientIp, Payload, RequestContext};
use crate::error::{AppError, AppResult, RaisedFailure};
use crate::pipeline::{Flow, Stage, StageKind};

/// Marker left by the router fallback when nothing matched.
#[derive(Debug, Clone, Copy)]
struct Unmatched;

async fn unmatched() -> Response {
    let mut res = StatusCode::NOT_FOUND.into_response();
    res.extensions_mut().insert(Unmatched);
    res
}

pub struct RouteDispatchStage {
    router: Router,
}

impl RouteDispatchStage {
    /// `router` must already carry its state and full paths (prefix included).
    pub fn new(router: Router) -> Self {
        Self { router: router.fallback(unmatched).method_not_allowed_fallback(unmatched) }
    }

    fn build_request(ctx: &mut RequestContext) -> AppResult<axum::http::Request<Body>> {
        let mut parts = ctx.parts.clone();
        parts.extensions.insert(ClientIp(ctx.client_ip));
        parts.extensions.insert(ctx.cookies.clone());
        if let Some(payload) = &ctx.payload {
            parts.extensions.insert(Payload(payload.clone()));
        }

        // Handlers see the trimmed payload, re-encoded in its original format.
        let body = if let Some(body) = ctx.body.take() {
            body
        } else {
            let bytes = match (ctx.body_format, &ctx.payload) {
                (BodyFormat::Json, Some(value)) => serde_json::to_vec(value).map_err(AppError::internal)?.into(),
                (BodyFormat::Form, Some(value)) => encode_form(value).into_bytes().into(),
                _ => ctx.raw_body.clone(),
            };
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            Body::from(bytes)
        };
        Ok(axum::http::Request::from_parts(parts, body))
    }
}

/// Re-encodes a decoded form payload.
pub fn encode_form(value: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = value {
        for (key, value) in map {
            match value {
                Value::String(s) => {
                    serializer.append_pair(key, s);
                }
                Value::Array(items) => {
                    for item in items.iter().filter_map(Value::as_str) {
                        serializer.append_pair(key, item);
                    }
                }
                _ => {}
            }
        }
    }
    serializer.finish()
}

#[async_trait]
impl Stage for RouteDispatchStage {
    fn kind(&self) -> StageKind {
        StageKind::Routes
    }

    fn name(&self) -> &'static str {
        "routes"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        let req = Self::build_request(ctx)?;
        let mut res = match self.router.clone().oneshot(req).await {
            Ok(res) => res,
            Err(never) => match never {},
        };

        if res.extensions_mut().remove::<Unmatched>().is_some() {
            return Ok(Flow::Continue);
        }
        ctx.route_matched = true;
        if let Some(RaisedFailure(err)) = res.extensions_mut().remove::<RaisedFailure>() {
            return Err(err);
        }
        Ok(Flow::Respond(res))
    }
}
