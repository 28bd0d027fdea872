//! Static asset gate.
//!
//! Serves files from one directory under a fixed mount point, with a stricter
//! CORS policy than the rest of the API: only origins on a compile-time
//! allow-list get `Access-Control-Allow-Origin`. Headless renderers loading
//! fonts from documents built with `setContent()` send `Origin: null`, which is
//! why the literal `null` is listed.

use std::path::Path;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::pipeline::{Flow, Stage, StageKind};

/// Sentinel origin sent by browsers for opaque documents.
pub const NULL_ORIGIN: &str = "null";

/// Origins allowed to load static assets cross-origin. Exact, case-sensitive.
pub const STATIC_ALLOWED_ORIGINS: [&str; 5] = [
    NULL_ORIGIN,
    "http://localhost:3000",  // local frontend
    "http://backend:3000",    // renderer inside the backend container
    "http://caddy",           // through the reverse proxy
    "https://dispomenage.fr", // production
];

pub const STATIC_ALLOW_METHODS: &str = "GET, HEAD, OPTIONS";
pub const STATIC_ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept";

/// Fixed set of origins permitted by the static asset gate.
#[derive(Debug, Clone, Copy)]
pub struct AllowList {
    origins: &'static [&'static str],
}

impl AllowList {
    pub const fn new(origins: &'static [&'static str]) -> Self {
        Self { origins }
    }

    pub fn permits(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| *o == origin)
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(&STATIC_ALLOWED_ORIGINS)
    }
}

pub struct StaticAssetGate {
    mount: String,
    allow_list: AllowList,
    files: ServeDir,
}

impl StaticAssetGate {
    pub fn new(mount: impl Into<String>, dir: impl AsRef<Path>, allow_list: AllowList) -> Self {
        let root = dir.as_ref();
        if !root.is_dir() {
            tracing::warn!("Static asset directory {} does not exist", root.display());
        }
        Self {
            mount: mount.into(),
            files: ServeDir::new(root).append_index_html_on_directories(false),
            allow_list,
        }
    }

    /// Applies the allow-list CORS policy to the staged response headers.
    ///
    /// Any `Access-Control-Allow-Origin` set by an earlier stage is replaced,
    /// so a non-listed origin never receives the header. The answer depends on
    /// `Origin` either way, hence `Vary: Origin` on every static response.
    fn apply_cors(&self, ctx: &mut RequestContext) {
        let allowed = ctx
            .header_str(header::ORIGIN.as_str())
            .filter(|origin| self.allow_list.permits(origin))
            .and_then(|origin| HeaderValue::from_str(origin).ok());

        let headers = &mut ctx.response_headers;
        headers.remove(header::ACCESS_CONTROL_ALLOW_ORIGIN);
        if let Some(origin) = allowed {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(STATIC_ALLOW_METHODS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(STATIC_ALLOW_HEADERS));
    }

    /// Rewrites the request URI relative to the mount point.
    fn file_uri(&self, uri: &Uri) -> AppResult<Uri> {
        let rest = uri.path().strip_prefix(self.mount.as_str()).unwrap_or("");
        let rest = if rest.is_empty() { "/" } else { rest };
        let rewritten = match uri.query() {
            Some(q) => format!("{}?{}", rest, q),
            None => rest.to_string(),
        };
        rewritten.parse::<Uri>().map_err(|e| AppError::BadRequest(format!("Invalid asset path: {}", e)))
    }

    /// Builds the owned request handed to `ServeDir`.
    fn file_request(&self, ctx: &RequestContext) -> AppResult<Request<Body>> {
        let mut req = Request::builder()
            .method(ctx.method().clone())
            .uri(self.file_uri(&ctx.parts.uri)?)
            .body(Body::empty())
            .map_err(AppError::internal)?;
        // Keep conditional and range headers for caching
        *req.headers_mut() = ctx.headers().clone();
        Ok(req)
    }

    async fn serve(&self, req: Request<Body>) -> Response {
        // ServeDir with its default fallback never fails
        match self.files.clone().oneshot(req).await {
            Ok(res) => res.map(Body::new),
            Err(never) => match never {},
        }
    }

    fn preflight() -> Response {
        let mut res = StatusCode::NO_CONTENT.into_response();
        res.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        res
    }
}

#[async_trait]
impl Stage for StaticAssetGate {
    fn kind(&self) -> StageKind {
        StageKind::StaticAssets
    }

    fn name(&self) -> &'static str {
        "static-assets"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        if !ctx.path_is_under(&self.mount) {
            return Ok(Flow::Continue);
        }
        self.apply_cors(ctx);

        // Staged CORS headers are merged into the preflight answer
        if ctx.method() == Method::OPTIONS {
            return Ok(Flow::Respond(Self::preflight()));
        }
        if ctx.method() != Method::GET && ctx.method() != Method::HEAD {
            return Ok(Flow::Continue);
        }

        let req = self.file_request(ctx)?;
        let res = self.serve(req).await;
        match res.status() {
            // Missing files (and traversal attempts, which ServeDir refuses)
            // fall through to the uniform not-found handling.
            StatusCode::NOT_FOUND => Ok(Flow::Continue),
            _ => Ok(Flow::Respond(res)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_exact_match() {
        let list = AllowList::default();
        assert!(list.permits("http://localhost:3000"));
        assert!(list.permits("null"));
        assert!(list.permits("https://dispomenage.fr"));
        assert!(!list.permits("http://localhost:3000/"));
        assert!(!list.permits("HTTP://LOCALHOST:3000"));
        assert!(!list.permits("http://evil.example"));
        assert!(!list.permits(""));
    }

    #[test]
    fn test_file_uri_is_relative_to_mount() {
        let gate = StaticAssetGate::new("/api/static", "static", AllowList::default());
        let uri: Uri = "/api/static/fonts/inter.woff2?v=2".parse().unwrap();
        assert_eq!(gate.file_uri(&uri).unwrap(), "/fonts/inter.woff2?v=2");
        let uri: Uri = "/api/static".parse().unwrap();
        assert_eq!(gate.file_uri(&uri).unwrap(), "/");
    }

    fn options(origin: &str) -> RequestContext {
        RequestContext::new(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/static/fonts.css")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_options_is_answered_with_allow_list_headers() {
        let gate = StaticAssetGate::new("/api/static", "static", AllowList::default());
        let mut ctx = options("http://evil.example");
        ctx.response_headers
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        let Flow::Respond(res) = gate.process(&mut ctx).await.unwrap() else {
            panic!("static preflight should be answered by the gate");
        };
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(ctx.response_headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(ctx.response_headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(), STATIC_ALLOW_METHODS);
        assert_eq!(ctx.response_headers.get(header::VARY).unwrap(), "Origin");

        let mut ctx = options("http://localhost:3000");
        gate.process(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.response_headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_stage_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let gate = StaticAssetGate::new("/api/static", "static", AllowList::default());
        let mut ctx = options("null");
        let fut = gate.process(&mut ctx);
        assert_send(&fut);
    }
}
