//! Per-request state threaded through the pipeline.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::{
    body::{Body, Bytes},
    extract::{connect_info::ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderName, Method, Request},
};
use serde_json::Value;

use crate::error::AppError;

/// Resolved client address, after proxy header normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Cookies parsed from the `Cookie` request header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(pub HashMap<String, String>);

impl Cookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Decoded request body (JSON or URL-encoded form), after trimming.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(pub Value);

impl<S: Send + Sync> FromRequestParts<S> for Payload {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Payload>()
            .cloned()
            .ok_or_else(|| AppError::BadRequest("Expected a JSON or form-encoded body".to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientIp>()
            .copied()
            .ok_or_else(|| AppError::internal(anyhow::anyhow!("client address was not resolved")))
    }
}

/// How the buffered body was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
    Raw,
}

/// Everything the pipeline knows about one in-flight request.
///
/// Owned by [`crate::pipeline::Pipeline::handle`] for the lifetime of the
/// request and dropped once the response is produced.
pub struct RequestContext {
    pub parts: Parts,
    /// Unread request body. Taken by the body decoder stage.
    pub body: Option<Body>,
    /// Buffered body bytes, available once decoded.
    pub raw_body: Bytes,
    pub body_format: BodyFormat,
    pub payload: Option<Value>,
    pub cookies: Cookies,
    pub peer_addr: Option<SocketAddr>,
    pub client_ip: IpAddr,
    /// Set once a route table claimed the request.
    pub route_matched: bool,
    /// Headers attached by stages to whatever response is eventually sent.
    pub response_headers: HeaderMap,
    /// Headers removed from the final response.
    pub strip_headers: Vec<HeaderName>,
}

impl RequestContext {
    pub fn new(req: Request<Body>) -> Self {
        let (parts, body) = req.into_parts();
        let peer_addr = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
        let client_ip = peer_addr.map(|a| a.ip()).unwrap_or(IpAddr::from([127, 0, 0, 1]));
        Self {
            parts,
            body: Some(body),
            raw_body: Bytes::new(),
            body_format: BodyFormat::Raw,
            payload: None,
            cookies: Cookies::default(),
            peer_addr,
            client_ip,
            route_matched: false,
            response_headers: HeaderMap::new(),
            strip_headers: Vec::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Returns a header value as `&str`, ignoring values that are not valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the request path is `prefix` itself or lies below it.
    pub fn path_is_under(&self, prefix: &str) -> bool {
        path_is_under(self.path(), prefix)
    }
}

pub(crate) fn path_is_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_is_under() {
        assert!(path_is_under("/api", "/api"));
        assert!(path_is_under("/api/basic", "/api"));
        assert!(!path_is_under("/apix", "/api"));
        assert!(!path_is_under("/other", "/api"));
        assert!(path_is_under("/anything", "/"));
    }

    #[test]
    fn test_context_without_connect_info_falls_back_to_loopback() {
        let req = Request::builder().uri("/api/basic").body(Body::empty()).unwrap();
        let ctx = RequestContext::new(req);
        assert_eq!(ctx.client_ip, IpAddr::from([127, 0, 0, 1]));
        assert!(ctx.peer_addr.is_none());
        assert!(!ctx.route_matched);
        assert_eq!(ctx.path(), "/api/basic");
    }
}
