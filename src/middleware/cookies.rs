use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header::COOKIE, HeaderMap};

use crate::context::{Cookies, RequestContext};
use crate::error::AppResult;
use crate::pipeline::{Flow, Stage, StageKind};

/// Parses `Cookie` headers into [`Cookies`]. The first occurrence of a name wins.
pub struct CookieStage;

pub fn parse_cookies(headers: &HeaderMap) -> Cookies {
    let mut map = HashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            map.entry(name.to_string()).or_insert_with(|| value.to_string());
        }
    }
    Cookies(map)
}

#[async_trait]
impl Stage for CookieStage {
    fn kind(&self) -> StageKind {
        StageKind::Cookies
    }

    fn name(&self) -> &'static str {
        "cookies"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        ctx.cookies = parse_cookies(ctx.headers());
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("session=abc123; theme=\"dark\"; broken; =x"));
        headers.append(COOKIE, HeaderValue::from_static("session=ignored; lang=fr"));

        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("session"), Some("abc123"));
        assert_eq!(cookies.get("theme"), Some("dark"));
        assert_eq!(cookies.get("lang"), Some("fr"));
        assert_eq!(cookies.get("broken"), None);
        assert_eq!(cookies.0.len(), 3);
    }

    #[test]
    fn test_no_cookie_header() {
        assert!(parse_cookies(&HeaderMap::new()).0.is_empty());
    }
}
