//! Security headers stage.
//!
//! Attaches defensive HTTP headers to every response the pipeline produces,
//! error responses included, and strips headers that fingerprint the server
//! implementation. `Cross-Origin-Resource-Policy` is intentionally not set:
//! cross-origin access is governed by the CORS stages.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::SecurityConfig;
use crate::context::RequestContext;
use crate::error::AppResult;
use crate::pipeline::{Flow, Stage, StageKind, FINGERPRINT_HEADERS};

pub struct SecurityHeadersStage {
    headers: HeaderMap,
}

impl SecurityHeadersStage {
    /// Precomputes the header set from configuration.
    ///
    /// # Security Headers Applied
    ///
    /// - `X-Content-Type-Options: nosniff`
    /// - `X-Frame-Options: SAMEORIGIN`
    /// - `Referrer-Policy: no-referrer`
    /// - `X-DNS-Prefetch-Control: off`
    /// - `X-Download-Options: noopen`
    /// - `X-Permitted-Cross-Domain-Policies: none`
    /// - `X-XSS-Protection: 0`
    /// - `Origin-Agent-Cluster: ?1`
    /// - `Cross-Origin-Opener-Policy: same-origin`
    /// - Optional: `Strict-Transport-Security` (HSTS) via configuration
    /// - Optional: `Content-Security-Policy` (CSP) via configuration
    pub fn new(cfg: Option<&SecurityConfig>) -> Self {
        let mut headers = HeaderMap::new();
        let fixed: [(&'static str, &'static str); 9] = [
            ("x-content-type-options", "nosniff"),
            ("x-frame-options", "SAMEORIGIN"),
            ("referrer-policy", "no-referrer"),
            ("x-dns-prefetch-control", "off"),
            ("x-download-options", "noopen"),
            ("x-permitted-cross-domain-policies", "none"),
            ("x-xss-protection", "0"),
            ("origin-agent-cluster", "?1"),
            ("cross-origin-opener-policy", "same-origin"),
        ];
        for (name, value) in fixed {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }

        if let Some(sec) = cfg {
            if sec.enable_hsts.unwrap_or(false) {
                let max_age = sec.hsts_max_age.unwrap_or(15552000); // 180 days
                let include_sub =
                    if sec.hsts_include_subdomains.unwrap_or(false) { "; includeSubDomains" } else { "" };
                let value = format!("max-age={}{}", max_age, include_sub);
                headers.insert(
                    HeaderName::from_static("strict-transport-security"),
                    HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("max-age=15552000")),
                );
            }
            if let Some(csp) = &sec.csp {
                if !csp.trim().is_empty() {
                    match HeaderValue::from_str(csp) {
                        Ok(val) => {
                            headers.insert(HeaderName::from_static("content-security-policy"), val);
                        }
                        Err(e) => tracing::warn!("Ignoring invalid security.csp value: {}", e),
                    }
                }
            }
        }

        Self { headers }
    }
}

#[async_trait]
impl Stage for SecurityHeadersStage {
    fn kind(&self) -> StageKind {
        StageKind::SecurityHeaders
    }

    fn name(&self) -> &'static str {
        "security-headers"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        for (name, value) in &self.headers {
            ctx.response_headers.insert(name.clone(), value.clone());
        }
        ctx.strip_headers.extend(FINGERPRINT_HEADERS.iter().cloned());
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};

    fn ctx() -> RequestContext {
        RequestContext::new(Request::builder().uri("/api/basic").body(Body::empty()).unwrap())
    }

    #[tokio::test]
    async fn test_fixed_headers_and_fingerprint_stripping() {
        let stage = SecurityHeadersStage::new(None);
        let mut ctx = ctx();
        assert!(matches!(stage.process(&mut ctx).await, Ok(Flow::Continue)));

        assert_eq!(ctx.response_headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(ctx.response_headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert!(!ctx.response_headers.contains_key("strict-transport-security"));
        assert!(!ctx.response_headers.contains_key("cross-origin-resource-policy"));
        assert!(ctx.strip_headers.iter().any(|h| h == "x-powered-by"));
    }

    #[tokio::test]
    async fn test_hsts_and_csp_from_config() {
        let cfg = SecurityConfig {
            enable_hsts: Some(true),
            hsts_max_age: Some(600),
            hsts_include_subdomains: Some(true),
            csp: Some("default-src 'self'".to_string()),
        };
        let stage = SecurityHeadersStage::new(Some(&cfg));
        let mut ctx = ctx();
        stage.process(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.response_headers.get("strict-transport-security").unwrap(),
            "max-age=600; includeSubDomains"
        );
        assert_eq!(ctx.response_headers.get("content-security-policy").unwrap(), "default-src 'self'");
    }
}
