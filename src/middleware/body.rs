//! Body decoder stage.
//!
//! Buffers the request body up to the configured limit and decodes
//! `application/json` and `application/x-www-form-urlencoded` payloads into a
//! `serde_json::Value`. Other content types are buffered but left undecoded.

use std::error::Error as _;

use async_trait::async_trait;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};

use crate::context::{BodyFormat, RequestContext};
use crate::error::{AppError, AppResult};
use crate::pipeline::{Flow, Stage, StageKind};

pub struct BodyDecoderStage {
    limit: usize,
}

impl BodyDecoderStage {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn is_form(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|m| m.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Decodes a URL-encoded form. Repeated keys collect into an array.
pub fn decode_form(bytes: &[u8]) -> Value {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(bytes) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

#[async_trait]
impl Stage for BodyDecoderStage {
    fn kind(&self) -> StageKind {
        StageKind::BodyDecoder
    }

    fn name(&self) -> &'static str {
        "body-decoder"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        // Early rejection on declared length
        if let Some(len) = ctx.header_str(CONTENT_LENGTH.as_str()).and_then(|v| v.parse::<usize>().ok()) {
            if len > self.limit {
                return Err(AppError::PayloadTooLarge { limit: self.limit });
            }
        }

        let Some(body) = ctx.body.take() else {
            return Ok(Flow::Continue);
        };
        let bytes = axum::body::to_bytes(body, self.limit).await.map_err(|e| {
            if e.source().is_some_and(|s| s.is::<LengthLimitError>()) {
                AppError::PayloadTooLarge { limit: self.limit }
            } else {
                AppError::BadRequest("Failed to read request body".to_string())
            }
        })?;
        ctx.raw_body = bytes;
        if ctx.raw_body.is_empty() {
            return Ok(Flow::Continue);
        }

        let content_type = ctx.header_str(CONTENT_TYPE.as_str()).unwrap_or("").to_string();
        if is_json(&content_type) {
            let value: Value = serde_json::from_slice(&ctx.raw_body)
                .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {}", e)))?;
            ctx.payload = Some(value);
            ctx.body_format = BodyFormat::Json;
        } else if is_form(&content_type) {
            ctx.payload = Some(decode_form(&ctx.raw_body));
            ctx.body_format = BodyFormat::Form;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use serde_json::json;

    fn ctx(content_type: &str, body: &'static str) -> RequestContext {
        RequestContext::new(
            Request::builder()
                .method("POST")
                .uri("/api/basic")
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_json_body_is_decoded() {
        let mut ctx = ctx("application/json; charset=utf-8", r#"{"name":"  ada ","age":36}"#);
        BodyDecoderStage::new(1024).process(&mut ctx).await.unwrap();
        assert_eq!(ctx.payload, Some(json!({"name": "  ada ", "age": 36})));
        assert_eq!(ctx.body_format, BodyFormat::Json);
    }

    #[tokio::test]
    async fn test_form_body_is_decoded() {
        let mut ctx = ctx("application/x-www-form-urlencoded", "a=1&b=two+words&a=3");
        BodyDecoderStage::new(1024).process(&mut ctx).await.unwrap();
        assert_eq!(ctx.payload, Some(json!({"a": ["1", "3"], "b": "two words"})));
        assert_eq!(ctx.body_format, BodyFormat::Form);
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_validation_failure() {
        let mut ctx = ctx("application/json", "{not json");
        let err = BodyDecoderStage::new(1024).process(&mut ctx).await.err().unwrap();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut ctx = ctx("application/json", r#"{"padding":"xxxxxxxxxxxxxxxxxxxxxxxx"}"#);
        let err = BodyDecoderStage::new(8).process(&mut ctx).await.err().unwrap();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn test_empty_body_leaves_payload_absent() {
        let mut ctx = ctx("application/json", "");
        BodyDecoderStage::new(1024).process(&mut ctx).await.unwrap();
        assert!(ctx.payload.is_none());
    }

    #[tokio::test]
    async fn test_other_content_types_stay_raw() {
        let mut ctx = ctx("text/plain", "hello");
        BodyDecoderStage::new(1024).process(&mut ctx).await.unwrap();
        assert!(ctx.payload.is_none());
        assert_eq!(&ctx.raw_body[..], b"hello");
        assert_eq!(ctx.body_format, BodyFormat::Raw);
    }
}
