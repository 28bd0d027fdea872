use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use serde_json::Value;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::middleware::errors::{ErrorReporter, FailureReport};

/// Default config with the static directory pointed at `static_dir`.
pub fn test_config(static_dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.static_assets.dir = static_dir.to_path_buf();
    cfg.queue.workers = Some(1);
    cfg
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_with_origin(uri: &str, origin: &str) -> Request<Body> {
    Request::builder().uri(uri).header("origin", origin).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(res: Response<Body>) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(res: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

/// Records every failure handed to the observability sink.
#[derive(Default)]
pub struct CountingReporter {
    pub reports: Mutex<Vec<(Uuid, String)>>,
}

impl CountingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl ErrorReporter for CountingReporter {
    fn report(&self, report: &FailureReport<'_>) {
        self.reports.lock().unwrap().push((report.error_id, report.path.to_string()));
    }
}
