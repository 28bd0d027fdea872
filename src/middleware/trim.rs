use async_trait::async_trait;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::pipeline::{Flow, Stage, StageKind};

/// Strips leading and trailing whitespace from every string in the payload.
pub struct TrimStage;

/// Trims all string leaves in place.
///
/// Walks with an explicit stack so deeply nested payloads cannot overflow the
/// call stack.
pub fn trim_strings(root: &mut Value) {
    let mut stack = vec![root];
    while let Some(value) = stack.pop() {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    *s = trimmed.to_string();
                }
            }
            Value::Array(items) => stack.extend(items.iter_mut()),
            Value::Object(map) => stack.extend(map.values_mut()),
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }
}

#[async_trait]
impl Stage for TrimStage {
    fn kind(&self) -> StageKind {
        StageKind::Trim
    }

    fn name(&self) -> &'static str {
        "trim"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        if let Some(payload) = ctx.payload.as_mut() {
            trim_strings(payload);
        }
        Ok(Flow::Continue)
    }
}
