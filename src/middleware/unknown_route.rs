use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::pipeline::{Flow, Stage, StageKind};

/// Fallback for requests no route table claimed.
///
/// Must sit right before error translation, so reaching it means every route
/// table already passed on the request.
pub struct UnknownRouteStage;

#[async_trait]
impl Stage for UnknownRouteStage {
    fn kind(&self) -> StageKind {
        StageKind::UnknownRoute
    }

    fn name(&self) -> &'static str {
        "unknown-route"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        Err(AppError::RouteNotFound { method: ctx.method().to_string(), path: ctx.path().to_string() })
    }
}
