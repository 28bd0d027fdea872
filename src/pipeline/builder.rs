use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::{Pipeline, Stage, StageKind};
use crate::metrics::Metrics;
use crate::middleware::errors::ErrorTranslator;

/// A stage ordering that must never reach request time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("no error translation stage registered")]
    MissingErrorTranslation,
    #[error("stage {0} registered after the error translation stage")]
    StageAfterErrorTranslation(StageKind),
    #[error("no unknown-route stage registered")]
    MissingUnknownRoute,
    #[error("unknown-route stage must be registered immediately before error translation")]
    UnknownRouteMisplaced,
    #[error("stage {0} registered more than once")]
    DuplicateStage(StageKind),
    #[error("route dispatch at position {position} is not preceded by a rate limit gate")]
    RoutesWithoutRateLimit { position: usize },
}

enum Slot {
    Stage(Arc<dyn Stage>),
    Terminal(Arc<ErrorTranslator>),
}

impl Slot {
    fn kind(&self) -> StageKind {
        match self {
            Slot::Stage(s) => s.kind(),
            Slot::Terminal(_) => StageKind::ErrorTranslation,
        }
    }
}

/// Collects stages in order and validates the sequence on [`build`](Self::build).
#[derive(Default)]
pub struct PipelineBuilder {
    slots: Vec<Slot>,
    metrics: Option<Metrics>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage<S>(mut self, stage: S) -> Self
    where
        S: Stage + 'static,
    {
        self.slots.push(Slot::Stage(Arc::new(stage)));
        self
    }

    /// Registers the terminal error stage. It must be the last registration.
    pub fn error_translation(mut self, translator: ErrorTranslator) -> Self {
        self.slots.push(Slot::Terminal(Arc::new(translator)));
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let kinds: Vec<StageKind> = self.slots.iter().map(Slot::kind).collect();
        validate_order(&kinds)?;

        let mut stages = Vec::with_capacity(self.slots.len());
        let mut translator = None;
        for slot in self.slots {
            match slot {
                Slot::Stage(s) => stages.push(s),
                Slot::Terminal(t) => translator = Some(t),
            }
        }
        let translator = translator.ok_or(PipelineError::MissingErrorTranslation)?;

        tracing::debug!(
            stages = %kinds.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "),
            "pipeline assembled"
        );

        Ok(Pipeline { stages, translator, metrics: self.metrics.unwrap_or_default() })
    }
}

/// Checks a stage sequence against the ordering contract.
///
/// - every kind except `Routes` appears at most once;
/// - error translation exists and is last;
/// - unknown-route exists and sits immediately before error translation;
/// - every `Routes` stage is preceded by a `RateLimit` stage.
pub fn validate_order(kinds: &[StageKind]) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for kind in kinds {
        if *kind != StageKind::Routes && !seen.insert(*kind) {
            return Err(PipelineError::DuplicateStage(*kind));
        }
    }

    let terminal = kinds
        .iter()
        .position(|k| *k == StageKind::ErrorTranslation)
        .ok_or(PipelineError::MissingErrorTranslation)?;
    if let Some(after) = kinds.get(terminal + 1) {
        return Err(PipelineError::StageAfterErrorTranslation(*after));
    }

    let unknown = kinds
        .iter()
        .position(|k| *k == StageKind::UnknownRoute)
        .ok_or(PipelineError::MissingUnknownRoute)?;
    if unknown + 1 != terminal {
        return Err(PipelineError::UnknownRouteMisplaced);
    }

    let gate = kinds.iter().position(|k| *k == StageKind::RateLimit);
    for (position, kind) in kinds.iter().enumerate() {
        if *kind == StageKind::Routes && gate.map_or(true, |g| g > position) {
            return Err(PipelineError::RoutesWithoutRateLimit { position });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageKind::*;

    const STANDARD: [StageKind; 11] = [
        SecurityHeaders,
        BodyDecoder,
        Cookies,
        Cors,
        ClientIp,
        Trim,
        StaticAssets,
        RateLimit,
        Routes,
        UnknownRoute,
        ErrorTranslation,
    ];

    #[test]
    fn test_standard_order_is_valid() {
        assert_eq!(validate_order(&STANDARD), Ok(()));
    }

    #[test]
    fn test_missing_error_translation() {
        assert_eq!(
            validate_order(&[RateLimit, Routes, UnknownRoute]),
            Err(PipelineError::MissingErrorTranslation)
        );
    }

    #[test]
    fn test_stage_after_error_translation() {
        assert_eq!(
            validate_order(&[RateLimit, Routes, UnknownRoute, ErrorTranslation, Cors]),
            Err(PipelineError::StageAfterErrorTranslation(Cors))
        );
    }

    #[test]
    fn test_duplicate_error_translation() {
        assert_eq!(
            validate_order(&[UnknownRoute, ErrorTranslation, ErrorTranslation]),
            Err(PipelineError::DuplicateStage(ErrorTranslation))
        );
    }

    #[test]
    fn test_unknown_route_must_be_second_to_last() {
        assert_eq!(
            validate_order(&[UnknownRoute, RateLimit, Routes, ErrorTranslation]),
            Err(PipelineError::UnknownRouteMisplaced)
        );
        assert_eq!(
            validate_order(&[RateLimit, Routes, ErrorTranslation]),
            Err(PipelineError::MissingUnknownRoute)
        );
    }

    #[test]
    fn test_rate_limit_after_routes_is_rejected() {
        assert_eq!(
            validate_order(&[Cors, Routes, RateLimit, UnknownRoute, ErrorTranslation]),
            Err(PipelineError::RoutesWithoutRateLimit { position: 1 })
        );
        assert_eq!(
            validate_order(&[Routes, UnknownRoute, ErrorTranslation]),
            Err(PipelineError::RoutesWithoutRateLimit { position: 0 })
        );
    }

    #[test]
    fn test_multiple_route_tables_behind_one_gate() {
        assert_eq!(
            validate_order(&[RateLimit, Routes, Routes, UnknownRoute, ErrorTranslation]),
            Ok(())
        );
    }
}
