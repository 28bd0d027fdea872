use std::sync::Arc;

use crate::auth::AuthStrategy;
use crate::config::AppConfig;
use crate::jobs::WorkQueue;
use crate::metrics::Metrics;

/// The shared application state handed to business route handlers.
///
/// Everything in here is created by the startup sequencer before the listener
/// binds and is read-only afterwards.
#[derive(Clone)]
pub struct AppState {
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// The registered authentication strategy, consulted by protected routes.
    pub auth: Arc<dyn AuthStrategy>,
    /// Handle for enqueueing background work.
    pub queue: WorkQueue,
    /// Request and background-work counters.
    pub metrics: Metrics,
}
