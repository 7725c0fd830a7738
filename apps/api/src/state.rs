use std::sync::Arc;

use crate::analysis::Orchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Owns the process-wide cache, circuit breaker and request queue.
    pub orchestrator: Arc<Orchestrator>,
}
