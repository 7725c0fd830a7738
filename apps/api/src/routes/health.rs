use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status, version and the scoring circuit state.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "circuit": orchestrator.breaker().state(),
        "queue": {
            "queued": orchestrator.queue().queued(),
            "in_flight": orchestrator.queue().in_flight(),
        }
    }))
}
