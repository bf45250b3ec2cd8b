//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    /// "ok", or "recovering" until startup recovery completes.
    pub status: &'static str,
    pub version: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generations: Option<GenerationCounts>,
}

#[derive(Debug, Serialize)]
pub struct GenerationCounts {
    pub active: usize,
    pub starting: usize,
    pub recover_failed: usize,
}

fn probe(status: &'static str, generations: Option<GenerationCounts>) -> ProbeResponse {
    ProbeResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        generations,
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

async fn healthz() -> Json<ProbeResponse> {
    Json(probe("ok", None))
}

/// 503 until recovery has finished.
async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ProbeResponse>) {
    let registry = state.orchestrator().registry();
    let counts = GenerationCounts {
        active: registry.active_count(),
        starting: registry.starting().len(),
        recover_failed: registry.recover_failed().len(),
    };

    if state.is_ready() {
        (StatusCode::OK, Json(probe("ok", Some(counts))))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(probe("recovering", Some(counts))))
    }
}
