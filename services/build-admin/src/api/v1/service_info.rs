//! Fleet snapshot RPC.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Serialize;

use crate::api::error::{ApiError, ResponseStatus};
use crate::orchestrator::{ServiceInfo, ServiceInfoFilter};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceInfoResponse {
    #[serde(flatten)]
    pub status: ResponseStatus,
    #[serde(flatten)]
    pub info: ServiceInfo,
    /// Index-version deletions accepted but not yet executed.
    pub pending_deletions: usize,
}

/// Served during recovery too, so operators can watch it progress.
pub async fn get_service_info(
    State(state): State<AppState>,
    filter: Result<Query<ServiceInfoFilter>, QueryRejection>,
) -> Result<Json<ServiceInfoResponse>, ApiError> {
    let Query(filter) = filter?;
    Ok(Json(ServiceInfoResponse {
        status: ResponseStatus::ok(),
        info: state.orchestrator().service_info(&filter),
        pending_deletions: state.collector().deletions().len(),
    }))
}
