//! Generation lifecycle RPCs.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use buildadmin_id::BuildId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::{ApiError, ResponseStatus};
use crate::error::{AdminError, ErrorCode};
use crate::orchestrator::StartParams;
use crate::registry::JobSelector;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_build))
        .route("/stop", post(stop_build))
        .route("/update-config", post(update_config))
        .route("/suspend", post(suspend_build))
        .route("/resume", post(resume_build))
        .route("/clean-versions", post(clean_versions))
}

#[derive(Debug, Deserialize)]
pub struct StartBuildRequest {
    pub build_id: BuildId,
    #[serde(flatten)]
    pub params: StartParams,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(flatten)]
    pub target: JobSelector,
    pub config_path: String,
}

#[derive(Debug, Deserialize)]
pub struct CleanVersionsRequest {
    #[serde(flatten)]
    pub target: JobSelector,
    pub cluster: String,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildResponse {
    #[serde(flatten)]
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<BuildId>,
}

impl BuildResponse {
    fn ok(build_id: BuildId) -> Json<Self> {
        Json(Self {
            status: ResponseStatus::ok(),
            build_id: Some(build_id),
        })
    }
}

type ApiResult = Result<Json<BuildResponse>, ApiError>;

fn ensure_ready(state: &AppState) -> Result<(), ApiError> {
    if state.is_ready() {
        Ok(())
    } else {
        Err(ApiError::not_ready())
    }
}

async fn start_build(
    State(state): State<AppState>,
    payload: Result<Json<StartBuildRequest>, JsonRejection>,
) -> ApiResult {
    ensure_ready(&state)?;
    let Json(request) = payload?;
    state
        .orchestrator()
        .start(request.build_id.clone(), request.params)
        .await?;
    Ok(BuildResponse::ok(request.build_id))
}

async fn stop_build(
    State(state): State<AppState>,
    payload: Result<Json<JobSelector>, JsonRejection>,
) -> ApiResult {
    ensure_ready(&state)?;
    let Json(target) = payload?;
    let build_id = state.orchestrator().stop(&target).await?;
    Ok(BuildResponse::ok(build_id))
}

async fn update_config(
    State(state): State<AppState>,
    payload: Result<Json<UpdateConfigRequest>, JsonRejection>,
) -> ApiResult {
    ensure_ready(&state)?;
    let Json(request) = payload?;
    let build_id = state
        .orchestrator()
        .update_config(&request.target, &request.config_path)
        .await?;
    Ok(BuildResponse::ok(build_id))
}

async fn suspend_build(
    State(state): State<AppState>,
    payload: Result<Json<JobSelector>, JsonRejection>,
) -> ApiResult {
    ensure_ready(&state)?;
    let Json(target) = payload?;
    let build_id = state.orchestrator().suspend(&target).await?;
    Ok(BuildResponse::ok(build_id))
}

async fn resume_build(
    State(state): State<AppState>,
    payload: Result<Json<JobSelector>, JsonRejection>,
) -> ApiResult {
    ensure_ready(&state)?;
    let Json(target) = payload?;
    let build_id = state.orchestrator().resume(&target).await?;
    Ok(BuildResponse::ok(build_id))
}

/// Accepts the request once it is queued; deletion happens asynchronously.
///
/// Stopped generations are eligible, so a job id is looked up in history too.
async fn clean_versions(
    State(state): State<AppState>,
    payload: Result<Json<CleanVersionsRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    if request.cluster.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidParameter, "cluster is empty"));
    }
    let build_id = match &request.target {
        JobSelector::Id { build_id } => build_id.clone(),
        JobSelector::JobId { job_id, fuzzy } => state
            .orchestrator()
            .find_generation(job_id, true, *fuzzy)?
            .map(|(build_id, _)| build_id)
            .ok_or_else(|| AdminError::NotFound(job_id.clone()))?,
    };
    if !state
        .collector()
        .clean_versions(&build_id, &request.cluster, request.version)
    {
        return Err(AdminError::NotFound(build_id.to_string()).into());
    }
    info!(
        build_id = %build_id,
        cluster = %request.cluster,
        version = request.version,
        "Index version deletion queued"
    );
    Ok(BuildResponse::ok(build_id))
}
