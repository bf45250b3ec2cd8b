//! API v1 routes.

mod builds;
mod service_info;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/builds", builds::routes())
        .route("/service-info", get(service_info::get_service_info))
}
