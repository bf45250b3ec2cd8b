//! Admin service metrics.
//!
//! Staleness and GC activity are visible only here and in logs, never through
//! the RPC surface.

use std::sync::OnceLock;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use buildadmin_id::BuildId;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use metrics_util::MetricKindMask;

// ============================================================================
// Metric Names
// ============================================================================

/// Seconds since the orchestrator last re-synced its schedule timestamp.
pub const SCHEDULE_FRESHNESS: &str = "build_admin_schedule_freshness_seconds";

/// Seconds since a running generation last made progress.
pub const GENERATION_REFRESH_LAG: &str = "build_admin_generation_refresh_lag_seconds";

pub const PLAN_PUSH_FAILURES_TOTAL: &str = "build_admin_plan_push_failures_total";

pub const GC_INDEX_DELETED_TOTAL: &str = "build_admin_gc_index_deleted_total";

pub const GC_GENERATIONS_PURGED_TOTAL: &str = "build_admin_gc_generations_purged_total";

pub const CATALOG_ACTIONS_TOTAL: &str = "build_admin_catalog_actions_total";

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Gauges not set for this long are dropped from the export. Stopped
/// generations stop reporting a refresh lag, so their series age out.
pub const IDLE_GAUGE_TIMEOUT: Duration = Duration::from_secs(300);

fn builder(idle_gauge_timeout: Duration) -> PrometheusBuilder {
    PrometheusBuilder::new().idle_timeout(MetricKindMask::GAUGE, Some(idle_gauge_timeout))
}

/// Install the global Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = builder(IDLE_GAUGE_TIMEOUT).install_recorder()?;
    describe_gauge!(
        SCHEDULE_FRESHNESS,
        "Seconds since the schedule timestamp was last re-synced"
    );
    describe_gauge!(
        GENERATION_REFRESH_LAG,
        "Seconds since each running generation last made progress"
    );
    describe_counter!(PLAN_PUSH_FAILURES_TOTAL, "Resource plans the scheduler rejected");
    describe_counter!(GC_INDEX_DELETED_TOTAL, "Generations whose index data was deleted");
    describe_counter!(
        GC_GENERATIONS_PURGED_TOTAL,
        "Generations whose metadata directory was removed"
    );
    describe_counter!(CATALOG_ACTIONS_TOTAL, "Start/stop/update actions issued from the catalog");

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// ============================================================================
// Metrics Endpoint
// ============================================================================

/// Handler for `GET /metrics`.
pub async fn serve_metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}

// ============================================================================
// Metric Recording
// ============================================================================

pub fn set_schedule_freshness(seconds: f64) {
    gauge!(SCHEDULE_FRESHNESS).set(seconds);
}

pub fn set_generation_refresh_lag(build_id: &BuildId, seconds: f64) {
    gauge!(GENERATION_REFRESH_LAG, "build_id" => build_id.to_string()).set(seconds);
}

pub fn record_plan_push_failure() {
    counter!(PLAN_PUSH_FAILURES_TOTAL).increment(1);
}

pub fn record_index_deleted() {
    counter!(GC_INDEX_DELETED_TOTAL).increment(1);
}

pub fn record_generation_purged() {
    counter!(GC_GENERATIONS_PURGED_TOTAL).increment(1);
}

pub fn record_catalog_action(action: &'static str) {
    counter!(CATALOG_ACTIONS_TOTAL, "action" => action).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_lag_series_ages_out() {
        let recorder = builder(Duration::from_millis(50)).build_recorder();
        let handle = recorder.handle();
        let running = BuildId::parse("shop:orders:2").unwrap();
        let stopped = BuildId::parse("shop:orders:1").unwrap();

        metrics::with_local_recorder(&recorder, || {
            set_generation_refresh_lag(&stopped, 4.0);
            set_generation_refresh_lag(&running, 1.0);
        });
        let rendered = handle.render();
        assert!(rendered.contains("build_id=\"shop:orders:1\""));
        assert!(rendered.contains("build_id=\"shop:orders:2\""));

        std::thread::sleep(Duration::from_millis(120));
        metrics::with_local_recorder(&recorder, || {
            set_generation_refresh_lag(&running, 2.0);
        });
        let rendered = handle.render();
        assert!(!rendered.contains("shop:orders:1"));
        assert!(rendered.contains("build_id=\"shop:orders:2\""));
    }
}
