//! Stall detection thresholds.

mod common;

use std::time::Duration as StdDuration;

use buildadmin_server::config::LivenessConfig;
use buildadmin_server::liveness::{LivenessMonitor, MonitorState, StalledComponent};
use buildadmin_server::orchestrator::StartParams;
use buildadmin_server::registry::JobSelector;
use chrono::{Duration, Utc};

use common::{harness, id};

fn config() -> LivenessConfig {
    LivenessConfig {
        check_interval: StdDuration::from_secs(10),
        service_threshold: StdDuration::from_secs(600),
        generation_threshold: StdDuration::from_secs(1800),
    }
}

#[tokio::test]
async fn generation_lag_at_threshold_is_healthy_and_beyond_is_fatal() {
    let h = harness();
    let build_id = id("shop:orders:1");
    h.orchestrator
        .start(build_id.clone(), StartParams::new("/c"))
        .await
        .unwrap();
    let t0 = Utc::now();
    h.factory.created(&build_id).unwrap().set_last_refresh(t0);

    let monitor = LivenessMonitor::new(config(), h.orchestrator.clone());

    let at_threshold = t0 + Duration::seconds(1800);
    h.orchestrator.heartbeat().refresh(at_threshold);
    let report = monitor.check_at(at_threshold).unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(monitor.state(), MonitorState::Running);

    let beyond = t0 + Duration::seconds(1801);
    h.orchestrator.heartbeat().refresh(beyond);
    let fault = monitor.check_at(beyond).unwrap_err();
    assert_eq!(fault.stalled, StalledComponent::Generation(build_id));
    assert_eq!(fault.threshold, StdDuration::from_secs(1800));
    assert_eq!(monitor.state(), MonitorState::Terminating);
}

#[tokio::test]
async fn orchestrator_stall_is_fatal() {
    let h = harness();
    h.orchestrator.heartbeat().refresh(Utc::now());
    // Read back: the heartbeat keeps millisecond precision.
    let t0 = h.orchestrator.heartbeat().last_refresh();
    let monitor = LivenessMonitor::new(config(), h.orchestrator.clone());

    assert!(monitor.check_at(t0 + Duration::seconds(600)).is_ok());
    let fault = monitor.check_at(t0 + Duration::seconds(601)).unwrap_err();
    assert_eq!(fault.stalled, StalledComponent::Orchestrator);
}

#[tokio::test]
async fn suspended_generation_is_not_a_stall() {
    let h = harness();
    let build_id = id("shop:orders:2");
    h.orchestrator
        .start(build_id.clone(), StartParams::new("/c"))
        .await
        .unwrap();
    h.orchestrator
        .suspend(&JobSelector::id(build_id.clone()))
        .await
        .unwrap();
    let t0 = Utc::now();
    h.factory.created(&build_id).unwrap().set_last_refresh(t0);

    let later = t0 + Duration::hours(2);
    h.orchestrator.heartbeat().refresh(later);
    let monitor = LivenessMonitor::new(config(), h.orchestrator.clone());
    assert!(monitor.check_at(later).is_ok());
}
