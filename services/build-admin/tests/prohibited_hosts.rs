//! Hosts blamed by slot releases are excluded from plans until they expire.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use buildadmin_server::config::ProhibitedHostConfig;
use buildadmin_server::job::{JobHandle, MockJob, MockJobFactory, RoleDemand, SlotRelease};
use buildadmin_server::orchestrator::StartParams;
use buildadmin_server::registry::JobSelector;
use buildadmin_server::store::{status_path, CoordinationStore};
use chrono::{Duration, Utc};

use common::{harness_with, id};

#[tokio::test]
async fn released_host_is_prohibited_until_ttl_passes() {
    let h = harness_with(
        Arc::new(MockJobFactory::new()),
        ProhibitedHostConfig {
            ttl: StdDuration::from_secs(60),
            max_size: 16,
        },
    );
    let build_id = id("shop:orders:1");
    h.orchestrator
        .start(build_id.clone(), StartParams::new("/c"))
        .await
        .unwrap();
    h.factory.created(&build_id).unwrap().push_release(SlotRelease {
        slot_id: "slot-7".to_string(),
        role_name: "indexer".to_string(),
        host: "host-a".to_string(),
        reason: "disk full".to_string(),
    });

    let now = Utc::now();
    let report = h.orchestrator.keep_service_once(now).await;
    assert_eq!(report.released_slots, 1);
    assert!(report.plan_pushed);
    assert_eq!(h.scheduler.released().len(), 1);
    assert!(h.scheduler.last_plan().unwrap().is_prohibited("host-a"));

    h.orchestrator
        .keep_service_once(now + Duration::seconds(60))
        .await;
    assert!(h.scheduler.last_plan().unwrap().is_prohibited("host-a"));

    h.orchestrator
        .keep_service_once(now + Duration::seconds(61))
        .await;
    let plan = h.scheduler.last_plan().unwrap();
    assert!(plan.prohibited_hosts.is_empty());
    assert_eq!(h.scheduler.plan_count(), 3);
}

fn demand(role: &str, count: u32) -> RoleDemand {
    RoleDemand {
        role_name: role.to_string(),
        count,
        cpu_millis: 500,
        memory_mb: 256,
    }
}

#[tokio::test]
async fn plan_covers_demands_of_running_generations_only() {
    let h = common::harness();
    let running = Arc::new(
        MockJob::parse("shop:orders:1")
            .with_demands(vec![demand("indexer", 3), demand("merger", 1)]),
    );
    let suspended =
        Arc::new(MockJob::parse("shop:users:1").with_demands(vec![demand("indexer", 2)]));
    for job in [&running, &suspended] {
        h.store.write(&status_path(job.build_id()), b"{}").await.unwrap();
        h.factory.add_recoverable(job.clone());
    }

    let recovery = h.orchestrator.recover().await.unwrap();
    assert_eq!(recovery.active.len(), 2);
    h.orchestrator
        .suspend(&JobSelector::id(suspended.build_id().clone()))
        .await
        .unwrap();

    let report = h.orchestrator.keep_service_once(Utc::now()).await;
    assert_eq!(report.planned_workers, 4);
    let plan = h.scheduler.last_plan().unwrap();
    let roles: Vec<&str> = plan.roles.iter().map(|r| r.demand.role_name.as_str()).collect();
    assert_eq!(roles, vec!["indexer", "merger"]);
    assert!(plan.roles.iter().all(|r| &r.build_id == running.build_id()));
}
