//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use buildadmin_id::BuildId;
use buildadmin_server::config::{
    GcConfig, OrchestratorConfig, ProhibitedHostConfig, RecoveryConfig,
};
use buildadmin_server::job::{JobFactory, MockJobFactory};
use buildadmin_server::orchestrator::FleetOrchestrator;
use buildadmin_server::prohibited::ProhibitedHostSet;
use buildadmin_server::scheduler::RecordingScheduler;
use buildadmin_server::store::MemoryStore;

pub struct Harness {
    pub orchestrator: Arc<FleetOrchestrator>,
    pub factory: Arc<MockJobFactory>,
    pub scheduler: Arc<RecordingScheduler>,
    pub store: Arc<MemoryStore>,
}

pub fn harness_with(factory: Arc<MockJobFactory>, prohibited: ProhibitedHostConfig) -> Harness {
    harness_with_factory(factory.clone(), factory, prohibited)
}

/// `create_via` is what the orchestrator calls; `factory` is the mock behind it.
pub fn harness_with_factory(
    factory: Arc<MockJobFactory>,
    create_via: Arc<dyn JobFactory>,
    prohibited: ProhibitedHostConfig,
) -> Harness {
    let scheduler = Arc::new(RecordingScheduler::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(FleetOrchestrator::new(
        OrchestratorConfig {
            schedule_interval: Duration::from_millis(10),
            counter_sync_interval: Duration::from_secs(30),
        },
        RecoveryConfig {
            threads: 2,
            sleep_interval: Duration::from_millis(1),
            max_attempts: 2,
        },
        store.clone(),
        create_via,
        scheduler.clone(),
        Arc::new(ProhibitedHostSet::new(&prohibited)),
    ));
    Harness {
        orchestrator,
        factory,
        scheduler,
        store,
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MockJobFactory::new()), ProhibitedHostConfig::default())
}

pub fn gc_config(reserve_generations: usize, reserve_indices: usize) -> GcConfig {
    GcConfig {
        interval: Duration::from_secs(3600),
        delete_old_index: true,
        reserve_generations,
        reserve_indices,
        index_retention: None,
        generation_retention: None,
    }
}

pub fn id(s: &str) -> BuildId {
    BuildId::parse(s).unwrap()
}
