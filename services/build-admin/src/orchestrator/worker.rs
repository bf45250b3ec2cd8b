//! Scheduling tick background worker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use super::FleetOrchestrator;

/// Drives [`FleetOrchestrator::keep_service_once`] on a fixed interval.
///
/// Ticks never overlap: a slow tick delays the next one.
pub struct ScheduleWorker {
    orchestrator: Arc<FleetOrchestrator>,
}

impl ScheduleWorker {
    pub fn new(orchestrator: Arc<FleetOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run the scheduling loop until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.orchestrator.schedule_interval();
        info!(interval_ms = period.as_millis() as u64, "Starting schedule worker");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let tick = AssertUnwindSafe(self.orchestrator.keep_service_once(Utc::now()));
                    if tick.catch_unwind().await.is_err() {
                        error!("Scheduling tick panicked; continuing with the next tick");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Schedule worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{OrchestratorConfig, ProhibitedHostConfig, RecoveryConfig};
    use crate::job::MockJobFactory;
    use crate::prohibited::ProhibitedHostSet;
    use crate::scheduler::RecordingScheduler;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_worker_ticks_until_shutdown() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let orchestrator = Arc::new(FleetOrchestrator::new(
            OrchestratorConfig {
                schedule_interval: Duration::from_millis(5),
                counter_sync_interval: Duration::from_secs(30),
            },
            RecoveryConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MockJobFactory::new()),
            scheduler.clone(),
            Arc::new(ProhibitedHostSet::new(&ProhibitedHostConfig::default())),
        ));

        let (tx, rx) = watch::channel(false);
        let worker = ScheduleWorker::new(orchestrator);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(scheduler.plan_count() >= 2);
    }
}
