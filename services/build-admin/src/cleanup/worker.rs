//! Periodic obsolete data collection.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, instrument};

use super::ObsoleteDataCollector;

/// Runs both retention sweeps on the configured GC interval.
///
/// The index sweep runs first so that the metadata sweep in the same pass can
/// already purge generations whose index it just deleted.
pub struct GcWorker {
    collector: Arc<ObsoleteDataCollector>,
}

impl GcWorker {
    pub fn new(collector: Arc<ObsoleteDataCollector>) -> Self {
        Self { collector }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let config = self.collector.config();
        info!(
            interval_secs = config.interval.as_secs(),
            delete_old_index = config.delete_old_index,
            reserve_generations = config.reserve_generations,
            reserve_indices = config.reserve_indices,
            "Starting GC worker"
        );

        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cleanup().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("GC worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_cleanup(&self) {
        let now = Utc::now();
        let index = self.collector.clean_obsolete_index(now).await;
        let metadata = self.collector.clear_stopped_generations(now).await;

        if index.deleted > 0 || !metadata.purged.is_empty() {
            info!(
                indices_deleted = index.deleted,
                generations_purged = metadata.purged.len(),
                refused = metadata.refused.len(),
                "GC pass complete"
            );
        }
    }
}
