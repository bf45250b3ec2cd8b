//! Obsolete data collection.
//!
//! Two sweeps bound the growth of stopped generations: one deletes index data
//! outside the index retention window, the other trims or purges metadata
//! outside the (wider) metadata window. Metadata is never purged before its
//! index is confirmed deleted. Index-version cleanup requests from callers go
//! through a [`DeferredDeletionQueue`].

mod deletion;
mod retention;
mod worker;

use std::sync::Arc;

use buildadmin_id::BuildId;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::GcConfig;
use crate::job::JobHandle;
use crate::metrics;
use crate::registry::JobRegistry;
use crate::store::{self, CoordinationStore, StoreResult, COUNTERS_DIR, STATUS_FILE};

pub use deletion::{DeferredDeletionQueue, DeletionRequest};
pub use retention::{split_by_retention, RetentionSplit, StoppedGeneration};
pub use worker::GcWorker;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSweepReport {
    pub deleted: usize,
    pub failed: usize,
    pub temp_cleaned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSweepReport {
    /// Generations whose metadata was removed.
    pub purged: Vec<BuildId>,
    /// Retained generations that had files trimmed.
    pub trimmed: usize,
    /// Expired generations skipped because their index still exists.
    pub refused: Vec<BuildId>,
}

pub struct ObsoleteDataCollector {
    config: GcConfig,
    registry: Arc<JobRegistry>,
    store: Arc<dyn CoordinationStore>,
    deletions: Arc<DeferredDeletionQueue>,
}

impl ObsoleteDataCollector {
    pub fn new(
        config: GcConfig,
        registry: Arc<JobRegistry>,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            config: config.normalized(),
            registry,
            store,
            deletions: Arc::new(DeferredDeletionQueue::new()),
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn deletions(&self) -> &Arc<DeferredDeletionQueue> {
        &self.deletions
    }

    fn stopped_generations(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<(StoppedGeneration, Arc<dyn JobHandle>)> {
        self.registry
            .all()
            .into_iter()
            .filter(|(_, job)| job.is_stopped())
            .map(|(build_id, job)| {
                let stopped_at = job.stop_timestamp().unwrap_or(now);
                (
                    StoppedGeneration {
                        build_id,
                        stopped_at,
                    },
                    job,
                )
            })
            .collect()
    }

    /// Delete index data of stopped generations outside the index window.
    ///
    /// Retained generations only lose their temporary artifacts.
    #[instrument(skip(self))]
    pub async fn clean_obsolete_index(&self, now: DateTime<Utc>) -> IndexSweepReport {
        let mut report = IndexSweepReport::default();
        if !self.config.delete_old_index {
            debug!("Old index deletion disabled");
            return report;
        }

        let stopped = self.stopped_generations(now);
        let split = split_by_retention(
            stopped.iter().map(|(generation, _)| generation.clone()).collect(),
            self.config.reserve_indices,
            self.config.index_retention,
            now,
        );
        let job_of = |build_id: &BuildId| {
            stopped
                .iter()
                .find(|(generation, _)| &generation.build_id == build_id)
                .map(|(_, job)| Arc::clone(job))
        };

        for build_id in &split.expired {
            let Some(job) = job_of(build_id) else { continue };
            if job.is_index_deleted() {
                continue;
            }
            match job.delete_index().await {
                Ok(true) => {
                    metrics::record_index_deleted();
                    info!(build_id = %build_id, "Deleted obsolete index");
                    report.deleted += 1;
                }
                Ok(false) => {
                    warn!(build_id = %build_id, "Index deletion incomplete; retrying next sweep");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(build_id = %build_id, error = %e, "Failed to delete obsolete index");
                    report.failed += 1;
                }
            }
        }

        for build_id in &split.retained {
            let Some(job) = job_of(build_id) else { continue };
            match job.delete_temp_artifacts().await {
                Ok(true) => report.temp_cleaned += 1,
                Ok(false) => {}
                Err(e) => warn!(build_id = %build_id, error = %e, "Failed to delete temp artifacts"),
            }
        }

        if report.deleted > 0 || report.failed > 0 {
            info!(
                deleted = report.deleted,
                failed = report.failed,
                "Index retention sweep complete"
            );
        }
        report
    }

    /// Trim or purge metadata of stopped generations.
    ///
    /// Inside the window only the status marker and counters survive.
    /// Outside it everything but the counters goes, and the generation is
    /// forgotten, but only once its index is deleted.
    #[instrument(skip(self))]
    pub async fn clear_stopped_generations(&self, now: DateTime<Utc>) -> MetadataSweepReport {
        let mut report = MetadataSweepReport::default();
        let stopped = self.stopped_generations(now);
        let split = split_by_retention(
            stopped.iter().map(|(generation, _)| generation.clone()).collect(),
            self.config.reserve_generations,
            self.config.generation_retention,
            now,
        );

        for build_id in &split.retained {
            match self.trim(build_id, &[STATUS_FILE, COUNTERS_DIR]).await {
                Ok(0) => {}
                Ok(_) => report.trimmed += 1,
                Err(e) => warn!(build_id = %build_id, error = %e, "Failed to trim generation metadata"),
            }
        }

        for build_id in &split.expired {
            let Some(job) = stopped
                .iter()
                .find(|(generation, _)| &generation.build_id == build_id)
                .map(|(_, job)| job)
            else {
                continue;
            };
            if !job.is_index_deleted() {
                warn!(build_id = %build_id, "Refusing to purge metadata before its index is deleted");
                report.refused.push(build_id.clone());
                continue;
            }

            job.clear_counters();
            if let Err(e) = self.trim(build_id, &[COUNTERS_DIR]).await {
                warn!(build_id = %build_id, error = %e, "Failed to purge generation metadata");
                continue;
            }
            self.registry.purge(build_id);
            metrics::record_generation_purged();
            info!(build_id = %build_id, "Purged stopped generation");
            report.purged.push(build_id.clone());
        }

        report
    }

    async fn trim(&self, build_id: &BuildId, keep: &[&str]) -> StoreResult<usize> {
        let dir = store::generation_dir(build_id);
        store::retain_children(self.store.as_ref(), &dir, keep).await
    }

    /// Queue deletion of one index version. Returns whether it was accepted.
    ///
    /// Does not wait for the deletion.
    pub fn clean_versions(&self, build_id: &BuildId, cluster: &str, version: u64) -> bool {
        let Some(job) = self.registry.get(build_id, true) else {
            debug!(build_id = %build_id, "Clean versions for unknown generation");
            return false;
        };
        self.deletions.push(DeletionRequest {
            job,
            cluster: cluster.to_string(),
            version,
        });
        true
    }
}
