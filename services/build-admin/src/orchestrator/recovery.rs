//! Startup recovery of generations from the coordination store.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use buildadmin_id::BuildId;
use futures_util::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use super::FleetOrchestrator;
use crate::error::AdminResult;
use crate::job::{JobError, JobHandle, JobResult};
use crate::store::list_build_ids;

/// What a recovery pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Generations put back into service.
    pub active: Vec<BuildId>,
    /// Stopped generations tracked for GC only.
    pub stopped: Vec<BuildId>,
    pub failed: Vec<BuildId>,
}

impl FleetOrchestrator {
    /// Rebuild the job maps from the coordination store.
    ///
    /// Runs up to `threads` recoveries at once. A BuildId that cannot be
    /// recovered is isolated in the recover-failed set; it never fails the
    /// pass. Only failing to enumerate the store is an error.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> AdminResult<RecoveryReport> {
        let candidates: Vec<BuildId> = list_build_ids(self.store.as_ref())
            .await?
            .into_iter()
            .filter(|id| self.registry.get(id, true).is_none())
            .collect();
        info!(
            candidates = candidates.len(),
            threads = self.recovery.threads,
            "Recovering generations"
        );

        let results: Vec<(BuildId, JobResult<Arc<dyn JobHandle>>)> = stream::iter(candidates)
            .map(|build_id| async move {
                let result = self.recover_one(&build_id).await;
                (build_id, result)
            })
            .buffer_unordered(self.recovery.threads.max(1))
            .collect()
            .await;

        let mut report = RecoveryReport::default();
        for (build_id, result) in results {
            match result {
                Ok(job) if job.is_stopped() => {
                    self.registry.insert_history(job);
                    report.stopped.push(build_id);
                }
                Ok(job) => {
                    job.update_last_refresh_time();
                    self.registry.insert_active(job);
                    report.active.push(build_id);
                }
                Err(e) => {
                    warn!(build_id = %build_id, error = %e, "Generation recovery failed");
                    self.registry.mark_recover_failed(build_id.clone());
                    report.failed.push(build_id);
                }
            }
        }
        report.active.sort();
        report.stopped.sort();
        report.failed.sort();

        self.recovered.store(true, Ordering::SeqCst);
        info!(
            active = report.active.len(),
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "Recovery complete"
        );
        Ok(report)
    }

    async fn recover_one(&self, build_id: &BuildId) -> JobResult<Arc<dyn JobHandle>> {
        let timeout = self.recovery.attempt_timeout();
        let mut last_error = JobError::NotRecoverable;

        for attempt in 1..=self.recovery.max_attempts {
            match tokio::time::timeout(timeout, self.factory.recover(build_id)).await {
                Ok(Ok(job)) => return Ok(job),
                Ok(Err(JobError::NotRecoverable)) => return Err(JobError::NotRecoverable),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error =
                        JobError::Failed(format!("recovery timed out after {timeout:?}"));
                }
            }
            warn!(
                build_id = %build_id,
                attempt,
                error = %last_error,
                "Recovery attempt failed"
            );
            if attempt < self.recovery.max_attempts {
                tokio::time::sleep(self.recovery.sleep_interval).await;
            }
        }
        Err(last_error)
    }
}
