//! Catalog reconciliation loop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use buildadmin_id::BuildId;
use buildadmin_reconcile::{diff_maps, Fingerprint};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::{
    transfer_build_id, CatalogBuildId, CatalogClient, CatalogCurrent, CatalogIdMap, CatalogResult,
    CatalogTarget, CurrentState,
};
use crate::error::AdminResult;
use crate::metrics;
use crate::orchestrator::{FleetOrchestrator, StartParams};
use crate::registry::JobSelector;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The target set was identical to the previous poll.
    pub unchanged: bool,
    pub started: usize,
    pub stopped: usize,
    pub updated: usize,
    pub failed: usize,
    pub reported: usize,
}

impl ReconcileReport {
    pub fn actions(&self) -> usize {
        self.started + self.stopped + self.updated
    }
}

#[derive(Default)]
struct ReconcileState {
    fingerprint: Option<Fingerprint>,
    /// Last declared target per id; a target is acted on once per distinct value.
    targets: BTreeMap<CatalogBuildId, CatalogTarget>,
    reported: BTreeMap<CatalogBuildId, CatalogCurrent>,
}

enum Action {
    Start,
    Stop,
    Update,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Update => "update_config",
        }
    }
}

/// Keeps catalog-managed generations in sync with the catalog.
///
/// Acts on a target at most once per distinct value, and reports back only
/// when the observed outcome differs from what was last reported.
pub struct CatalogReconciler {
    orchestrator: Arc<FleetOrchestrator>,
    client: Arc<dyn CatalogClient>,
    id_map: Arc<CatalogIdMap>,
    state: Mutex<ReconcileState>,
}

impl CatalogReconciler {
    pub fn new(
        orchestrator: Arc<FleetOrchestrator>,
        client: Arc<dyn CatalogClient>,
        id_map: Arc<CatalogIdMap>,
    ) -> Self {
        Self {
            orchestrator,
            client,
            id_map,
            state: Mutex::new(ReconcileState::default()),
        }
    }

    /// Catalog id of a generation the catalog currently declares.
    pub fn external_id(&self, build_id: &BuildId) -> Option<CatalogBuildId> {
        self.id_map.external(build_id)
    }

    /// Run one reconciliation pass.
    ///
    /// An unreachable catalog aborts the pass with local state untouched.
    #[instrument(skip(self))]
    pub async fn reconcile_once(&self) -> CatalogResult<ReconcileReport> {
        let mut targets = self.client.list_build_targets().await?;
        targets.sort_by(|a, b| a.id.cmp(&b.id));

        let mut state = self.state.lock().await;
        let mut report = ReconcileReport::default();

        let fingerprint = Fingerprint::of(&targets).ok();
        if fingerprint.is_some() && fingerprint == state.fingerprint {
            report.unchanged = true;
            return Ok(report);
        }

        let mut entries: Vec<(CatalogBuildId, BuildId)> = Vec::with_capacity(targets.len());
        let mut declared: BTreeMap<CatalogBuildId, CatalogTarget> = BTreeMap::new();
        for build_target in targets {
            match transfer_build_id(&build_target.id) {
                Ok(build_id) => {
                    entries.push((build_target.id.clone(), build_id));
                    declared.insert(build_target.id, build_target.target);
                }
                Err(e) => {
                    warn!(catalog_id = %build_target.id, error = %e, "Skipping unmappable catalog id");
                }
            }
        }

        let diff = diff_maps(&state.targets, &declared);
        debug!(
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "Catalog targets changed"
        );

        // (a) Stop catalog-managed generations the catalog no longer declares.
        let declared_internal: BTreeSet<&BuildId> = entries.iter().map(|(_, id)| id).collect();
        for (build_id, job) in self.orchestrator.registry().active() {
            if !job.build_type().is_catalog_managed() || declared_internal.contains(&build_id) {
                continue;
            }
            info!(build_id = %build_id, "Stopping generation no longer in catalog");
            match self.orchestrator.stop(&JobSelector::id(build_id.clone())).await {
                Ok(_) => {
                    metrics::record_catalog_action(Action::Stop.label());
                    report.stopped += 1;
                }
                Err(e) => {
                    warn!(build_id = %build_id, error = %e, "Failed to stop undeclared generation");
                    report.failed += 1;
                }
            }
        }

        // (b) Rebuild the id map.
        self.id_map.replace(entries);

        for removed in &diff.removed {
            state.reported.remove(removed);
        }

        // (c) Act on every target whose value changed since it was last seen.
        for external in diff.to_act_on() {
            let Some(target) = declared.get(external) else {
                continue;
            };
            let Some(build_id) = self.id_map.internal(external) else {
                continue;
            };

            let (action, result) = self.converge(&build_id, external, target).await;
            if let Some(action) = &action {
                metrics::record_catalog_action(action.label());
                match (action, &result) {
                    (Action::Start, Ok(())) => report.started += 1,
                    (Action::Stop, Ok(())) => report.stopped += 1,
                    (Action::Update, Ok(())) => report.updated += 1,
                    _ => {}
                }
            }
            if let Err(e) = &result {
                warn!(build_id = %build_id, catalog_id = %external, error = %e, "Catalog action failed");
                report.failed += 1;
            }

            let current = self.observe(&build_id, target, result.err().map(|e| e.to_string()));
            if state.reported.get(external) == Some(&current) {
                continue;
            }
            match self.client.update_build_current(external, &current).await {
                Ok(()) => {
                    state.reported.insert(external.clone(), current);
                    report.reported += 1;
                }
                Err(e) => {
                    warn!(catalog_id = %external, error = %e, "Failed to report build state to catalog");
                }
            }
        }

        // Recorded even on failure: retry only on the next distinct target.
        state.targets = declared;
        state.fingerprint = fingerprint;

        if report.actions() > 0 || report.failed > 0 {
            info!(
                started = report.started,
                stopped = report.stopped,
                updated = report.updated,
                failed = report.failed,
                "Catalog reconciliation complete"
            );
        }
        Ok(report)
    }

    async fn converge(
        &self,
        build_id: &BuildId,
        external: &CatalogBuildId,
        target: &CatalogTarget,
    ) -> (Option<Action>, AdminResult<()>) {
        let running = self
            .orchestrator
            .get_generation(build_id, false)
            .filter(|job| !job.is_stopped());
        let selector = JobSelector::id(build_id.clone());

        if !target.is_valid() || !target.is_running_batch() {
            return match running {
                Some(_) => {
                    let result = self.orchestrator.stop(&selector).await.map(|_| ());
                    (Some(Action::Stop), result)
                }
                None => (None, Ok(())),
            };
        }

        match running {
            None => {
                let params = StartParams {
                    catalog_id: Some(external.to_string()),
                    ..StartParams::batch(target.config_path.clone())
                };
                let result = self.orchestrator.start(build_id.clone(), params).await;
                (Some(Action::Start), result)
            }
            Some(job) if job.config_path() != target.config_path => {
                let result = self
                    .orchestrator
                    .update_config(&selector, &target.config_path)
                    .await
                    .map(|_| ());
                (Some(Action::Update), result)
            }
            Some(_) => (None, Ok(())),
        }
    }

    fn observe(
        &self,
        build_id: &BuildId,
        target: &CatalogTarget,
        error: Option<String>,
    ) -> CatalogCurrent {
        if let Some(message) = error {
            return CatalogCurrent {
                state: CurrentState::Failed,
                config_path: target.config_path.clone(),
                last_error: Some(message),
            };
        }
        match self
            .orchestrator
            .get_generation(build_id, false)
            .filter(|job| !job.is_stopped())
        {
            Some(job) => CatalogCurrent {
                state: CurrentState::Running,
                config_path: job.config_path(),
                last_error: None,
            },
            None => CatalogCurrent {
                state: CurrentState::Stopped,
                config_path: target.config_path.clone(),
                last_error: None,
            },
        }
    }
}

/// Drives [`CatalogReconciler::reconcile_once`] on a fixed interval.
pub struct CatalogWorker {
    reconciler: Arc<CatalogReconciler>,
    interval: Duration,
}

impl CatalogWorker {
    pub fn new(reconciler: Arc<CatalogReconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting catalog reconciliation worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconciler.reconcile_once().await {
                        error!(error = %e, "Catalog reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Catalog worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
