//! Fleet orchestration.
//!
//! [`FleetOrchestrator`] is the single authority over which generations
//! exist. It serves the start/stop/update request surface, recovers state from
//! the coordination store at startup, and runs the scheduling tick that turns
//! the active set into a [`ResourcePlan`].

mod recovery;
mod worker;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use buildadmin_id::BuildId;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{OrchestratorConfig, RecoveryConfig};
use crate::error::{AdminError, AdminResult};
use crate::job::{BuildType, JobContext, JobFactory, JobHandle, SlotRelease};
use crate::metrics;
use crate::prohibited::{ProhibitedHost, ProhibitedHostSet};
use crate::registry::{JobEntry, JobRegistry, JobSelector};
use crate::scheduler::{ResourcePlan, WorkerScheduler};
use crate::store::CoordinationStore;

pub use recovery::RecoveryReport;
pub use worker::ScheduleWorker;

// ============================================================================
// Heartbeat
// ============================================================================

/// Progress timestamps of the orchestrator itself, read by the liveness
/// monitor independently of any single generation.
#[derive(Debug)]
pub struct ServiceHeartbeat {
    last_refresh_ms: AtomicI64,
    last_schedule_ms: AtomicI64,
}

impl ServiceHeartbeat {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_refresh_ms: AtomicI64::new(now.timestamp_millis()),
            last_schedule_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// The orchestrator completed a tick.
    pub fn refresh(&self, now: DateTime<Utc>) {
        self.last_refresh_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn sync_schedule(&self, now: DateTime<Utc>) {
        self.last_schedule_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn last_refresh(&self) -> DateTime<Utc> {
        from_millis(self.last_refresh_ms.load(Ordering::SeqCst))
    }

    pub fn last_schedule(&self) -> DateTime<Utc> {
        from_millis(self.last_schedule_ms.load(Ordering::SeqCst))
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ============================================================================
// Request / Report Types
// ============================================================================

/// Parameters of a start request.
#[derive(Debug, Clone, Deserialize)]
pub struct StartParams {
    pub config_path: String,
    #[serde(default = "default_build_type")]
    pub build_type: BuildType,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub catalog_id: Option<String>,
}

fn default_build_type() -> BuildType {
    BuildType::DirectBuild
}

impl StartParams {
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            build_type: BuildType::DirectBuild,
            params: BTreeMap::new(),
            catalog_id: None,
        }
    }

    pub fn batch(config_path: impl Into<String>) -> Self {
        Self {
            build_type: BuildType::BatchBuild,
            ..Self::new(config_path)
        }
    }
}

/// Filter for [`FleetOrchestrator::service_info`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceInfoFilter {
    /// Only generations matching this job id.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub fuzzy: bool,
    /// Also report stopped generations still tracked for GC.
    #[serde(default)]
    pub include_stopped: bool,
}

impl ServiceInfoFilter {
    fn matches(&self, build_id: &BuildId) -> bool {
        match &self.job_id {
            None => true,
            Some(job_id) if self.fuzzy => buildadmin_id::fuzzy_match(build_id, job_id),
            Some(job_id) => buildadmin_id::exact_match(build_id, job_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Running,
    Suspended,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationInfo {
    pub build_id: BuildId,
    pub build_type: BuildType,
    pub state: GenerationState,
    pub config_path: String,
    pub last_refresh_time: DateTime<Utc>,
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub index_deleted: bool,
}

impl GenerationInfo {
    fn of(build_id: &BuildId, job: &dyn JobHandle) -> Self {
        let state = if job.is_stopped() {
            GenerationState::Stopped
        } else if job.is_stopping() {
            GenerationState::Stopping
        } else if job.is_suspended() {
            GenerationState::Suspended
        } else {
            GenerationState::Running
        };
        Self {
            build_id: build_id.clone(),
            build_type: job.build_type(),
            state,
            config_path: job.config_path(),
            last_refresh_time: job.last_refresh_time(),
            stop_timestamp: job.stop_timestamp(),
            index_deleted: job.is_index_deleted(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub recovered: bool,
    pub generations: Vec<GenerationInfo>,
    pub starting: Vec<BuildId>,
    pub recover_failed: Vec<BuildId>,
    pub prohibited_hosts: Vec<ProhibitedHost>,
    pub last_refresh_time: DateTime<Utc>,
    pub last_schedule_time: DateTime<Utc>,
}

/// Outcome of one scheduling tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub released_slots: usize,
    pub retired: usize,
    pub planned_workers: u32,
    pub plan_pushed: bool,
    pub counters_synced: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct FleetOrchestrator {
    config: OrchestratorConfig,
    recovery: RecoveryConfig,
    registry: Arc<JobRegistry>,
    factory: Arc<dyn JobFactory>,
    scheduler: Arc<dyn WorkerScheduler>,
    store: Arc<dyn CoordinationStore>,
    prohibited: Arc<ProhibitedHostSet>,
    heartbeat: ServiceHeartbeat,
    recovered: AtomicBool,
}

impl FleetOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        recovery: RecoveryConfig,
        store: Arc<dyn CoordinationStore>,
        factory: Arc<dyn JobFactory>,
        scheduler: Arc<dyn WorkerScheduler>,
        prohibited: Arc<ProhibitedHostSet>,
    ) -> Self {
        Self {
            config,
            recovery,
            registry: Arc::new(JobRegistry::new()),
            factory,
            scheduler,
            store,
            prohibited,
            heartbeat: ServiceHeartbeat::new(Utc::now()),
            recovered: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn heartbeat(&self) -> &ServiceHeartbeat {
        &self.heartbeat
    }

    pub fn prohibited_hosts(&self) -> &Arc<ProhibitedHostSet> {
        &self.prohibited
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn schedule_interval(&self) -> std::time::Duration {
        self.config.schedule_interval
    }

    /// Whether startup recovery has finished.
    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Request surface
    // ------------------------------------------------------------------------

    /// Create and start a generation.
    ///
    /// Concurrent starts for one BuildId are serialized by the `starting`
    /// set: exactly one reaches the factory, the rest get a conflict.
    #[instrument(skip(self, params), fields(build_id = %build_id))]
    pub async fn start(&self, build_id: BuildId, params: StartParams) -> AdminResult<()> {
        if params.config_path.trim().is_empty() {
            return Err(AdminError::InvalidParameter("config_path is empty".to_string()));
        }

        let _starting = self.registry.begin_start(&build_id)?;

        let mut ctx = JobContext::new(build_id.clone(), params.config_path, params.build_type);
        ctx.params = params.params;
        ctx.catalog_id = params.catalog_id;

        let handle = self
            .factory
            .create(ctx)
            .await
            .map_err(|e| AdminError::job(&build_id, e))?;
        handle
            .start()
            .await
            .map_err(|e| AdminError::job(&build_id, e))?;
        handle.update_last_refresh_time();

        self.registry.insert_active(handle);
        info!("Generation started");
        Ok(())
    }

    #[instrument(skip(self), fields(target = %selector.describe()))]
    pub async fn stop(&self, selector: &JobSelector) -> AdminResult<BuildId> {
        let (build_id, job) = self.registry.resolve(selector, false)?;
        job.stop()
            .await
            .map_err(|e| AdminError::job(&build_id, e))?;

        if job.is_stopped() {
            self.registry.retire(std::slice::from_ref(&build_id));
        }
        info!(build_id = %build_id, stopped = job.is_stopped(), "Generation stop requested");
        Ok(build_id)
    }

    #[instrument(skip(self), fields(target = %selector.describe()))]
    pub async fn update_config(
        &self,
        selector: &JobSelector,
        config_path: &str,
    ) -> AdminResult<BuildId> {
        if config_path.trim().is_empty() {
            return Err(AdminError::InvalidParameter("config_path is empty".to_string()));
        }
        let (build_id, job) = self.registry.resolve(selector, false)?;
        job.update_config(config_path)
            .await
            .map_err(|e| AdminError::job(&build_id, e))?;
        info!(build_id = %build_id, config_path = %config_path, "Generation config updated");
        Ok(build_id)
    }

    #[instrument(skip(self), fields(target = %selector.describe()))]
    pub async fn suspend(&self, selector: &JobSelector) -> AdminResult<BuildId> {
        let (build_id, job) = self.registry.resolve(selector, false)?;
        job.suspend()
            .await
            .map_err(|e| AdminError::job(&build_id, e))?;
        info!(build_id = %build_id, "Generation suspended");
        Ok(build_id)
    }

    #[instrument(skip(self), fields(target = %selector.describe()))]
    pub async fn resume(&self, selector: &JobSelector) -> AdminResult<BuildId> {
        let (build_id, job) = self.registry.resolve(selector, false)?;
        job.resume()
            .await
            .map_err(|e| AdminError::job(&build_id, e))?;
        // The suspended period is not a stall.
        job.update_last_refresh_time();
        info!(build_id = %build_id, "Generation resumed");
        Ok(build_id)
    }

    /// Look up a generation by exact BuildId. Only the map is locked.
    pub fn get_generation(
        &self,
        build_id: &BuildId,
        include_history: bool,
    ) -> Option<Arc<dyn JobHandle>> {
        self.registry.get(build_id, include_history)
    }

    /// Look up a generation by free-form job id.
    pub fn find_generation(
        &self,
        job_id: &str,
        include_history: bool,
        fuzzy: bool,
    ) -> AdminResult<Option<JobEntry>> {
        self.registry.find(job_id, include_history, fuzzy)
    }

    pub fn service_info(&self, filter: &ServiceInfoFilter) -> ServiceInfo {
        let now = Utc::now();
        let jobs = if filter.include_stopped {
            self.registry.all()
        } else {
            self.registry.active()
        };

        let generations = jobs
            .iter()
            .filter(|(id, _)| filter.matches(id))
            .map(|(id, job)| GenerationInfo::of(id, job.as_ref()))
            .collect();

        ServiceInfo {
            recovered: self.is_recovered(),
            generations,
            starting: self.registry.starting(),
            recover_failed: self.registry.recover_failed(),
            prohibited_hosts: self.prohibited.snapshot(now),
            last_refresh_time: self.heartbeat.last_refresh(),
            last_schedule_time: self.heartbeat.last_schedule(),
        }
    }

    // ------------------------------------------------------------------------
    // Scheduling tick
    // ------------------------------------------------------------------------

    /// Run one scheduling tick.
    ///
    /// Collaborator failures are logged and left for the next tick; the tick
    /// itself never fails.
    pub async fn keep_service_once(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        // 1. Release slots generations gave up on, and prohibit their hosts.
        let releases: Vec<SlotRelease> = self
            .registry
            .active()
            .iter()
            .flat_map(|(_, job)| job.take_slot_releases())
            .collect();
        if !releases.is_empty() {
            for release in &releases {
                self.prohibited.insert(&release.host, &release.reason, now);
            }
            match self.scheduler.release_slots(&releases).await {
                Ok(()) => report.released_slots = releases.len(),
                Err(e) => warn!(error = %e, slots = releases.len(), "Failed to release slots"),
            }
        }

        let stopped = self.registry.stopped_active();
        report.retired = self.registry.retire(&stopped);
        for build_id in &stopped {
            info!(build_id = %build_id, "Stopped generation left the active set");
        }

        // 2. Compute the plan from a consistent snapshot.
        let active = self.registry.active();
        let plan = ResourcePlan::build(&active, self.prohibited.hosts(now), now);
        report.planned_workers = plan.total_workers();

        // 3. Hand it off as a whole.
        match self.scheduler.push_plan(&plan).await {
            Ok(()) => report.plan_pushed = true,
            Err(e) => {
                metrics::record_plan_push_failure();
                warn!(error = %e, plan_id = %plan.plan_id, "Failed to push resource plan");
            }
        }

        // 4. Heartbeat, and the periodic schedule timestamp re-sync.
        self.heartbeat.refresh(now);
        let since_sync = (now - self.heartbeat.last_schedule())
            .to_std()
            .unwrap_or_default();
        if since_sync >= self.config.counter_sync_interval {
            self.heartbeat.sync_schedule(now);
            for (build_id, job) in &active {
                if let Err(e) = job.sync_counters().await {
                    warn!(build_id = %build_id, error = %e, "Failed to sync counters");
                }
            }
            report.counters_synced = true;
        }

        debug!(
            active = active.len(),
            planned_workers = report.planned_workers,
            plan_pushed = report.plan_pushed,
            "Scheduling tick complete"
        );
        report
    }
}
