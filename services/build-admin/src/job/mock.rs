//! In-memory generation test double.
//!
//! Records every call and exposes switches to force failures, so loops can be
//! tested without a real build pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buildadmin_id::BuildId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    BuildType, JobContext, JobError, JobFactory, JobHandle, JobResult, RoleDemand, SlotRelease,
};

#[derive(Debug, Clone)]
struct MockState {
    build_type: BuildType,
    config_path: String,
    stopped: bool,
    stopping: bool,
    suspended: bool,
    index_deleted: bool,
    last_refresh: DateTime<Utc>,
    stop_timestamp: Option<DateTime<Utc>>,
    demands: Vec<RoleDemand>,
    releases: Vec<SlotRelease>,
    config_updates: Vec<String>,
    cleaned_versions: Vec<(String, u64)>,
    counters_cleared: usize,
}

pub struct MockJob {
    build_id: BuildId,
    state: Mutex<MockState>,
    /// When false, `delete_index` reports failure and the index stays.
    index_deletable: AtomicBool,
    fail_operations: AtomicBool,
    delete_index_calls: AtomicUsize,
}

impl MockJob {
    pub fn new(build_id: BuildId) -> Self {
        Self {
            build_id,
            state: Mutex::new(MockState {
                build_type: BuildType::DirectBuild,
                config_path: "/configs/default".to_string(),
                stopped: false,
                stopping: false,
                suspended: false,
                index_deleted: false,
                last_refresh: Utc::now(),
                stop_timestamp: None,
                demands: Vec::new(),
                releases: Vec::new(),
                config_updates: Vec::new(),
                cleaned_versions: Vec::new(),
                counters_cleared: 0,
            }),
            index_deletable: AtomicBool::new(true),
            fail_operations: AtomicBool::new(false),
            delete_index_calls: AtomicUsize::new(0),
        }
    }

    pub fn parse(build_id: &str) -> Self {
        Self::new(BuildId::parse(build_id).expect("valid build id"))
    }

    pub fn from_context(ctx: &JobContext) -> Self {
        let job = Self::new(ctx.build_id.clone());
        {
            let mut state = job.state.lock();
            state.build_type = ctx.build_type;
            state.config_path = ctx.config_path.clone();
        }
        job
    }

    /// A generation that already stopped at `stopped_at`.
    pub fn stopped_at(build_id: &str, stopped_at: DateTime<Utc>) -> Self {
        let job = Self::parse(build_id);
        {
            let mut state = job.state.lock();
            state.stopped = true;
            state.stop_timestamp = Some(stopped_at);
        }
        job
    }

    pub fn with_build_type(self, build_type: BuildType) -> Self {
        self.state.lock().build_type = build_type;
        self
    }

    pub fn with_config_path(self, config_path: &str) -> Self {
        self.state.lock().config_path = config_path.to_string();
        self
    }

    pub fn with_demands(self, demands: Vec<RoleDemand>) -> Self {
        self.state.lock().demands = demands;
        self
    }

    pub fn set_last_refresh(&self, at: DateTime<Utc>) {
        self.state.lock().last_refresh = at;
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.state.lock().stopped = stopped;
    }

    pub fn set_index_deleted(&self, deleted: bool) {
        self.state.lock().index_deleted = deleted;
    }

    pub fn set_index_deletable(&self, deletable: bool) {
        self.index_deletable.store(deletable, Ordering::SeqCst);
    }

    pub fn set_fail_operations(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    pub fn push_release(&self, release: SlotRelease) {
        self.state.lock().releases.push(release);
    }

    pub fn config_updates(&self) -> Vec<String> {
        self.state.lock().config_updates.clone()
    }

    pub fn cleaned_versions(&self) -> Vec<(String, u64)> {
        self.state.lock().cleaned_versions.clone()
    }

    pub fn delete_index_calls(&self) -> usize {
        self.delete_index_calls.load(Ordering::SeqCst)
    }

    pub fn counters_cleared(&self) -> usize {
        self.state.lock().counters_cleared
    }

    fn check(&self) -> JobResult<()> {
        if self.fail_operations.load(Ordering::SeqCst) {
            return Err(JobError::Failed("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandle for MockJob {
    fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    fn build_type(&self) -> BuildType {
        self.state.lock().build_type
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    fn last_refresh_time(&self) -> DateTime<Utc> {
        self.state.lock().last_refresh
    }

    fn stop_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().stop_timestamp
    }

    fn config_path(&self) -> String {
        self.state.lock().config_path.clone()
    }

    fn update_last_refresh_time(&self) {
        self.state.lock().last_refresh = Utc::now();
    }

    fn clear_counters(&self) {
        self.state.lock().counters_cleared += 1;
    }

    fn is_index_deleted(&self) -> bool {
        self.state.lock().index_deleted
    }

    fn role_demands(&self) -> Vec<RoleDemand> {
        let state = self.state.lock();
        if state.stopped || state.suspended {
            Vec::new()
        } else {
            state.demands.clone()
        }
    }

    fn take_slot_releases(&self) -> Vec<SlotRelease> {
        std::mem::take(&mut self.state.lock().releases)
    }

    async fn start(&self) -> JobResult<()> {
        self.check()
    }

    async fn stop(&self) -> JobResult<()> {
        self.check()?;
        let mut state = self.state.lock();
        state.stopped = true;
        state.stop_timestamp.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn suspend(&self) -> JobResult<()> {
        self.check()?;
        self.state.lock().suspended = true;
        Ok(())
    }

    async fn resume(&self) -> JobResult<()> {
        self.check()?;
        self.state.lock().suspended = false;
        Ok(())
    }

    async fn update_config(&self, config_path: &str) -> JobResult<()> {
        self.check()?;
        let mut state = self.state.lock();
        state.config_path = config_path.to_string();
        state.config_updates.push(config_path.to_string());
        Ok(())
    }

    async fn sync_counters(&self) -> JobResult<()> {
        self.check()
    }

    async fn delete_index(&self) -> JobResult<bool> {
        self.delete_index_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if !self.index_deletable.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.state.lock().index_deleted = true;
        Ok(true)
    }

    async fn delete_temp_artifacts(&self) -> JobResult<bool> {
        self.check()?;
        Ok(false)
    }

    async fn clean_versions(&self, cluster: &str, version: u64) -> bool {
        self.state
            .lock()
            .cleaned_versions
            .push((cluster.to_string(), version));
        !self.fail_operations.load(Ordering::SeqCst)
    }
}

/// Factory producing [`MockJob`]s and remembering them.
#[derive(Default)]
pub struct MockJobFactory {
    created: Mutex<BTreeMap<BuildId, Arc<MockJob>>>,
    recoverable: Mutex<BTreeMap<BuildId, Arc<MockJob>>>,
    recover_failures: Mutex<BTreeSet<BuildId>>,
    create_calls: AtomicUsize,
    recover_calls: AtomicUsize,
    start_delay: Mutex<Option<Duration>>,
    fail_starts: AtomicBool,
}

impl MockJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `create` call, to widen race windows in tests.
    pub fn with_start_delay(self, delay: Duration) -> Self {
        *self.start_delay.lock() = Some(delay);
        self
    }

    pub fn set_fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Make `recover` return this job for its BuildId.
    pub fn add_recoverable(&self, job: Arc<MockJob>) {
        self.recoverable
            .lock()
            .insert(job.build_id().clone(), job);
    }

    /// Make `recover` fail for this BuildId.
    pub fn fail_recovery(&self, build_id: BuildId) {
        self.recover_failures.lock().insert(build_id);
    }

    pub fn created(&self, build_id: &BuildId) -> Option<Arc<MockJob>> {
        self.created.lock().get(build_id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn recover_calls(&self) -> usize {
        self.recover_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobFactory for MockJobFactory {
    async fn create(&self, ctx: JobContext) -> JobResult<Arc<dyn JobHandle>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let job = Arc::new(MockJob::from_context(&ctx));
        job.set_fail_operations(self.fail_starts.load(Ordering::SeqCst));
        self.created
            .lock()
            .insert(ctx.build_id.clone(), Arc::clone(&job));
        debug!(build_id = %ctx.build_id, "[MOCK] Created generation");
        Ok(job)
    }

    async fn recover(&self, build_id: &BuildId) -> JobResult<Arc<dyn JobHandle>> {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
        if self.recover_failures.lock().contains(build_id) {
            return Err(JobError::Failed(format!("[MOCK] cannot recover {build_id}")));
        }
        let job = self.recoverable.lock().get(build_id).cloned();
        match job {
            Some(job) => Ok(job),
            None => Err(JobError::NotRecoverable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_job_records_calls() {
        let job = MockJob::parse("a:t:1");
        job.update_config("/c2").await.unwrap();
        assert!(job.clean_versions("c1", 5).await);

        assert_eq!(job.config_updates(), vec!["/c2"]);
        assert_eq!(job.cleaned_versions(), vec![("c1".to_string(), 5)]);
        assert_eq!(job.config_path(), "/c2");
    }

    #[tokio::test]
    async fn test_mock_job_undeletable_index() {
        let job = MockJob::parse("a:t:1");
        job.set_index_deletable(false);
        assert!(!job.delete_index().await.unwrap());
        assert!(!job.is_index_deleted());
        assert_eq!(job.delete_index_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_factory_recover() {
        let factory = MockJobFactory::new();
        let id = BuildId::parse("a:t:1").unwrap();
        assert!(matches!(
            factory.recover(&id).await,
            Err(JobError::NotRecoverable)
        ));

        factory.add_recoverable(Arc::new(MockJob::new(id.clone())));
        assert!(factory.recover(&id).await.is_ok());
        assert_eq!(factory.recover_calls(), 2);
    }
}
