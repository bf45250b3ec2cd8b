//! Generation backed by the coordination store.
//!
//! Keeps the lifecycle in a JSON status marker so that a restarted admin can
//! recover it, snapshots counters under `counters/`, and keeps index data in
//! a separate index store laid out as `<app>/<table>/<generation>/<cluster>/<version>`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use buildadmin_id::BuildId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    BuildType, JobContext, JobError, JobFactory, JobHandle, JobResult, RoleDemand, SlotRelease,
};
use crate::store::{self, CoordinationStore};

const CONFIG_FILE: &str = "config";
const TEMP_DIR: &str = "temp";
const DEFAULT_BUILDER_COUNT: u32 = 1;
const BUILDER_CPU_MILLIS: u32 = 2000;
const BUILDER_MEMORY_MB: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Running,
    Suspended,
    Stopping,
    Stopped,
}

/// Content of the status marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub lifecycle: Lifecycle,
    pub build_type: BuildType,
    pub config_path: String,
    pub builder_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub index_deleted: bool,
}

struct Inner {
    status: GenerationStatus,
    counters: BTreeMap<String, i64>,
    pending_releases: Vec<SlotRelease>,
}

pub struct StoreGeneration {
    build_id: BuildId,
    meta: Arc<dyn CoordinationStore>,
    index: Arc<dyn CoordinationStore>,
    inner: Mutex<Inner>,
    transitions: tokio::sync::Mutex<()>,
    last_refresh_ms: AtomicI64,
}

impl StoreGeneration {
    fn new(
        build_id: BuildId,
        status: GenerationStatus,
        meta: Arc<dyn CoordinationStore>,
        index: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            build_id,
            meta,
            index,
            inner: Mutex::new(Inner {
                status,
                counters: BTreeMap::new(),
                pending_releases: Vec::new(),
            }),
            transitions: tokio::sync::Mutex::new(()),
            last_refresh_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn status(&self) -> GenerationStatus {
        self.inner.lock().status.clone()
    }

    /// Add to a named counter; flushed on the next `sync_counters`.
    pub fn increment_counter(&self, name: &str, delta: i64) {
        *self.inner.lock().counters.entry(name.to_string()).or_default() += delta;
    }

    /// Ask the orchestrator to release a slot on its next tick.
    pub fn report_bad_slot(&self, release: SlotRelease) {
        self.inner.lock().pending_releases.push(release);
    }

    fn index_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.build_id.app_name(),
            self.build_id.data_table(),
            self.build_id.generation_id()
        )
    }

    fn dir(&self) -> String {
        store::generation_dir(&self.build_id)
    }

    /// Apply `update` to the status and persist it.
    ///
    /// Transitions are serialized. The in-memory status only changes once
    /// the store write succeeded, so a failed write leaves both untouched.
    async fn transition<F>(&self, update: F) -> JobResult<()>
    where
        F: FnOnce(&mut GenerationStatus) -> JobResult<()>,
    {
        let _serial = self.transitions.lock().await;
        let mut next = self.inner.lock().status.clone();
        update(&mut next)?;

        let data = serde_json::to_vec(&next)?;
        self.meta
            .write(&store::status_path(&self.build_id), &data)
            .await?;
        self.inner.lock().status = next;
        Ok(())
    }

    fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().status.lifecycle
    }
}

#[async_trait]
impl JobHandle for StoreGeneration {
    fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    fn build_type(&self) -> BuildType {
        self.inner.lock().status.build_type
    }

    fn is_stopped(&self) -> bool {
        self.lifecycle() == Lifecycle::Stopped
    }

    fn is_stopping(&self) -> bool {
        self.lifecycle() == Lifecycle::Stopping
    }

    fn is_suspended(&self) -> bool {
        self.lifecycle() == Lifecycle::Suspended
    }

    fn last_refresh_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_refresh_ms.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    fn stop_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().status.stop_timestamp
    }

    fn config_path(&self) -> String {
        self.inner.lock().status.config_path.clone()
    }

    fn update_last_refresh_time(&self) {
        self.last_refresh_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn clear_counters(&self) {
        self.inner.lock().counters.clear();
    }

    fn is_index_deleted(&self) -> bool {
        self.inner.lock().status.index_deleted
    }

    fn role_demands(&self) -> Vec<RoleDemand> {
        let inner = self.inner.lock();
        if inner.status.lifecycle != Lifecycle::Running {
            return Vec::new();
        }
        vec![RoleDemand {
            role_name: format!("{}.builder", self.build_id),
            count: inner.status.builder_count,
            cpu_millis: BUILDER_CPU_MILLIS,
            memory_mb: BUILDER_MEMORY_MB,
        }]
    }

    fn take_slot_releases(&self) -> Vec<SlotRelease> {
        std::mem::take(&mut self.inner.lock().pending_releases)
    }

    async fn start(&self) -> JobResult<()> {
        let config_path = self.config_path();
        if config_path.trim().is_empty() {
            return Err(JobError::InvalidConfig("config path is empty".to_string()));
        }

        self.meta
            .mkdir(&store::counters_dir(&self.build_id))
            .await?;
        self.meta
            .write(&store::join(&self.dir(), CONFIG_FILE), config_path.as_bytes())
            .await?;
        self.transition(|status| {
            status.lifecycle = Lifecycle::Running;
            Ok(())
        })
        .await?;
        self.update_last_refresh_time();

        info!(build_id = %self.build_id, config_path = %config_path, "Generation started");
        Ok(())
    }

    async fn stop(&self) -> JobResult<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.transition(|status| {
            status.lifecycle = Lifecycle::Stopped;
            status.stop_timestamp = Some(Utc::now());
            Ok(())
        })
        .await?;
        info!(build_id = %self.build_id, "Generation stopped");
        Ok(())
    }

    async fn suspend(&self) -> JobResult<()> {
        self.transition(|status| match status.lifecycle {
            Lifecycle::Running | Lifecycle::Suspended => {
                status.lifecycle = Lifecycle::Suspended;
                Ok(())
            }
            _ => Err(JobError::NotRunning),
        })
        .await
    }

    async fn resume(&self) -> JobResult<()> {
        self.transition(|status| match status.lifecycle {
            Lifecycle::Running | Lifecycle::Suspended => {
                status.lifecycle = Lifecycle::Running;
                Ok(())
            }
            _ => Err(JobError::NotRunning),
        })
        .await?;
        self.update_last_refresh_time();
        Ok(())
    }

    async fn update_config(&self, config_path: &str) -> JobResult<()> {
        if config_path.trim().is_empty() {
            return Err(JobError::InvalidConfig("config path is empty".to_string()));
        }
        self.transition(|status| {
            if status.lifecycle == Lifecycle::Stopped {
                return Err(JobError::NotRunning);
            }
            status.config_path = config_path.to_string();
            Ok(())
        })
        .await?;
        self.meta
            .write(&store::join(&self.dir(), CONFIG_FILE), config_path.as_bytes())
            .await?;
        Ok(())
    }

    async fn sync_counters(&self) -> JobResult<()> {
        let counters = self.inner.lock().counters.clone();
        let dir = store::counters_dir(&self.build_id);
        for (name, value) in counters {
            self.meta
                .write(&store::join(&dir, &name), value.to_string().as_bytes())
                .await?;
        }
        if !self.is_stopped() {
            self.update_last_refresh_time();
        }
        Ok(())
    }

    async fn delete_index(&self) -> JobResult<bool> {
        if self.is_index_deleted() {
            return Ok(true);
        }
        self.index.remove(&self.index_dir()).await?;
        self.transition(|status| {
            status.index_deleted = true;
            Ok(())
        })
        .await?;
        info!(build_id = %self.build_id, "Index data deleted");
        Ok(true)
    }

    async fn delete_temp_artifacts(&self) -> JobResult<bool> {
        let temp = store::join(&self.dir(), TEMP_DIR);
        if !self.meta.exists(&temp).await? {
            return Ok(false);
        }
        self.meta.remove(&temp).await?;
        debug!(build_id = %self.build_id, "Temporary artifacts deleted");
        Ok(true)
    }

    async fn clean_versions(&self, cluster: &str, version: u64) -> bool {
        let path = format!("{}/{}/{}", self.index_dir(), cluster, version);
        match self.index.remove(&path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    build_id = %self.build_id,
                    cluster = %cluster,
                    version,
                    error = %e,
                    "Failed to clean index version"
                );
                false
            }
        }
    }
}

/// Factory for [`StoreGeneration`]s.
pub struct StoreGenerationFactory {
    meta: Arc<dyn CoordinationStore>,
    index: Arc<dyn CoordinationStore>,
}

impl StoreGenerationFactory {
    pub fn new(meta: Arc<dyn CoordinationStore>, index: Arc<dyn CoordinationStore>) -> Self {
        Self { meta, index }
    }
}

#[async_trait]
impl JobFactory for StoreGenerationFactory {
    async fn create(&self, ctx: JobContext) -> JobResult<Arc<dyn JobHandle>> {
        let builder_count = match ctx.params.get("builder_count") {
            Some(raw) => raw
                .parse()
                .map_err(|_| JobError::InvalidConfig(format!("builder_count '{raw}'")))?,
            None => DEFAULT_BUILDER_COUNT,
        };

        let status = GenerationStatus {
            lifecycle: Lifecycle::Created,
            build_type: ctx.build_type,
            config_path: ctx.config_path,
            builder_count,
            catalog_id: ctx.catalog_id,
            stop_timestamp: None,
            index_deleted: false,
        };

        Ok(Arc::new(StoreGeneration::new(
            ctx.build_id,
            status,
            Arc::clone(&self.meta),
            Arc::clone(&self.index),
        )))
    }

    async fn recover(&self, build_id: &BuildId) -> JobResult<Arc<dyn JobHandle>> {
        let Some(data) = self.meta.read(&store::status_path(build_id)).await? else {
            return Err(JobError::NotRecoverable);
        };
        let mut status: GenerationStatus = serde_json::from_slice(&data)?;

        // A stop that was in flight when the previous admin died is final.
        if status.lifecycle == Lifecycle::Stopping {
            status.lifecycle = Lifecycle::Stopped;
            status.stop_timestamp.get_or_insert_with(Utc::now);
        }

        debug!(build_id = %build_id, lifecycle = ?status.lifecycle, "Recovered generation status");
        Ok(Arc::new(StoreGeneration::new(
            build_id.clone(),
            status,
            Arc::clone(&self.meta),
            Arc::clone(&self.index),
        )))
    }
}
