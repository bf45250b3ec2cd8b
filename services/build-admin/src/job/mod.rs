//! Capability interface over one generation's lifecycle.
//!
//! The admin core never looks inside a generation's build pipeline. It only
//! drives it through [`JobHandle`] and creates it through a [`JobFactory`]
//! injected into the orchestrator.
//!
//! Handles are shared (`Arc<dyn JobHandle>`) between the job maps, the
//! liveness monitor, the GC sweeps and in-flight requests, and must be
//! internally thread-safe. The synchronous accessors are expected to be fast;
//! anything touching storage is async.

mod mock;
mod store_generation;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use buildadmin_id::BuildId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use mock::{MockJob, MockJobFactory};
pub use store_generation::{GenerationStatus, Lifecycle, StoreGeneration, StoreGenerationFactory};

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("generation is not running")]
    NotRunning,

    #[error("generation has no recoverable state")]
    NotRecoverable,

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("corrupt generation state: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// How a generation came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    /// Declared by the catalog and kept in sync with it.
    BatchBuild,
    /// Started directly over RPC; exempt from catalog control.
    DirectBuild,
}

impl BuildType {
    pub fn is_catalog_managed(&self) -> bool {
        matches!(self, Self::BatchBuild)
    }
}

/// One worker role a generation needs in the resource plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDemand {
    pub role_name: String,
    pub count: u32,
    pub cpu_millis: u32,
    pub memory_mb: u64,
}

/// A slot a generation wants released, and the host it blames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRelease {
    pub slot_id: String,
    pub role_name: String,
    pub host: String,
    pub reason: String,
}

/// Construction context handed to a [`JobFactory`].
#[derive(Debug, Clone)]
pub struct JobContext {
    pub build_id: BuildId,
    pub config_path: String,
    pub build_type: BuildType,
    pub params: BTreeMap<String, String>,
    /// External id of catalog-managed generations.
    pub catalog_id: Option<String>,
}

impl JobContext {
    pub fn new(build_id: BuildId, config_path: impl Into<String>, build_type: BuildType) -> Self {
        Self {
            build_id,
            config_path: config_path.into(),
            build_type,
            params: BTreeMap::new(),
            catalog_id: None,
        }
    }
}

#[async_trait]
pub trait JobHandle: Send + Sync {
    fn build_id(&self) -> &BuildId;

    fn build_type(&self) -> BuildType;

    fn is_stopped(&self) -> bool;

    fn is_stopping(&self) -> bool;

    fn is_suspended(&self) -> bool;

    /// Last time the generation made observable progress.
    fn last_refresh_time(&self) -> DateTime<Utc>;

    /// When the generation stopped, if it has.
    fn stop_timestamp(&self) -> Option<DateTime<Utc>>;

    fn config_path(&self) -> String;

    /// Reset the progress clock, e.g. after a legitimate pause.
    fn update_last_refresh_time(&self);

    /// Drop in-memory counters; persisted counter snapshots are kept.
    fn clear_counters(&self);

    fn is_index_deleted(&self) -> bool;

    /// Worker roles this generation currently needs.
    fn role_demands(&self) -> Vec<RoleDemand>;

    /// Slots the generation wants released since the last call.
    fn take_slot_releases(&self) -> Vec<SlotRelease>;

    async fn start(&self) -> JobResult<()>;

    async fn stop(&self) -> JobResult<()>;

    async fn suspend(&self) -> JobResult<()>;

    async fn resume(&self) -> JobResult<()>;

    async fn update_config(&self, config_path: &str) -> JobResult<()>;

    /// Persist counter snapshots under the generation's counters directory.
    async fn sync_counters(&self) -> JobResult<()>;

    /// Delete the generation's index data. Returns whether it is now deleted.
    async fn delete_index(&self) -> JobResult<bool>;

    /// Delete temporary build artifacts. Returns whether anything was removed.
    async fn delete_temp_artifacts(&self) -> JobResult<bool>;

    /// Remove one index version of one cluster.
    async fn clean_versions(&self, cluster: &str, version: u64) -> bool;
}

/// Creates and recovers generations.
#[async_trait]
pub trait JobFactory: Send + Sync {
    /// Create a fresh, not yet started generation.
    async fn create(&self, ctx: JobContext) -> JobResult<Arc<dyn JobHandle>>;

    /// Rebuild a generation from the coordination store after a restart.
    async fn recover(&self, build_id: &BuildId) -> JobResult<Arc<dyn JobHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_type_serialization() {
        assert_eq!(
            serde_json::to_string(&BuildType::BatchBuild).unwrap(),
            "\"batch_build\""
        );
        assert!(BuildType::BatchBuild.is_catalog_managed());
        assert!(!BuildType::DirectBuild.is_catalog_managed());
    }
}
