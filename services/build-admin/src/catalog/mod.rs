//! Catalog-driven reconciliation.
//!
//! An external catalog declares which builds should run, keyed by its own
//! four-part id. The reconciler polls it, maps each external id onto a
//! [`BuildId`], drives the orchestrator toward the declared state and reports
//! the observed outcome back.

mod client;
mod factory;
mod id_map;
mod mock;
mod reconciler;

use std::fmt;

use async_trait::async_trait;
use buildadmin_id::{BuildId, GenerationId, IdError};
use serde::{Deserialize, Serialize};

pub use client::HttpCatalogClient;
pub use factory::CatalogAwareFactory;
pub use id_map::CatalogIdMap;
pub use mock::MockCatalog;
pub use reconciler::{CatalogReconciler, CatalogWorker, ReconcileReport};

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("catalog id cannot be mapped: {0}")]
    InvalidId(#[from] IdError),
}

/// The catalog's identifier for one build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CatalogBuildId {
    pub catalog_name: String,
    pub database_name: String,
    pub table_name: String,
    pub generation_id: u32,
}

impl CatalogBuildId {
    pub fn new(catalog: &str, database: &str, table: &str, generation_id: u32) -> Self {
        Self {
            catalog_name: catalog.to_string(),
            database_name: database.to_string(),
            table_name: table.to_string(),
            generation_id,
        }
    }
}

impl fmt::Display for CatalogBuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.catalog_name, self.database_name, self.table_name, self.generation_id
        )
    }
}

/// Map a catalog id onto the internal BuildId.
///
/// The app name is `catalog.database`. The mapping is not injective when
/// names contain dots, so the reverse direction always goes through a
/// [`CatalogIdMap`].
pub fn transfer_build_id(id: &CatalogBuildId) -> Result<BuildId, IdError> {
    let app_name = format!("{}.{}", id.catalog_name, id.database_name);
    BuildId::new(
        app_name.as_str(),
        id.table_name.as_str(),
        GenerationId::new(id.generation_id),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogBuildType {
    #[default]
    Unspecified,
    BatchBuild,
    DirectBuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    #[default]
    Unspecified,
    Running,
    Stopped,
}

/// Desired state of one build as declared by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogTarget {
    #[serde(default)]
    pub build_type: CatalogBuildType,
    #[serde(default)]
    pub state: TargetState,
    #[serde(default)]
    pub config_path: String,
}

impl CatalogTarget {
    pub fn running_batch(config_path: &str) -> Self {
        Self {
            build_type: CatalogBuildType::BatchBuild,
            state: TargetState::Running,
            config_path: config_path.to_string(),
        }
    }

    pub fn stopped_batch() -> Self {
        Self {
            build_type: CatalogBuildType::BatchBuild,
            state: TargetState::Stopped,
            config_path: String::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.build_type != CatalogBuildType::Unspecified
            && self.state != TargetState::Unspecified
            && (self.state != TargetState::Running || !self.config_path.trim().is_empty())
    }

    pub fn is_running_batch(&self) -> bool {
        self.build_type == CatalogBuildType::BatchBuild && self.state == TargetState::Running
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub id: CatalogBuildId,
    pub target: CatalogTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentState {
    Running,
    Stopped,
    Failed,
}

/// Observed state reported back to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCurrent {
    pub state: CurrentState,
    pub config_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_build_targets(&self) -> CatalogResult<Vec<BuildTarget>>;

    async fn update_build_current(
        &self,
        id: &CatalogBuildId,
        current: &CatalogCurrent,
    ) -> CatalogResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_transfer_build_id() {
        let id = CatalogBuildId::new("hive", "sales", "orders", 7);
        let build_id = transfer_build_id(&id).unwrap();
        assert_eq!(build_id.to_string(), "hive.sales:orders:7");
    }

    #[test]
    fn test_transfer_rejects_unmappable_names() {
        let id = CatalogBuildId::new("hive", "sales", "or:ders", 7);
        assert!(transfer_build_id(&id).is_err());
    }

    #[rstest]
    #[case(CatalogTarget::running_batch("/c"), true, true)]
    #[case(CatalogTarget::running_batch(""), false, true)]
    #[case(CatalogTarget::stopped_batch(), true, false)]
    #[case(CatalogTarget::default(), false, false)]
    #[case(
        CatalogTarget {
            build_type: CatalogBuildType::DirectBuild,
            state: TargetState::Running,
            config_path: "/c".to_string(),
        },
        true,
        false
    )]
    fn test_target_classification(
        #[case] target: CatalogTarget,
        #[case] valid: bool,
        #[case] running_batch: bool,
    ) {
        assert_eq!(target.is_valid(), valid);
        assert_eq!(target.is_running_batch(), running_batch);
    }

    #[test]
    fn test_target_json_defaults() {
        let target: CatalogTarget = serde_json::from_str(r#"{"state": "running"}"#).unwrap();
        assert_eq!(target.build_type, CatalogBuildType::Unspecified);
        assert!(!target.is_valid());
    }
}
