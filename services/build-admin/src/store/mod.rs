//! Coordination store access.
//!
//! The coordination store is a hierarchical, consistently readable key/value
//! store (ZooKeeper-like) holding one directory per generation:
//!
//! ```text
//! generations/<app>/<table>/<generation>/
//! ├── status      status marker, always kept while the generation is tracked
//! ├── counters/   counter snapshots, never removed
//! └── ...         generation-specific build metadata (opaque here)
//! ```

mod fs;
mod memory;

use async_trait::async_trait;
use buildadmin_id::{BuildId, GenerationId};
use tracing::debug;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Root directory of all generation directories.
pub const GENERATIONS_ROOT: &str = "generations";

/// Status marker file inside a generation directory.
pub const STATUS_FILE: &str = "status";

/// Counter subdirectory inside a generation directory.
pub const COUNTERS_DIR: &str = "counters";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store path '{0}'")]
    InvalidPath(String),

    #[error("corrupt node '{path}': {message}")]
    Corrupt { path: String, message: String },

    #[error("coordination store unavailable")]
    Unavailable,
}

impl StoreError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Read/list/delete primitives over the coordination store.
///
/// Paths are relative and `/`-separated. Directories are created implicitly
/// by `write`. `list` and `remove` on a missing path are not errors.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a node's data, or `None` if it does not exist.
    async fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Create or overwrite a node, creating ancestors as needed.
    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Names of the direct children of `path`, sorted.
    async fn list(&self, path: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Create an (empty) directory node and its ancestors.
    async fn mkdir(&self, path: &str) -> StoreResult<()>;

    /// Recursively remove a node.
    async fn remove(&self, path: &str) -> StoreResult<()>;
}

/// Validate and normalize a store path.
pub(crate) fn normalize(path: &str) -> StoreResult<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), child)
    }
}

/// Directory of one generation.
pub fn generation_dir(build_id: &BuildId) -> String {
    format!(
        "{GENERATIONS_ROOT}/{}/{}/{}",
        build_id.app_name(),
        build_id.data_table(),
        build_id.generation_id()
    )
}

pub fn status_path(build_id: &BuildId) -> String {
    join(&generation_dir(build_id), STATUS_FILE)
}

pub fn counters_dir(build_id: &BuildId) -> String {
    join(&generation_dir(build_id), COUNTERS_DIR)
}

/// Enumerate every BuildId that still has a status marker.
///
/// Directories that do not parse as a BuildId, or that only retain their
/// counters, are skipped.
pub async fn list_build_ids(store: &dyn CoordinationStore) -> StoreResult<Vec<BuildId>> {
    let mut ids = Vec::new();

    for app in store.list(GENERATIONS_ROOT).await? {
        let app_dir = join(GENERATIONS_ROOT, &app);
        for table in store.list(&app_dir).await? {
            let table_dir = join(&app_dir, &table);
            for generation in store.list(&table_dir).await? {
                let Ok(generation_id) = generation.parse::<GenerationId>() else {
                    debug!(path = %join(&table_dir, &generation), "Skipping non-generation node");
                    continue;
                };
                let Ok(build_id) = BuildId::new(app.as_str(), table.as_str(), generation_id)
                else {
                    debug!(app = %app, table = %table, "Skipping invalid generation directory");
                    continue;
                };
                if store.exists(&status_path(&build_id)).await? {
                    ids.push(build_id);
                }
            }
        }
    }

    ids.sort();
    Ok(ids)
}

/// Remove every child of `dir` except those named in `keep`.
///
/// Returns the number of removed children.
pub async fn retain_children(
    store: &dyn CoordinationStore,
    dir: &str,
    keep: &[&str],
) -> StoreResult<usize> {
    let mut removed = 0;
    for child in store.list(dir).await? {
        if keep.contains(&child.as_str()) {
            continue;
        }
        store.remove(&join(dir, &child)).await?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/").unwrap(), "a/b");
        assert_eq!(normalize("").unwrap(), "");
        assert!(normalize("a/../b").is_err());
    }

    #[test]
    fn test_generation_layout() {
        let id = BuildId::parse("shop:orders:7").unwrap();
        assert_eq!(generation_dir(&id), "generations/shop/orders/7");
        assert_eq!(status_path(&id), "generations/shop/orders/7/status");
        assert_eq!(counters_dir(&id), "generations/shop/orders/7/counters");
    }

    #[tokio::test]
    async fn test_list_build_ids_requires_status_marker() {
        let store = MemoryStore::new();
        let live = BuildId::parse("shop:orders:7").unwrap();
        let purged = BuildId::parse("shop:orders:3").unwrap();

        store.write(&status_path(&live), b"{}").await.unwrap();
        store.mkdir(&counters_dir(&purged)).await.unwrap();
        store
            .write("generations/shop/orders/not-a-number/status", b"{}")
            .await
            .unwrap();

        let ids = list_build_ids(&store).await.unwrap();
        assert_eq!(ids, vec![live]);
    }

    #[tokio::test]
    async fn test_retain_children() {
        let store = MemoryStore::new();
        store.write("job/status", b"stopped").await.unwrap();
        store.mkdir("job/counters").await.unwrap();
        store.write("job/config", b"x").await.unwrap();
        store.write("job/checkpoints/1", b"y").await.unwrap();

        let removed = retain_children(&store, "job", &[STATUS_FILE, COUNTERS_DIR])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.list("job").await.unwrap(), vec!["counters", "status"]);
    }
}
