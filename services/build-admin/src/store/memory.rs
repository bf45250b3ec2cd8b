//! In-memory coordination store.
//!
//! Every node may carry data and children, as in ZooKeeper. Used by tests and
//! by development setups that do not need persistence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{normalize, CoordinationStore, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of nodes, directories included.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    fn check(&self, path: &str) -> StoreResult<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        normalize(path)
    }
}

fn insert_ancestors(nodes: &mut BTreeMap<String, Vec<u8>>, path: &str) {
    let mut end = 0;
    while let Some(pos) = path[end..].find('/') {
        end += pos;
        nodes.entry(path[..end].to_string()).or_default();
        end += 1;
    }
}

fn is_descendant(candidate: &str, parent: &str) -> bool {
    parent.is_empty()
        || candidate
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.check(path)?;
        Ok(self.nodes.lock().get(&path).cloned())
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.check(path)?;
        if path.is_empty() {
            return Err(StoreError::InvalidPath(path));
        }
        let mut nodes = self.nodes.lock();
        insert_ancestors(&mut nodes, &path);
        nodes.insert(path, data.to_vec());
        Ok(())
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        let path = self.check(path)?;
        let nodes = self.nodes.lock();
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let path = self.check(path)?;
        Ok(self.nodes.lock().contains_key(&path))
    }

    async fn mkdir(&self, path: &str) -> StoreResult<()> {
        let path = self.check(path)?;
        if path.is_empty() {
            return Ok(());
        }
        let mut nodes = self.nodes.lock();
        insert_ancestors(&mut nodes, &path);
        nodes.entry(path).or_default();
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = self.check(path)?;
        let mut nodes = self.nodes.lock();
        nodes.retain(|key, _| key != &path && !is_descendant(key, &path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_ancestors() {
        let store = MemoryStore::new();
        store.write("a/b/c", b"data").await.unwrap();

        assert!(store.exists("a").await.unwrap());
        assert!(store.exists("a/b").await.unwrap());
        assert_eq!(store.read("a/b/c").await.unwrap(), Some(b"data".to_vec()));
        assert_eq!(store.list("a").await.unwrap(), vec!["b"]);
        assert_eq!(store.list("").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_remove_is_recursive_and_prefix_safe() {
        let store = MemoryStore::new();
        store.write("gen/1/status", b"x").await.unwrap();
        store.write("gen/10/status", b"y").await.unwrap();

        store.remove("gen/1").await.unwrap();

        assert!(!store.exists("gen/1/status").await.unwrap());
        assert!(store.exists("gen/10/status").await.unwrap());
        assert_eq!(store.list("gen").await.unwrap(), vec!["10"]);
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let store = MemoryStore::new();
        assert_eq!(store.read("nope").await.unwrap(), None);
        assert!(store.list("nope").await.unwrap().is_empty());
        store.remove("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.read("a").await,
            Err(StoreError::Unavailable)
        ));
    }
}
