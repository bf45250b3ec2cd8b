//! In-memory catalog for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BuildTarget, CatalogBuildId, CatalogClient, CatalogCurrent, CatalogError, CatalogResult,
    CatalogTarget,
};

#[derive(Default)]
pub struct MockCatalog {
    targets: Mutex<BTreeMap<CatalogBuildId, CatalogTarget>>,
    updates: Mutex<Vec<(CatalogBuildId, CatalogCurrent)>>,
    list_calls: AtomicUsize,
    unavailable: AtomicBool,
    fail_updates: AtomicBool,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&self, id: CatalogBuildId, target: CatalogTarget) {
        self.targets.lock().insert(id, target);
    }

    pub fn remove_target(&self, id: &CatalogBuildId) {
        self.targets.lock().remove(id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Every successful `update_build_current`, in call order.
    pub fn updates(&self) -> Vec<(CatalogBuildId, CatalogCurrent)> {
        self.updates.lock().clone()
    }

    pub fn last_update(&self, id: &CatalogBuildId) -> Option<CatalogCurrent> {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|(updated, _)| updated == id)
            .map(|(_, current)| current.clone())
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    async fn list_build_targets(&self) -> CatalogResult<Vec<BuildTarget>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("[MOCK] catalog down".to_string()));
        }
        Ok(self
            .targets
            .lock()
            .iter()
            .map(|(id, target)| BuildTarget {
                id: id.clone(),
                target: target.clone(),
            })
            .collect())
    }

    async fn update_build_current(
        &self,
        id: &CatalogBuildId,
        current: &CatalogCurrent,
    ) -> CatalogResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("[MOCK] update rejected".to_string()));
        }
        self.updates.lock().push((id.clone(), current.clone()));
        Ok(())
    }
}
