//! Bidirectional catalog id ↔ BuildId map.

use std::collections::BTreeMap;

use buildadmin_id::BuildId;
use parking_lot::Mutex;

use super::CatalogBuildId;

#[derive(Default)]
struct Maps {
    to_internal: BTreeMap<CatalogBuildId, BuildId>,
    to_external: BTreeMap<BuildId, CatalogBuildId>,
}

/// Shared between the reconciler, which rebuilds it every changed poll, and
/// the catalog-aware factory, which reads it when creating generations.
#[derive(Default)]
pub struct CatalogIdMap {
    maps: Mutex<Maps>,
}

impl CatalogIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mapping.
    pub fn replace(&self, entries: impl IntoIterator<Item = (CatalogBuildId, BuildId)>) {
        let mut fresh = Maps::default();
        for (external, internal) in entries {
            fresh.to_external.insert(internal.clone(), external.clone());
            fresh.to_internal.insert(external, internal);
        }
        *self.maps.lock() = fresh;
    }

    pub fn internal(&self, external: &CatalogBuildId) -> Option<BuildId> {
        self.maps.lock().to_internal.get(external).cloned()
    }

    pub fn external(&self, internal: &BuildId) -> Option<CatalogBuildId> {
        self.maps.lock().to_external.get(internal).cloned()
    }

    pub fn len(&self) -> usize {
        self.maps.lock().to_internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::transfer_build_id;

    #[test]
    fn test_replace_drops_old_entries() {
        let map = CatalogIdMap::new();
        let a = CatalogBuildId::new("c", "d", "a", 1);
        let b = CatalogBuildId::new("c", "d", "b", 1);

        map.replace([(a.clone(), transfer_build_id(&a).unwrap())]);
        map.replace([(b.clone(), transfer_build_id(&b).unwrap())]);

        assert_eq!(map.len(), 1);
        assert!(map.internal(&a).is_none());
        let internal = map.internal(&b).unwrap();
        assert_eq!(map.external(&internal), Some(b));
    }
}
