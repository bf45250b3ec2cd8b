//! The shared job maps.
//!
//! Two maps from BuildId to handle, `active` and `all`, plus the `starting`
//! and `recover_failed` sets, all behind one mutex. `active` is always a
//! subset of `all`. The lock is a `parking_lot` mutex whose guard is not
//! `Send`, so it can never be held across an `.await`; callers copy out the
//! handles they need and call into them after the guard is dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use buildadmin_id::{exact_match, fuzzy_match, BuildId};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{AdminError, AdminResult};
use crate::job::JobHandle;

pub type JobEntry = (BuildId, Arc<dyn JobHandle>);

/// How a request names its target generation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum JobSelector {
    Id { build_id: BuildId },
    JobId {
        job_id: String,
        #[serde(default)]
        fuzzy: bool,
    },
}

impl JobSelector {
    pub fn id(build_id: BuildId) -> Self {
        Self::Id { build_id }
    }

    pub fn job_id(job_id: impl Into<String>, fuzzy: bool) -> Self {
        Self::JobId {
            job_id: job_id.into(),
            fuzzy,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Id { build_id } => build_id.to_string(),
            Self::JobId { job_id, .. } => job_id.clone(),
        }
    }
}

#[derive(Default)]
struct Maps {
    active: BTreeMap<BuildId, Arc<dyn JobHandle>>,
    all: BTreeMap<BuildId, Arc<dyn JobHandle>>,
    starting: BTreeSet<BuildId>,
    recover_failed: BTreeSet<BuildId>,
}

#[derive(Default)]
pub struct JobRegistry {
    maps: Mutex<Maps>,
}

/// Holds a BuildId in the `starting` set; removes it on drop.
#[must_use]
pub struct StartGuard<'a> {
    registry: &'a JobRegistry,
    build_id: BuildId,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.registry.maps.lock().starting.remove(&self.build_id);
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `build_id` for a start request.
    ///
    /// Fails if a start is already in flight or the generation is active. A
    /// stopped generation may start again; its history entry is replaced by
    /// the new handle in [`JobRegistry::insert_active`].
    pub fn begin_start(&self, build_id: &BuildId) -> AdminResult<StartGuard<'_>> {
        let mut maps = self.maps.lock();
        if maps.starting.contains(build_id) {
            return Err(AdminError::AlreadyStarting(build_id.clone()));
        }
        if maps.active.contains_key(build_id) {
            return Err(AdminError::AlreadyActive(build_id.clone()));
        }
        maps.starting.insert(build_id.clone());
        maps.recover_failed.remove(build_id);
        Ok(StartGuard {
            registry: self,
            build_id: build_id.clone(),
        })
    }

    /// Track a running generation in both maps.
    pub fn insert_active(&self, handle: Arc<dyn JobHandle>) {
        let build_id = handle.build_id().clone();
        let mut maps = self.maps.lock();
        maps.all.insert(build_id.clone(), Arc::clone(&handle));
        maps.active.insert(build_id, handle);
    }

    /// Track a stopped generation for GC bookkeeping only.
    pub fn insert_history(&self, handle: Arc<dyn JobHandle>) {
        let build_id = handle.build_id().clone();
        self.maps.lock().all.insert(build_id, handle);
    }

    pub fn get(&self, build_id: &BuildId, include_history: bool) -> Option<Arc<dyn JobHandle>> {
        let maps = self.maps.lock();
        let map = if include_history { &maps.all } else { &maps.active };
        map.get(build_id).cloned()
    }

    /// Resolve a free-form job id. More than one match is an error.
    pub fn find(
        &self,
        job_id: &str,
        include_history: bool,
        fuzzy: bool,
    ) -> AdminResult<Option<JobEntry>> {
        let maps = self.maps.lock();
        let map = if include_history { &maps.all } else { &maps.active };
        let mut matched = map.iter().filter(|(id, _)| {
            if fuzzy {
                fuzzy_match(id, job_id)
            } else {
                exact_match(id, job_id)
            }
        });

        let first = matched.next().map(|(id, job)| (id.clone(), Arc::clone(job)));
        let rest = matched.count();
        if rest > 0 {
            return Err(AdminError::Ambiguous {
                job_id: job_id.to_string(),
                count: rest + 1,
            });
        }
        Ok(first)
    }

    pub fn resolve(&self, selector: &JobSelector, include_history: bool) -> AdminResult<JobEntry> {
        let found = match selector {
            JobSelector::Id { build_id } => self
                .get(build_id, include_history)
                .map(|job| (build_id.clone(), job)),
            JobSelector::JobId { job_id, fuzzy } => self.find(job_id, include_history, *fuzzy)?,
        };
        found.ok_or_else(|| AdminError::NotFound(selector.describe()))
    }

    pub fn active(&self) -> Vec<JobEntry> {
        snapshot(&self.maps.lock().active)
    }

    pub fn all(&self) -> Vec<JobEntry> {
        snapshot(&self.maps.lock().all)
    }

    /// Jobs in `all` that are no longer active.
    pub fn history(&self) -> Vec<JobEntry> {
        let maps = self.maps.lock();
        maps.all
            .iter()
            .filter(|(id, _)| !maps.active.contains_key(*id))
            .map(|(id, job)| (id.clone(), Arc::clone(job)))
            .collect()
    }

    pub fn is_active(&self, build_id: &BuildId) -> bool {
        self.maps.lock().active.contains_key(build_id)
    }

    pub fn active_count(&self) -> usize {
        self.maps.lock().active.len()
    }

    pub fn starting(&self) -> Vec<BuildId> {
        self.maps.lock().starting.iter().cloned().collect()
    }

    pub fn recover_failed(&self) -> Vec<BuildId> {
        self.maps.lock().recover_failed.iter().cloned().collect()
    }

    pub fn mark_recover_failed(&self, build_id: BuildId) {
        self.maps.lock().recover_failed.insert(build_id);
    }

    /// Ids of active jobs whose handle reports stopped.
    ///
    /// Only collects under the lock; use [`retire`](Self::retire) afterwards.
    pub fn stopped_active(&self) -> Vec<BuildId> {
        self.maps
            .lock()
            .active
            .iter()
            .filter(|(_, job)| job.is_stopped())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove ids from `active`; they stay in `all`. Returns how many moved.
    pub fn retire(&self, build_ids: &[BuildId]) -> usize {
        let mut maps = self.maps.lock();
        build_ids
            .iter()
            .filter(|id| maps.active.remove(*id).is_some())
            .count()
    }

    /// Forget a generation entirely, after its metadata is gone.
    pub fn purge(&self, build_id: &BuildId) -> bool {
        let mut maps = self.maps.lock();
        maps.active.remove(build_id);
        maps.all.remove(build_id).is_some()
    }
}

fn snapshot(map: &BTreeMap<BuildId, Arc<dyn JobHandle>>) -> Vec<JobEntry> {
    map.iter()
        .map(|(id, job)| (id.clone(), Arc::clone(job)))
        .collect()
}
