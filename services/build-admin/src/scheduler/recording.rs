//! In-process scheduler that records what it is given.
//!
//! Used when no external scheduler is configured, and by tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ResourcePlan, SchedulerError, SchedulerResult, WorkerScheduler};
use crate::job::SlotRelease;

#[derive(Default)]
pub struct RecordingScheduler {
    plans: Mutex<Vec<ResourcePlan>>,
    released: Mutex<Vec<SlotRelease>>,
    failing: AtomicBool,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the scheduler were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn last_plan(&self) -> Option<ResourcePlan> {
        self.plans.lock().last().cloned()
    }

    pub fn plan_count(&self) -> usize {
        self.plans.lock().len()
    }

    pub fn released(&self) -> Vec<SlotRelease> {
        self.released.lock().clone()
    }

    fn check(&self) -> SchedulerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Unavailable("recording scheduler set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerScheduler for RecordingScheduler {
    async fn push_plan(&self, plan: &ResourcePlan) -> SchedulerResult<()> {
        self.check()?;
        debug!(plan_id = %plan.plan_id, workers = plan.total_workers(), "Recorded resource plan");
        self.plans.lock().push(plan.clone());
        Ok(())
    }

    async fn release_slots(&self, slots: &[SlotRelease]) -> SchedulerResult<()> {
        self.check()?;
        self.released.lock().extend_from_slice(slots);
        Ok(())
    }
}
