//! Worker scheduler boundary.
//!
//! The admin computes a [`ResourcePlan`] every scheduling tick and hands it
//! to an external worker scheduler, which turns it into running processes.
//! The scheduler's allocation internals are not modelled here.

mod client;
mod plan;
mod recording;

use async_trait::async_trait;

use crate::job::SlotRelease;

pub use client::HttpWorkerScheduler;
pub use plan::{ResourcePlan, RolePlan};
pub use recording::RecordingScheduler;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur talking to the worker scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scheduler rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait WorkerScheduler: Send + Sync {
    /// Replace the scheduler's target with `plan`.
    async fn push_plan(&self, plan: &ResourcePlan) -> SchedulerResult<()>;

    /// Hand back slots whose hosts were just prohibited.
    async fn release_slots(&self, slots: &[SlotRelease]) -> SchedulerResult<()>;
}
