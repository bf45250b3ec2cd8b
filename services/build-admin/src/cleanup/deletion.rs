//! FIFO queue of deferred index-version deletions.
//!
//! RPC handlers enqueue and return at once; a single consumer drains entries
//! one at a time. Producers only ever wait for the queue lock.

use std::collections::VecDeque;
use std::sync::Arc;

use buildadmin_id::BuildId;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, instrument, warn};

use crate::job::JobHandle;

pub struct DeletionRequest {
    pub job: Arc<dyn JobHandle>,
    pub cluster: String,
    pub version: u64,
}

impl DeletionRequest {
    pub fn build_id(&self) -> &BuildId {
        self.job.build_id()
    }
}

#[derive(Default)]
pub struct DeferredDeletionQueue {
    queue: Mutex<VecDeque<DeletionRequest>>,
    notify: Notify,
}

impl DeferredDeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: DeletionRequest) {
        self.queue.lock().push_back(request);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<DeletionRequest> {
        self.queue.lock().pop_front()
    }

    /// Process the oldest entry, if any. Returns whether one was processed.
    pub async fn drain_once(&self) -> bool {
        let Some(request) = self.pop() else {
            return false;
        };
        let build_id = request.build_id().clone();
        if request.job.clean_versions(&request.cluster, request.version).await {
            debug!(
                build_id = %build_id,
                cluster = %request.cluster,
                version = request.version,
                "Index version deleted"
            );
        } else {
            warn!(
                build_id = %build_id,
                cluster = %request.cluster,
                version = request.version,
                "Failed to delete index version"
            );
        }
        true
    }

    /// Process entries until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while self.drain_once().await {
            processed += 1;
        }
        processed
    }

    /// Consume the queue until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting deferred deletion worker");
        loop {
            self.drain().await;
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(pending = self.len(), "Deferred deletion worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
