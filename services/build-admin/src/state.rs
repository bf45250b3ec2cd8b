//! Application state shared across request handlers.

use std::sync::Arc;

use crate::cleanup::ObsoleteDataCollector;
use crate::orchestrator::FleetOrchestrator;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orchestrator: Arc<FleetOrchestrator>,
    collector: Arc<ObsoleteDataCollector>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<FleetOrchestrator>,
        collector: Arc<ObsoleteDataCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orchestrator,
                collector,
            }),
        }
    }

    pub fn orchestrator(&self) -> &FleetOrchestrator {
        &self.inner.orchestrator
    }

    pub fn collector(&self) -> &ObsoleteDataCollector {
        &self.inner.collector
    }

    /// Requests are only served once startup recovery has finished.
    pub fn is_ready(&self) -> bool {
        self.inner.orchestrator.is_recovered()
    }
}
