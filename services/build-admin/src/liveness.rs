//! Stall detection.
//!
//! The admin is a singleton leader. If its control loop or any running
//! generation stops making progress, the only safe reaction is to stop being
//! leader, so a breach raises a [`FatalFault`] for the supervisor to act on.
//! The monitor itself never exits the process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use buildadmin_id::BuildId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument};

use crate::config::LivenessConfig;
use crate::metrics;
use crate::orchestrator::FleetOrchestrator;

/// What stopped making progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StalledComponent {
    Orchestrator,
    Generation(BuildId),
}

impl fmt::Display for StalledComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Generation(build_id) => write!(f, "generation {build_id}"),
        }
    }
}

/// An unrecoverable stall. The receiver is expected to terminate the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stalled} made no progress for {lag:?} (threshold {threshold:?})")]
pub struct FatalFault {
    pub stalled: StalledComponent,
    pub lag: Duration,
    pub threshold: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Running,
    /// Terminal: a fault was raised.
    Terminating,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub schedule_freshness: Duration,
    pub checked: usize,
    /// Stopped generations removed from the monitored set.
    pub retired: usize,
}

pub struct LivenessMonitor {
    config: LivenessConfig,
    orchestrator: Arc<FleetOrchestrator>,
    state: Mutex<MonitorState>,
}

fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or_default()
}

impl LivenessMonitor {
    pub fn new(config: LivenessConfig, orchestrator: Arc<FleetOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
            state: Mutex::new(MonitorState::Running),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Run one check at `now`.
    ///
    /// A lag of exactly the threshold is still healthy.
    pub fn check_at(&self, now: DateTime<Utc>) -> Result<LivenessReport, FatalFault> {
        let heartbeat = self.orchestrator.heartbeat();
        let schedule_freshness = age(now, heartbeat.last_schedule());
        metrics::set_schedule_freshness(schedule_freshness.as_secs_f64());

        let lag = age(now, heartbeat.last_refresh());
        if lag > self.config.service_threshold {
            return Err(self.raise(
                StalledComponent::Orchestrator,
                lag,
                self.config.service_threshold,
            ));
        }

        let registry = self.orchestrator.registry();
        let mut stopped = Vec::new();
        let active = registry.active();
        for (build_id, job) in &active {
            if job.is_stopped() {
                stopped.push(build_id.clone());
                continue;
            }
            if job.is_suspended() {
                continue;
            }
            let lag = age(now, job.last_refresh_time());
            metrics::set_generation_refresh_lag(build_id, lag.as_secs_f64());
            if lag > self.config.generation_threshold {
                return Err(self.raise(
                    StalledComponent::Generation(build_id.clone()),
                    lag,
                    self.config.generation_threshold,
                ));
            }
        }

        let retired = registry.retire(&stopped);
        debug!(
            checked = active.len(),
            retired,
            schedule_freshness_secs = schedule_freshness.as_secs(),
            "Liveness check passed"
        );
        Ok(LivenessReport {
            schedule_freshness,
            checked: active.len(),
            retired,
        })
    }

    fn raise(&self, stalled: StalledComponent, lag: Duration, threshold: Duration) -> FatalFault {
        *self.state.lock() = MonitorState::Terminating;
        let fault = FatalFault {
            stalled,
            lag,
            threshold,
        };
        error!(fault = %fault, "Liveness threshold exceeded");
        fault
    }

    /// Check on a fixed interval until a fault is raised or shutdown is
    /// signaled. The fault is handed to `faults` and the monitor stops.
    #[instrument(skip(self, faults, shutdown))]
    pub async fn run(&self, faults: mpsc::Sender<FatalFault>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            service_threshold_secs = self.config.service_threshold.as_secs(),
            generation_threshold_secs = self.config.generation_threshold.as_secs(),
            "Starting liveness monitor"
        );

        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; give the loops one interval to start.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(fault) = self.check_at(Utc::now()) {
                        if faults.send(fault).await.is_err() {
                            error!("Fault receiver dropped");
                        }
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Liveness monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}
