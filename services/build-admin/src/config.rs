//! Service configuration, assembled once from the environment at startup.
//!
//! Each component receives its own sub-struct by value; nothing reads the
//! environment after `Config::from_env` returns.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use buildadmin_reconcile::DEFAULT_RECONCILE_INTERVAL;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub store_root: PathBuf,
    pub index_root: PathBuf,
    pub scheduler_url: Option<String>,
    pub orchestrator: OrchestratorConfig,
    pub recovery: RecoveryConfig,
    pub liveness: LivenessConfig,
    pub gc: GcConfig,
    pub prohibited_hosts: ProhibitedHostConfig,
    pub catalog: Option<CatalogConfig>,
}

/// Scheduling tick settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between scheduling ticks.
    pub schedule_interval: Duration,

    /// How often the wall-clock schedule timestamp is re-synced.
    pub counter_sync_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_millis(1000),
            counter_sync_interval: Duration::from_secs(30),
        }
    }
}

/// Startup recovery settings.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Size of the recovery worker pool.
    pub threads: usize,

    /// Sleep between attempts for one BuildId.
    pub sleep_interval: Duration,

    /// Attempts per BuildId before it is marked recover-failed.
    pub max_attempts: u32,
}

impl RecoveryConfig {
    /// Upper bound for a single recovery attempt.
    pub fn attempt_timeout(&self) -> Duration {
        self.sleep_interval * 6
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            sleep_interval: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

/// Stall detection settings.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub check_interval: Duration,

    /// Maximum age of the orchestrator's last refresh.
    pub service_threshold: Duration,

    /// Maximum age of a running generation's last refresh.
    pub generation_threshold: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            service_threshold: Duration::from_secs(600),
            generation_threshold: Duration::from_secs(1800),
        }
    }
}

/// Obsolete data collection settings.
#[derive(Debug, Clone)]
pub struct GcConfig {
    pub interval: Duration,

    /// Whether the index-retention sweep deletes anything at all.
    pub delete_old_index: bool,

    /// Stopped generations per family whose metadata is kept.
    pub reserve_generations: usize,

    /// Stopped generations per family whose index data is kept.
    pub reserve_indices: usize,

    /// Index data of generations stopped longer than this is deleted.
    pub index_retention: Option<Duration>,

    /// Metadata of generations stopped longer than this is purged.
    pub generation_retention: Option<Duration>,
}

impl GcConfig {
    /// Enforce `reserve_generations >= reserve_indices + 1` when index deletion
    /// is enabled.
    ///
    /// Metadata cannot be purged before its index, so a smaller metadata
    /// window would pin every generation between the two windows forever.
    /// The rule is only applied when index deletion is enabled.
    pub fn normalized(mut self) -> Self {
        if self.delete_old_index && self.reserve_generations < self.reserve_indices + 1 {
            warn!(
                reserve_generations = self.reserve_generations,
                reserve_indices = self.reserve_indices,
                "reserve_generations must exceed reserve_indices, raising it"
            );
            self.reserve_generations = self.reserve_indices + 1;
        }
        self
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            delete_old_index: false,
            reserve_generations: 10,
            reserve_indices: 3,
            index_retention: None,
            generation_retention: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProhibitedHostConfig {
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for ProhibitedHostConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_size: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub url: String,
    pub sync_interval: Duration,
}

impl CatalogConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sync_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("BUILD_ADMIN_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8090".to_string())
            .parse()
            .context("BUILD_ADMIN_LISTEN_ADDR")?;

        let log_level =
            std::env::var("BUILD_ADMIN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let store_root: PathBuf = std::env::var("BUILD_ADMIN_STORE_ROOT")
            .unwrap_or_else(|_| "/var/lib/build-admin".to_string())
            .into();

        let index_root = std::env::var("BUILD_ADMIN_INDEX_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| store_root.join("indexes"));

        let scheduler_url = non_empty_var("BUILD_ADMIN_SCHEDULER_URL");

        let orchestrator = OrchestratorConfig {
            schedule_interval: Duration::from_millis(parse_var(
                "BUILD_ADMIN_SCHEDULE_INTERVAL_MS",
                1000,
            )?),
            counter_sync_interval: secs_var("BUILD_ADMIN_COUNTER_SYNC_INTERVAL_SECS", 30)?,
        };

        let recovery = RecoveryConfig {
            threads: parse_var::<usize>("BUILD_ADMIN_RECOVER_THREADS", 1)?.max(1),
            sleep_interval: secs_var("BUILD_ADMIN_RECOVER_SLEEP_SECS", 10)?,
            max_attempts: parse_var::<u32>("BUILD_ADMIN_RECOVER_MAX_ATTEMPTS", 3)?.max(1),
        };

        let liveness = LivenessConfig {
            check_interval: secs_var("BUILD_ADMIN_HEALTH_CHECK_INTERVAL_SECS", 10)?,
            service_threshold: secs_var("BUILD_ADMIN_SERVICE_HEALTH_THRESHOLD_SECS", 600)?,
            generation_threshold: secs_var("BUILD_ADMIN_GENERATION_HEALTH_THRESHOLD_SECS", 1800)?,
        };

        let gc = GcConfig {
            interval: secs_var("BUILD_ADMIN_GC_INTERVAL_SECS", 3600)?,
            delete_old_index: bool_var("BUILD_ADMIN_DELETE_OLD_INDEX"),
            reserve_generations: parse_var("BUILD_ADMIN_RESERVE_STOPPED_GENERATIONS", 10)?,
            reserve_indices: parse_var("BUILD_ADMIN_RESERVE_STOPPED_INDICES", 3)?,
            index_retention: optional_secs_var("BUILD_ADMIN_INDEX_RETENTION_SECS")?,
            generation_retention: optional_secs_var("BUILD_ADMIN_GENERATION_RETENTION_SECS")?,
        }
        .normalized();

        let prohibited_hosts = ProhibitedHostConfig {
            ttl: secs_var("BUILD_ADMIN_PROHIBIT_TTL_SECS", 600)?,
            max_size: parse_var("BUILD_ADMIN_PROHIBIT_MAX_SIZE", 64)?,
        };

        let catalog = match non_empty_var("BUILD_ADMIN_CATALOG_URL") {
            Some(url) => Some(CatalogConfig {
                sync_interval: secs_var(
                    "BUILD_ADMIN_CATALOG_SYNC_INTERVAL_SECS",
                    DEFAULT_RECONCILE_INTERVAL.as_secs(),
                )?,
                ..CatalogConfig::new(url)
            }),
            None => None,
        };

        Ok(Self {
            listen_addr,
            log_level,
            store_root,
            index_root,
            scheduler_url,
            orchestrator,
            recovery,
            liveness,
            gc,
            prohibited_hosts,
            catalog,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: '{raw}'")),
        None => Ok(default),
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    parse_var(name, default).map(Duration::from_secs)
}

/// Zero or unset disables the setting.
fn optional_secs_var(name: &str) -> Result<Option<Duration>> {
    let secs: u64 = parse_var(name, 0)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn bool_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_normalization_raises_generation_reserve() {
        let gc = GcConfig {
            delete_old_index: true,
            reserve_generations: 2,
            reserve_indices: 3,
            ..GcConfig::default()
        }
        .normalized();
        assert_eq!(gc.reserve_generations, 4);
    }

    #[test]
    fn test_gc_normalization_skipped_when_index_deletion_disabled() {
        let gc = GcConfig {
            delete_old_index: false,
            reserve_generations: 2,
            reserve_indices: 3,
            ..GcConfig::default()
        }
        .normalized();
        assert_eq!(gc.reserve_generations, 2);
    }

    #[test]
    fn test_defaults() {
        let gc = GcConfig::default();
        assert_eq!(gc.interval.as_secs(), 3600);
        assert!(gc.reserve_generations > gc.reserve_indices);

        let recovery = RecoveryConfig::default();
        assert_eq!(recovery.threads, 1);
        assert_eq!(recovery.attempt_timeout(), Duration::from_secs(60));

        assert_eq!(LivenessConfig::default().check_interval, Duration::from_secs(10));

        let catalog = CatalogConfig::new("http://catalog:8080");
        assert_eq!(catalog.sync_interval, Duration::from_secs(5));
    }
}
