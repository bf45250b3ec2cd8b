//! Time-bounded blacklist of worker hosts.
//!
//! The scheduling tick inserts hosts that misbehaved and reads the live set
//! when building a resource plan. Entries expire after a fixed TTL, and the
//! oldest entry is evicted when the set is full. All methods take `now`
//! explicitly so expiry is deterministic under test.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProhibitedHostConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProhibitedHost {
    pub host: String,
    pub inserted_at: DateTime<Utc>,
    pub reason: String,
}

pub struct ProhibitedHostSet {
    ttl: chrono::Duration,
    max_size: usize,
    entries: Mutex<BTreeMap<String, ProhibitedHost>>,
}

impl ProhibitedHostSet {
    pub fn new(config: &ProhibitedHostConfig) -> Self {
        Self {
            ttl: chrono::Duration::from_std(config.ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            max_size: config.max_size.max(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert or refresh a host. Re-inserting restarts its TTL.
    pub fn insert(&self, host: &str, reason: &str, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        self.expire_locked(&mut entries, now);

        entries.insert(
            host.to_string(),
            ProhibitedHost {
                host: host.to_string(),
                inserted_at: now,
                reason: reason.to_string(),
            },
        );

        while entries.len() > self.max_size {
            let oldest = entries
                .values()
                .min_by_key(|entry| entry.inserted_at)
                .map(|entry| entry.host.clone());
            let Some(oldest) = oldest else { break };
            entries.remove(&oldest);
            debug!(host = %oldest, "Evicted oldest prohibited host");
        }
        info!(host = %host, reason = %reason, "Host prohibited");
    }

    /// Hosts currently prohibited, sorted.
    pub fn hosts(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut entries = self.entries.lock();
        self.expire_locked(&mut entries, now);
        entries.keys().cloned().collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<ProhibitedHost> {
        let mut entries = self.entries.lock();
        self.expire_locked(&mut entries, now);
        entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An entry lives for exactly `ttl`; it is gone once its age exceeds it.
    fn is_expired(&self, entry: &ProhibitedHost, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at > self.ttl
    }

    fn expire_locked(&self, entries: &mut BTreeMap<String, ProhibitedHost>, now: DateTime<Utc>) {
        entries.retain(|_, entry| !self.is_expired(entry, now));
    }
}
