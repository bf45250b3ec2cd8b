//! Reconciliation loop primitives.
//!
//! Helpers for control loops that converge locally observed state to an
//! externally declared desired state. Key concepts:
//!
//! - **Desired state**: what the external declaration says should exist.
//! - **Observed state**: what this process is currently running.
//! - **Level-triggered**: each pass recomputes from scratch, so a missed pass
//!   self-heals on the next one.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - A desired value is acted upon at most once per distinct observation
//!   ([`MapDiff::to_act_on`] against the previously declared map)
//! - Identical declarations produce identical [`Fingerprint`]s regardless of
//!   map key order

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired state could not be serialized for fingerprinting.
    #[error("cannot fingerprint desired state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A content fingerprint for deterministic comparison.
///
/// Used to short-circuit a reconciliation pass when the full desired state
/// is unchanged since the previous poll.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(result)))
    }

    /// Fingerprint any serializable value.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, ReconcileError> {
        Ok(Self::from_json(&serde_json::to_value(value)?))
    }

    /// Get the fingerprint string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Key-level difference between a previous and a current map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDiff<K> {
    /// Keys only present in the current map.
    pub added: Vec<K>,
    /// Keys only present in the previous map.
    pub removed: Vec<K>,
    /// Keys present in both with different values.
    pub changed: Vec<K>,
    /// Keys present in both with equal values.
    pub unchanged: Vec<K>,
}

impl<K> MapDiff<K> {
    /// Keys that need an action (added or changed).
    pub fn to_act_on(&self) -> impl Iterator<Item = &K> {
        self.added.iter().chain(self.changed.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compute the key-level difference between two maps.
///
/// Output vectors are in key order.
pub fn diff_maps<K, V>(previous: &BTreeMap<K, V>, current: &BTreeMap<K, V>) -> MapDiff<K>
where
    K: Ord + Clone,
    V: PartialEq,
{
    let mut diff = MapDiff {
        added: Vec::new(),
        removed: Vec::new(),
        changed: Vec::new(),
        unchanged: Vec::new(),
    };

    for (key, value) in current {
        match previous.get(key) {
            None => diff.added.push(key.clone()),
            Some(old) if old != value => diff.changed.push(key.clone()),
            Some(_) => diff.unchanged.push(key.clone()),
        }
    }

    diff.removed = previous
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();

    diff
}

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
