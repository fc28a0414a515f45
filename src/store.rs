//! Caller-owned state containers (spec §5, §6).
//!
//! The engine never owns persistent state. These are plain type aliases
//! over standard containers; the caller constructs, persists, and garbage
//! collects them. `DidKeyStore`, `CapabilityStore`, and `RevokedSet` are
//! read-only to the engine. `UsedNonces` and `NonceTimestamps` are the only
//! containers the engine mutates, and only from [`crate::invocation::invoke_capability`].

use crate::model::Capability;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Capability id → capability. Read-only to the engine.
pub type CapabilityStore = HashMap<String, Capability>;

/// The set of revoked capability ids. Read-only to the engine.
pub type RevokedSet = HashSet<String>;

/// The set of nonces already consumed by a successful invocation.
pub type UsedNonces = HashSet<String>;

/// Nonce → the time it was recorded, used to bound [`UsedNonces`]'s growth.
pub type NonceTimestamps = HashMap<String, DateTime<Utc>>;

/// Default retention window for recorded nonces (spec §3, §4.6): 3600 seconds.
pub const DEFAULT_NONCE_MAX_AGE_SECS: i64 = 3600;

/// Evicts every nonce older than `max_age_secs` from both `used` and `ts`
/// (spec §4.6 step 9, §6 `cleanup_expired_nonces`).
///
/// Callers invoke this directly to reclaim memory between invocations;
/// [`crate::invocation::invoke_capability`] also calls it opportunistically
/// after recording each new nonce.
pub fn cleanup_expired_nonces(used: &mut UsedNonces, ts: &mut NonceTimestamps, max_age_secs: i64) {
    let now = Utc::now();
    let expired: Vec<String> = ts
        .iter()
        .filter(|(_, &recorded)| (now - recorded).num_seconds() > max_age_secs)
        .map(|(nonce, _)| nonce.clone())
        .collect();
    for nonce in expired {
        used.remove(&nonce);
        ts.remove(&nonce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn cleanup_evicts_only_stale_nonces() {
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();
        let now = Utc::now();
        used.insert("fresh".to_string());
        ts.insert("fresh".to_string(), now);
        used.insert("stale".to_string());
        ts.insert("stale".to_string(), now - Duration::seconds(7200));

        cleanup_expired_nonces(&mut used, &mut ts, DEFAULT_NONCE_MAX_AGE_SECS);

        assert!(used.contains("fresh"));
        assert!(!used.contains("stale"));
        assert!(!ts.contains_key("stale"));
    }
}
