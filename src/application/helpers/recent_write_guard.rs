use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::application::ports::clock::Clock;

/// Short-lived "written locally just now" markers, keyed by processor id
/// (subscription or customer).
///
/// Locally initiated billing mutations stamp a marker right after the
/// processor accepts them. Webhook handlers consult it before writing the
/// local entitlement and skip the write while a marker is fresh, since the
/// event may describe a state older than the local write. Best effort only:
/// the TTL is a heuristic. Nothing here is persisted.
pub struct RecentWriteGuard {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    expiries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RecentWriteGuard {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            expiries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn mark(&self, key: &str) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries().insert(key.to_string(), expires_at);
    }

    pub fn mark_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let expires_at = self.clock.now() + self.ttl;
        let mut entries = self.entries();
        for key in keys {
            entries.insert(key.to_string(), expires_at);
        }
    }

    /// True while a marker for `key` is unexpired. Expired markers are dropped.
    pub fn is_fresh(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// First key among `keys` holding a fresh marker.
    pub fn fresh_key<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        keys.into_iter().find(|key| self.is_fresh(key))
    }

    /// Removes every expired marker.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries().retain(|_, expires_at| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // The map stays consistent even if a holder panicked.
        self.expiries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
