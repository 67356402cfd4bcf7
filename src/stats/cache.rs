//! In-process TTL cache for read-heavy analytics queries.
//!
//! Entries expire after 30 seconds; invalidation beyond that is process
//! restart. Multi-instance deployments accept the resulting staleness.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

const MAX_ENTRIES: usize = 4096;

pub struct StatsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for a metric scoped to one tenant plus free-form params.
    pub fn key(metric: &str, tenant_id: Uuid, params: &str) -> String {
        format!("{}:{}:{}", metric, tenant_id, params)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() <= self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, value: Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= MAX_ENTRIES {
            // Drop expired entries first; fall back to clearing outright
            // rather than growing without bound.
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() <= self.ttl);
            if entries.len() >= MAX_ENTRIES {
                entries.clear();
            }
        }
        entries.insert(key.to_string(), (Instant::now(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_miss() {
        let cache = StatsCache::default();
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn test_put_then_get() {
        let cache = StatsCache::default();
        cache.put("k", json!({"n": 1}));
        assert_eq!(cache.get("k"), Some(json!({"n": 1})));
    }

    #[test]
    fn test_expiry() {
        let cache = StatsCache::new(Duration::from_millis(0));
        cache.put("k", json!(42));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_key_includes_tenant() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(
            StatsCache::key("overview", a, ""),
            StatsCache::key("overview", b, "")
        );
    }
}
