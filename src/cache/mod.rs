//! Namespaced TTL + LRU cache with stats (spec §4.C3).
//!
//! A provider call is wrapped by a cache lookup keyed on a deterministic
//! fingerprint of the canonicalized request, falling through to the provider
//! on miss. The cache is an explicit handle threaded through the
//! orchestrator rather than a module-global singleton (§9 redesign flag).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Cache operation statistics (spec §4.C3; surfaced in `PipelineResult` per
/// SPEC_FULL.md §5).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub entries: u64,
    pub size_bytes: u64,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    last_used: Instant,
}

/// Deterministic fingerprint of a canonicalized request: sorted keys,
/// normalized numeric formatting, fed through SHA-256. `namespace:fingerprint`
/// is the full cache key (spec §4.C3).
pub fn fingerprint(namespace: &str, canonical_request: &serde_json::Value) -> String {
    let canonical = canonicalize(canonical_request);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    format!("{namespace}:{digest:x}")
}

fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted: Vec<_> = map.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in sorted {
                    out.insert(k.clone(), sort(v));
                }
                serde_json::Value::Object(out)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Thread-safe namespaced cache. A `get`/`set` pair on the same key observes
/// either the old or the new value atomically because both operations take
/// the same mutex.
pub struct Cache {
    entries: Mutex<HashMap<String, Entry>>,
    max_size_bytes: u64,
    stats: Mutex<CacheStats>,
}

impl Cache {
    pub fn new(max_size_bytes: u64) -> Self {
        Cache {
            entries: Mutex::new(HashMap::new()),
            max_size_bytes,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Returns the cached bytes for `key` if present and not expired.
    /// Expired entries are invisible and lazily evicted.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let mut stats = self.stats.lock().unwrap();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                stats.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                stats.entries = entries.len() as u64;
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                last_used: now,
            },
        );
        self.evict_if_over_budget(&mut entries);

        let mut stats = self.stats.lock().unwrap();
        stats.sets += 1;
        stats.entries = entries.len() as u64;
        stats.size_bytes = entries.values().map(|e| e.value.len() as u64).sum();
    }

    fn evict_if_over_budget(&self, entries: &mut HashMap<String, Entry>) {
        let mut size: u64 = entries.values().map(|e| e.value.len() as u64).sum();
        if size <= self.max_size_bytes {
            return;
        }
        let mut by_lru: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_used))
            .collect();
        by_lru.sort_by_key(|(_, last_used)| *last_used);
        for (key, _) in by_lru {
            if size <= self.max_size_bytes {
                break;
            }
            if let Some(entry) = entries.remove(&key) {
                size -= entry.value.len() as u64;
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        let mut stats = self.stats.lock().unwrap();
        stats.entries = entries.len() as u64;
    }

    pub fn clear_namespace(&self, namespace: &str) {
        let prefix = format!("{namespace}:");
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| !key.starts_with(&prefix));
        let mut stats = self.stats.lock().unwrap();
        stats.entries = entries.len() as u64;
    }

    pub fn clear_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        let mut stats = self.stats.lock().unwrap();
        stats.entries = 0;
        stats.size_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }

    /// Fetch `key` from the cache, or call `miss` and store its result with
    /// `ttl` on success. A cache error is never fatal — callers treat it as a
    /// plain miss (spec §4.C3).
    pub async fn get_or_insert_with<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        miss: F,
    ) -> Result<T, crate::error::PipelineError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::error::PipelineError>>,
    {
        if let Some(bytes) = self.get(key) {
            if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                return Ok(value);
            }
            // Corrupt cache entry: treat as miss rather than fail the call.
            self.invalidate(key);
        }

        let value = miss().await?;
        if let Ok(bytes) = serde_json::to_vec(&value) {
            self.set(key, bytes, ttl);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_set_returns_same_value() {
        let cache = Cache::new(1024 * 1024);
        cache.set("ns:key", b"value".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.get("ns:key"), Some(b"value".to_vec()));
    }

    #[test]
    fn expired_entries_are_invisible() {
        let cache = Cache::new(1024 * 1024);
        cache.set("ns:key", b"value".to_vec(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("ns:key"), None);
    }

    #[test]
    fn clear_namespace_only_removes_that_namespace() {
        let cache = Cache::new(1024 * 1024);
        cache.set("a:1", b"x".to_vec(), Duration::from_secs(60));
        cache.set("b:1", b"y".to_vec(), Duration::from_secs(60));
        cache.clear_namespace("a");
        assert_eq!(cache.get("a:1"), None);
        assert_eq!(cache.get("b:1"), Some(b"y".to_vec()));
    }

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(fingerprint("ns", &a), fingerprint("ns", &b));
    }

    #[test]
    fn lru_eviction_drops_oldest_entries_over_budget() {
        let cache = Cache::new(10);
        cache.set("ns:1", vec![0u8; 6], Duration::from_secs(60));
        cache.set("ns:2", vec![0u8; 6], Duration::from_secs(60));
        assert_eq!(cache.get("ns:1"), None);
        assert_eq!(cache.get("ns:2"), Some(vec![0u8; 6]));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = Cache::new(1024);
        cache.get("missing");
        cache.set("ns:key", b"v".to_vec(), Duration::from_secs(60));
        cache.get("ns:key");
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.sets, 1);
    }
}
