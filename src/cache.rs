// src/cache.rs
// Read-optimized store of approved content. The cache is an accelerator
// only: every miss must be satisfiable by recomputing from the approved
// item store, so entries can be dropped freely.
//
// Keys are pattern-matchable strings such as `articles:category:politics`;
// invalidation takes a glob (`articles:*`) so the coordinator can drop
// exactly the categories touched by a newly approved item without a full
// flush.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: serde_json::Value,
    computed_at: Instant,
    ttl: Duration,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.computed_at) > self.ttl
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub connected: bool,
    pub memory_used: usize,
    pub memory_total: usize,
    pub key_count: usize,
    pub hit_rate: f64,
    pub per_category_counts: HashMap<String, usize>,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

pub struct PublishCache {
    shards: Vec<RwLock<HashMap<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    memory_budget: usize,
    started_at: Instant,
    last_cleanup: RwLock<Option<DateTime<Utc>>>,
}

impl PublishCache {
    pub fn new(memory_budget: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            memory_budget,
            started_at: Instant::now(),
            last_cleanup: RwLock::new(None),
        }
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, CacheEntry>> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARD_COUNT]
    }

    /// Absent and stale are both a miss; staleness is never an error.
    /// Stale entries are evicted on the way out.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let shard = self.shard_for(key);
        {
            let map = shard.read().expect("cache shard poisoned");
            match map.get(key) {
                Some(entry) if !entry.is_stale(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    counter!("cache_hits_total").increment(1);
                    return Some(entry.payload.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    counter!("cache_misses_total").increment(1);
                    return None;
                }
            }
        }
        // Stale: evict under the write lock, re-checking since the entry
        // may have been overwritten in between (last writer wins).
        let mut map = shard.write().expect("cache shard poisoned");
        if map.get(key).is_some_and(|e| e.is_stale(Instant::now())) {
            map.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("cache_misses_total").increment(1);
        None
    }

    /// Unconditional overwrite; resets the entry age.
    pub fn put(&self, key: &str, payload: serde_json::Value, ttl: Duration) {
        let size_bytes = key.len() + payload.to_string().len();
        let entry = CacheEntry {
            payload,
            computed_at: Instant::now(),
            ttl,
            size_bytes,
        };
        self.shard_for(key)
            .write()
            .expect("cache shard poisoned")
            .insert(key.to_string(), entry);
    }

    /// Remove every key matching the glob pattern; `None` clears all.
    /// Returns the number of removed keys (status/telemetry use it).
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let mut removed = 0usize;
        for shard in &self.shards {
            let mut map = shard.write().expect("cache shard poisoned");
            match pattern {
                None => {
                    removed += map.len();
                    map.clear();
                }
                Some(p) => {
                    let before = map.len();
                    map.retain(|k, _| !pattern_matches(p, k));
                    removed += before - map.len();
                }
            }
        }
        *self.last_cleanup.write().expect("cache cleanup stamp poisoned") = Some(Utc::now());
        counter!("cache_invalidated_keys_total").increment(removed as u64);
        removed
    }

    pub fn status(&self) -> CacheStatus {
        let mut key_count = 0usize;
        let mut memory_used = 0usize;
        let mut per_category: HashMap<String, usize> = HashMap::new();
        for shard in &self.shards {
            let map = shard.read().expect("cache shard poisoned");
            key_count += map.len();
            for (key, entry) in map.iter() {
                memory_used += entry.size_bytes;
                let category = key.split(':').next().unwrap_or("other").to_string();
                *per_category.entry(category).or_insert(0) += 1;
            }
        }
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStatus {
            connected: true,
            memory_used,
            memory_total: self.memory_budget,
            key_count,
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            per_category_counts: per_category,
            last_cleanup: *self.last_cleanup.read().expect("cache cleanup stamp poisoned"),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Glob match with `*` as the only wildcard. `articles:*` matches every
/// key under the articles prefix; a literal pattern matches exactly.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];
    if key.len() < first.len() + last.len() {
        return false;
    }
    if !key.starts_with(first) || !key.ends_with(last) {
        return false;
    }
    // Middle fragments must appear in order between prefix and suffix.
    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_matching() {
        assert!(pattern_matches("articles:*", "articles:category:politics"));
        assert!(pattern_matches("articles:category:politics", "articles:category:politics"));
        assert!(!pattern_matches("articles:category:politics", "articles:category:sports"));
        assert!(pattern_matches("*:politics", "articles:category:politics"));
        assert!(pattern_matches("articles:*:politics", "articles:category:politics"));
        assert!(!pattern_matches("articles:*:politics", "feeds:category:politics"));
        assert!(!pattern_matches("articles:*", "art"));
    }

    #[test]
    fn put_get_roundtrip_and_overwrite() {
        let cache = PublishCache::new(1024 * 1024);
        cache.put("articles:home", json!({"v": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("articles:home"), Some(json!({"v": 1})));
        cache.put("articles:home", json!({"v": 2}), Duration::from_secs(60));
        assert_eq!(cache.get("articles:home"), Some(json!({"v": 2})));
    }

    #[test]
    fn stale_entry_is_a_miss() {
        let cache = PublishCache::new(1024);
        cache.put("articles:home", json!(1), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("articles:home"), None);
        assert_eq!(cache.status().key_count, 0, "stale entry evicted on read");
    }

    #[test]
    fn invalidate_removes_only_matching_keys() {
        let cache = PublishCache::new(1024);
        let ttl = Duration::from_secs(60);
        cache.put("articles:category:politics", json!(1), ttl);
        cache.put("articles:category:sports", json!(2), ttl);
        cache.put("feeds:rss", json!(3), ttl);
        let removed = cache.invalidate(Some("articles:*"));
        assert_eq!(removed, 2);
        assert_eq!(cache.get("feeds:rss"), Some(json!(3)));
    }

    #[test]
    fn invalidate_none_clears_all_and_reports_prior_count() {
        let cache = PublishCache::new(1024);
        let ttl = Duration::from_secs(60);
        cache.put("a:1", json!(1), ttl);
        cache.put("b:2", json!(2), ttl);
        assert_eq!(cache.invalidate(None), 2);
        assert_eq!(cache.status().key_count, 0);
    }
}
