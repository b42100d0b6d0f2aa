// ── TTL response cache ──
//
// Keyed cache for expensive router reads. Best-effort by design: no
// locking discipline beyond last-write-wins per key, because staleness
// (bounded by coarse TTLs) is the only risk. Explicit invalidation exists
// for writes known to change router state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// Hit/miss counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Generic time-to-live keyed cache.
pub struct ResponseCache<T: Clone> {
    entries: DashMap<String, CacheEntry<T>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a value if present and younger than its TTL.
    ///
    /// A stale entry is evicted on the way out and reported as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        // Either absent or stale; drop any stale entry.
        self.entries
            .remove_if(key, |_, entry| !entry.is_fresh());
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value, overwriting any prior entry. `ttl = None` uses the
    /// cache-wide default.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Drop one key.
    pub fn clear(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        self.entries.clear();
    }

    /// Drop every key containing `pattern`. Used after writes that
    /// invalidate a family of cached reads.
    pub fn clear_by_pattern(&self, pattern: &str) {
        self.entries.retain(|key, _| !key.contains(pattern));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.set("k", 7u32, None);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entries_miss_and_are_evicted() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.set("k", 7u32, Some(Duration::ZERO));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn absent_key_is_a_miss_not_an_error() {
        let cache: ResponseCache<u32> = ResponseCache::new(Duration::from_secs(30));
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn set_overwrites_prior_entry() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.set("k", 1u32, None);
        cache.set("k", 2u32, None);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn clear_by_pattern_removes_only_matching_keys() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.set("address-list:10.0.0.2", 1u32, None);
        cache.set("address-list:10.0.0.6", 2u32, None);
        cache.set("queue:cust-1", 3u32, None);

        cache.clear_by_pattern("address-list");

        assert_eq!(cache.get("address-list:10.0.0.2"), None);
        assert_eq!(cache.get("address-list:10.0.0.6"), None);
        assert_eq!(cache.get("queue:cust-1"), Some(3));
    }

    #[test]
    fn clear_all_empties_the_cache() {
        let cache = ResponseCache::new(Duration::from_secs(30));
        cache.set("a", 1u32, None);
        cache.set("b", 2u32, None);
        cache.clear_all();
        assert_eq!(cache.stats().entries, 0);
    }
}
