//! Process-local TTL cache backed by moka
//!
//! Entries live only in this process and are never shared between instances;
//! a restart or a second replica starts empty. Every entry carries its own
//! time-to-live, so one cache serves short-lived counters and longer-lived
//! summaries alike.

use moka::sync::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on live entries; least recently used entries go first
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

/// Expiry policy reading the TTL stored with each entry
struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry<V>, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Keyed cache with per-entry time-to-live and prefix invalidation
///
/// Every invalidation bumps a generation counter. A reader that computes a
/// value from the database can pass the generation it saw before the query
/// to [`set_if_current`](Self::set_if_current), which refuses to store a
/// value an invalidation has already superseded.
pub struct TtlCache<V> {
    inner: Cache<String, Entry<V>>,
    generation: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let hit = self.inner.get(key).map(|entry| entry.value);
        if hit.is_some() {
            debug!("Cache hit: {}", key);
        }
        hit
    }

    /// Insert or replace a value
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        debug!("Cache set: {} (ttl {:?})", key, ttl);
        self.inner.insert(key, Entry { value, ttl });
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store `value` only if no invalidation happened since `generation`
    ///
    /// The check is repeated after the insert, so an invalidation racing the
    /// insert still removes the value. Returns whether the value was kept.
    pub fn set_if_current(&self, key: impl Into<String>, value: V, ttl: Duration, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        let key = key.into();
        self.set(key.clone(), value, ttl);
        if self.generation() != generation {
            debug!("Cache set of {} superseded by an invalidation", key);
            self.inner.invalidate(&key);
            return false;
        }
        true
    }

    /// Remove every key starting with `prefix`, returning how many were removed
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let stale: Vec<String> = self
            .inner
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.to_string())
            .collect();
        for key in &stale {
            self.inner.invalidate(key);
        }
        if !stale.is_empty() {
            debug!("Cache invalidated {} key(s) with prefix {}", stale.len(), prefix);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_all();
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = TtlCache::new();
        cache.set("unread:alice", 3, Duration::from_secs(60));
        assert_eq!(cache.get("unread:alice"), Some(3));
        assert_eq!(cache.get("unread:bob"), None);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = TtlCache::new();
        cache.set("k", "v".to_string(), Duration::from_millis(20));
        assert_eq!(cache.get("k"), Some("v".to_string()));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_entries_keep_their_own_ttl() {
        let cache = TtlCache::new();
        cache.set("unread:alice", 1, Duration::from_millis(20));
        cache.set("attendance:all", 2, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("unread:alice"), None);
        assert_eq!(cache.get("attendance:all"), Some(2));
    }

    #[test]
    fn test_invalidate_by_prefix_only_touches_prefix() {
        let cache = TtlCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("unread:alice", 1, ttl);
        cache.set("unread:bob", 2, ttl);
        cache.set("attendance:all", 3, ttl);
        // substring match in the middle must not count
        cache.set("x-unread:carol", 4, ttl);

        assert_eq!(cache.invalidate_by_prefix("unread:"), 2);
        assert_eq!(cache.get("unread:alice"), None);
        assert_eq!(cache.get("attendance:all"), Some(3));
        assert_eq!(cache.get("x-unread:carol"), Some(4));
    }

    #[test]
    fn test_set_replaces_value() {
        let cache = TtlCache::new();
        cache.set("k", 1, Duration::from_secs(60));
        cache.set("k", 2, Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(2));
        cache.clear();
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_set_if_current_refuses_superseded_value() {
        let cache = TtlCache::new();
        let ttl = Duration::from_secs(30);

        let seen = cache.generation();
        // a writer invalidates while the reader is still querying
        cache.invalidate_by_prefix("unread:alice");
        assert!(!cache.set_if_current("unread:alice", 5, ttl, seen));
        assert_eq!(cache.get("unread:alice"), None);

        let seen = cache.generation();
        assert!(cache.set_if_current("unread:alice", 6, ttl, seen));
        assert_eq!(cache.get("unread:alice"), Some(6));
    }
}
