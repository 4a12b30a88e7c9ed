//! Expiring key/value map.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Pod name → last launch error, for pods that are skipped until expiry.
pub type FailureCache = TtlCache<String, String>;

/// A map whose entries expire a fixed `ttl` after they were written.
///
/// Expired entries are evicted lazily on lookup or by
/// [`retain`](Self::retain); there is no background sweep.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite `key`, restarting its expiry window.
    pub fn set(&mut self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// The live value for `key`, evicting it if it has expired.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| Instant::now() >= e.expires_at);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn delete(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Keep the live entries whose key satisfies `keep`; drop the rest,
    /// expired ones included.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let now = Instant::now();
        self.entries.retain(|k, e| now < e.expires_at && keep(k));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn get_returns_fresh_values() {
        let mut cache = TtlCache::new(Duration::from_secs(300));
        cache.set("k", 1);
        assert_eq!(cache.get(&"k"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_and_rewritable() {
        let mut cache = TtlCache::new(Duration::from_secs(300));
        cache.set("k", 1);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());

        cache.set("k", 2);
        assert_eq!(cache.get(&"k"), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_restarts_the_window() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.set("k", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("k", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&"k"), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_clear() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.delete(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert_eq!(cache.get(&"b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retain_drops_unwanted_and_expired_keys() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.set("old", 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("kept", 2);
        cache.set("deleted", 3);
        tokio::time::advance(Duration::from_secs(6)).await;

        cache.retain(|k| *k != "deleted");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"kept"), Some(&2));
    }
}
