//! Result memoization: LRU with a per-entry TTL.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use trackq_core::IntentKind;

/// Cache key for one (intent, filter) pair.
pub fn cache_key(intent: IntentKind, filter: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intent.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(filter.trim().as_bytes());
    hex::encode(hasher.finalize())
}

struct Cached<V> {
    value: V,
    stored_at: Instant,
}

/// Bounded cache whose entries also expire after `ttl`.
pub struct ResultCache<V> {
    ttl: Duration,
    entries: Mutex<LruCache<String, Cached<V>>>,
}

impl<V: Clone> ResultCache<V> {
    /// `capacity` of zero is raised to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(c) if c.stored_at.elapsed() < self.ttl => return Some(c.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub async fn insert(&self, key: String, value: V) {
        self.entries.lock().await.put(
            key,
            Cached {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_intent_and_filter() {
        let a = cache_key(IntentKind::List, "project = CCM");
        assert_eq!(a.len(), 64);
        assert_eq!(a, cache_key(IntentKind::List, " project = CCM "));
        assert_ne!(a, cache_key(IntentKind::Count, "project = CCM"));
        assert_ne!(a, cache_key(IntentKind::List, "project = OPS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResultCache::new(4, Duration::from_secs(120));
        cache.insert("k".into(), 1).await;
        assert_eq!(cache.get("k").await, Some(1));
        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let cache = ResultCache::new(2, Duration::from_secs(120));
        cache.insert("a".into(), 1).await;
        cache.insert("b".into(), 2).await;
        cache.get("a").await;
        cache.insert("c".into(), 3).await;
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("c").await, Some(3));
    }
}
