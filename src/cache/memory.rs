use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::ResultCache;

/// Default capacity when the configured value is zero.
const DEFAULT_CAPACITY: usize = 10_000;

/// Longest lifetime an entry can get; larger TTLs are clamped to it.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

struct Entry {
    value: String,
    // Monotonic deadline: wall-clock jumps must not resurrect or kill entries.
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process [`ResultCache`] with per-entry TTL and LRU eviction.
///
/// The lock is a `std::sync::Mutex` held only for a single map operation and
/// never across an `.await`.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.lock();
        entries
            .peek(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at.saturating_duration_since(now))
    }

    /// Number of entries currently held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written,
        // so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.lock();
        let lookup = entries
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()));
        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        if ttl.is_zero() {
            self.lock().pop(key);
            return;
        }
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: now + ttl.min(MAX_TTL),
        };
        if let Some((evicted, _)) = self.lock().push(key.to_string(), entry) {
            if evicted != key {
                tracing::trace!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
    }

    async fn delete(&self, key: &str) {
        self.lock().pop(key);
    }

    async fn incr(&self, key: &str) -> Option<i64> {
        let now = Instant::now();
        let mut entries = self.lock();
        if !entries.peek(key).map(|e| e.is_live(now))? {
            entries.pop(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        let current: i64 = match entry.value.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(key = %key, "Cannot increment non-integer cache entry");
                return None;
            }
        };
        let next = current.saturating_add(1);
        entry.value = next.to_string();
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::default();
        cache
            .set("k", "v".to_string(), Duration::from_secs(10))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = MemoryCache::default();
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = MemoryCache::default();
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let cache = MemoryCache::default();
        cache.delete("absent").await;
        cache
            .set("k", "v".to_string(), Duration::from_secs(10))
            .await;
        cache.delete("k").await;
        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_incr_absent_returns_none_without_creating() {
        let cache = MemoryCache::default();
        assert_eq!(cache.incr("counter").await, None);
        assert!(cache.get("counter").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_keeps_original_deadline() {
        let cache = MemoryCache::default();
        cache
            .set("counter", "1".to_string(), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.incr("counter").await, Some(2));
        assert_eq!(cache.ttl("counter"), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.incr("counter").await, None);
    }

    #[tokio::test]
    async fn test_incr_non_integer_returns_none() {
        let cache = MemoryCache::default();
        cache
            .set("k", "abc".to_string(), Duration::from_secs(10))
            .await;
        assert_eq!(cache.incr("k").await, None);
        assert_eq!(cache.get("k").await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_zero_ttl_removes_entry() {
        let cache = MemoryCache::default();
        cache
            .set("k", "v".to_string(), Duration::from_secs(10))
            .await;
        cache.set("k", "w".to_string(), Duration::ZERO).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let cache = MemoryCache::default();
        cache
            .set("atom:x", "v".to_string(), Duration::from_secs(i64::MAX as u64))
            .await;
        assert_eq!(cache.get("atom:x").await.as_deref(), Some("v"));
        assert!(cache.ttl("atom:x").unwrap() <= MAX_TTL);

        cache.set("max", "v".to_string(), Duration::MAX).await;
        assert!(cache.get("max").await.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let cache = MemoryCache::new(2);
        cache.set("a", "1".to_string(), Duration::from_secs(10)).await;
        cache.set("b", "2".to_string(), Duration::from_secs(10)).await;
        // Touch "a" so "b" becomes least recently used
        cache.get("a").await;
        cache.set("c", "3".to_string(), Duration::from_secs(10)).await;

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }
}
