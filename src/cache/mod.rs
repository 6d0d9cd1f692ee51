//! Advisory read-through cache.
//!
//! The cache is a UX optimization, never a correctness input: every
//! mutation invalidates best-effort, and a brief staleness window is
//! acceptable. The trait exists so a multi-instance deployment can plug
//! in a shared cache instead of the in-process map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the cached value if present and not expired.
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Drop every entry whose key starts with `scope`.
    async fn invalidate(&self, scope: &str);
}

/// In-memory TTL cache with a soft capacity.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            _ => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        if entries.len() >= self.capacity && !entries.contains_key(key) {
            // Full of live entries: evict whichever expires soonest.
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, (_, expires))| *expires)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
            }
        }
        entries.insert(key.to_string(), (value, now + ttl));
    }

    async fn invalidate(&self, scope: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !key.starts_with(scope));
    }
}

/// Cache that stores nothing; used when caching is disabled in config.
pub struct NoopCache;

#[async_trait]
impl CacheStore for NoopCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}

    async fn invalidate(&self, _scope: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_live_entries_only() {
        let cache = MemoryCache::new(16);
        cache
            .set("u:1:rec:a", "v".into(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("u:1:rec:a").await.as_deref(), Some("v"));

        cache
            .set("u:1:rec:b", "w".into(), Duration::from_millis(0))
            .await;
        assert_eq!(cache.get("u:1:rec:b").await, None);
    }

    #[tokio::test]
    async fn invalidate_is_prefix_scoped() {
        let cache = MemoryCache::new(16);
        cache.set("u:1:rec:a", "v".into(), Duration::from_secs(60)).await;
        cache.set("u:1:list:x", "v".into(), Duration::from_secs(60)).await;
        cache.set("u:2:rec:a", "v".into(), Duration::from_secs(60)).await;

        cache.invalidate("u:1:").await;
        assert_eq!(cache.get("u:1:rec:a").await, None);
        assert_eq!(cache.get("u:1:list:x").await, None);
        assert!(cache.get("u:2:rec:a").await.is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_instead_of_growing() {
        let cache = MemoryCache::new(2);
        cache.set("a", "1".into(), Duration::from_secs(60)).await;
        cache.set("b", "2".into(), Duration::from_secs(120)).await;
        cache.set("c", "3".into(), Duration::from_secs(180)).await;

        let live = [
            cache.get("a").await.is_some(),
            cache.get("b").await.is_some(),
            cache.get("c").await.is_some(),
        ];
        assert_eq!(live.iter().filter(|l| **l).count(), 2);
        assert!(cache.get("c").await.is_some());
    }
}
