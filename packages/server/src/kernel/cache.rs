//! Read-through TTL cache for catalog and per-customer views.
//!
//! Entries are reconstructible at any time from the system of record and are
//! never authoritative. Correctness relies on writers eagerly invalidating
//! the affected keys *and* on the TTL as a bounded-staleness backstop, since
//! eager invalidation alone does not survive process restarts or a missed
//! code path.
//!
//! Thread-safe, process-local. Payloads are `serde_json::Value`; callers
//! serialize their own types.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::common::{CoreResult, CustomerId};

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

#[derive(Default)]
pub struct ReadThroughCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ReadThroughCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `key` from cache when present and unexpired; otherwise run the
    /// loader, store its result for `ttl`, and return it.
    ///
    /// Two concurrent misses may both run the loader; the last write wins,
    /// which is fine for non-authoritative data.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CoreResult<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<serde_json::Value>>,
    {
        if let Some(value) = self.peek(key).await {
            return Ok(value);
        }

        let value = loader().await?;
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(value)
    }

    /// Unexpired cached value for `key`, if any. Lazily evicts an expired
    /// entry it finds in the way.
    pub async fn peek(&self, key: &str) -> Option<serde_json::Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so the map does not accumulate dead entries.
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
        None
    }

    /// Eagerly evict `key`. Writers call this right after any mutation that
    /// would make the cached view stale.
    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    /// Remove expired entries (housekeeping).
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// =============================================================================
// Key families
// =============================================================================

/// Catalog-facing grain listing.
pub fn catalog_key() -> String {
    "catalog:grains".to_string()
}

/// A customer's order view.
pub fn customer_orders_key(customer_id: CustomerId) -> String {
    format!("orders:customer:{customer_id}")
}

/// Session/user lookup by token digest.
pub fn session_key(token: &str) -> String {
    format!("session:{token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_through_loads_once() {
        let cache = ReadThroughCache::new();
        let ttl = Duration::from_secs(60);

        let first = cache
            .get_or_load("catalog:grains", ttl, || async { Ok(json!({"stock": 10})) })
            .await
            .unwrap();
        assert_eq!(first, json!({"stock": 10}));

        // Second read must come from cache, not the loader.
        let second = cache
            .get_or_load("catalog:grains", ttl, || async {
                panic!("loader must not run on a warm cache")
            })
            .await
            .unwrap();
        assert_eq!(second, json!({"stock": 10}));
    }

    #[tokio::test]
    async fn test_invalidate_beats_ttl() {
        let cache = ReadThroughCache::new();
        let ttl = Duration::from_secs(3600);

        cache
            .get_or_load("catalog:grains", ttl, || async { Ok(json!({"stock": 10})) })
            .await
            .unwrap();

        // Mutation happened: eager invalidation, TTL nowhere near expiry.
        cache.invalidate("catalog:grains").await;

        let reloaded = cache
            .get_or_load("catalog:grains", ttl, || async { Ok(json!({"stock": 8})) })
            .await
            .unwrap();
        assert_eq!(reloaded, json!({"stock": 8}));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ReadThroughCache::new();

        cache
            .get_or_load("session:abc", Duration::from_millis(20), || async {
                Ok(json!("alice"))
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.peek("session:abc").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let cache = ReadThroughCache::new();
        cache
            .get_or_load("a", Duration::from_millis(10), || async { Ok(json!(1)) })
            .await
            .unwrap();
        cache
            .get_or_load("b", Duration::from_secs(60), || async { Ok(json!(2)) })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.purge_expired().await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.peek("b").await, Some(json!(2)));
    }
}
