//! In-memory cache tier
//!
//! Access-ordered bounded map backed by an LRU cache. When a store for a
//! new key finds the cache full, the least recently used entry is evicted
//! and handed back to the caller before the new entry is admitted.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::error::Result;
use crate::record::types::Record;
use crate::storage::tier::{EntryTimes, TierStorage};

/// Capacity used when a zero capacity slips through
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct CacheTier {
    cache: Mutex<LruCache<String, Record>>,
}

impl CacheTier {
    /// Creates a new cache tier with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns the maximum capacity of the cache
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

#[async_trait]
impl TierStorage for CacheTier {
    async fn store(&self, record: Record) -> Result<Option<Record>> {
        let key = record.key.clone();
        let displaced = self.cache.lock().push(key.clone(), record);
        // `push` also returns the old value when the key was already cached;
        // only a different key is an eviction.
        Ok(displaced.and_then(|(k, v)| if k == key { None } else { Some(v) }))
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.cache.lock().get(key).cloned())
    }

    async fn peek(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.cache.lock().peek(key).cloned())
    }

    async fn touch(&self, record: &Record) -> Result<()> {
        if let Some(entry) = self.cache.lock().peek_mut(&record.key) {
            entry.access_count = record.access_count;
            entry.last_accessed = record.last_accessed;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.cache.lock().contains(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.lock().pop(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.lock().clear();
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.cache.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    fn entry_times(&self) -> Vec<EntryTimes> {
        self.cache
            .lock()
            .iter()
            .map(|(k, r)| EntryTimes {
                key: k.clone(),
                created_at: r.created_at,
                last_accessed: r.last_accessed,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> Record {
        Record::new(key, format!("content of {key}"))
    }

    #[tokio::test]
    async fn test_new_cache_is_empty() {
        let cache = CacheTier::new(100);
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.capacity(), 100);
    }

    #[tokio::test]
    async fn test_zero_capacity_uses_default() {
        let cache = CacheTier::new(0);
        assert_eq!(cache.capacity(), DEFAULT_CACHE_CAPACITY);
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let cache = CacheTier::new(10);
        assert!(cache.store(record("a")).await.unwrap().is_none());

        let got = cache.retrieve("a").await.unwrap().unwrap();
        assert_eq!(got.content, "content of a");
        assert!(cache.exists("a").await.unwrap());
        assert!(cache.retrieve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = CacheTier::new(3);
        cache.store(record("k1")).await.unwrap();
        cache.store(record("k2")).await.unwrap();
        cache.store(record("k3")).await.unwrap();

        // Access k1 to make it recently used
        assert!(cache.retrieve("k1").await.unwrap().is_some());

        // k2 is now least recently used
        let evicted = cache.store(record("k4")).await.unwrap();
        assert_eq!(evicted.map(|r| r.key), Some("k2".to_string()));
        assert_eq!(cache.len(), 3);
        assert!(!cache.exists("k2").await.unwrap());
        assert!(cache.exists("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_peek_does_not_update_recency() {
        let cache = CacheTier::new(2);
        cache.store(record("k1")).await.unwrap();
        cache.store(record("k2")).await.unwrap();

        assert!(cache.peek("k1").await.unwrap().is_some());

        let evicted = cache.store(record("k3")).await.unwrap();
        assert_eq!(evicted.map(|r| r.key), Some("k1".to_string()));
    }

    #[tokio::test]
    async fn test_storing_same_key_is_not_an_eviction() {
        let cache = CacheTier::new(1);
        cache.store(record("k1")).await.unwrap();
        let mut updated = record("k1");
        updated.content = "new".into();
        assert!(cache.store(updated).await.unwrap().is_none());
        assert_eq!(cache.peek("k1").await.unwrap().unwrap().content, "new");
    }

    #[tokio::test]
    async fn test_touch_updates_access_metadata() {
        let cache = CacheTier::new(2);
        let mut r = record("k1");
        cache.store(r.clone()).await.unwrap();
        r.mark_accessed(chrono::Utc::now());
        cache.touch(&r).await.unwrap();
        assert_eq!(cache.peek("k1").await.unwrap().unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = CacheTier::new(5);
        cache.store(record("a")).await.unwrap();
        cache.store(record("b")).await.unwrap();

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
        assert_eq!(cache.keys(), vec!["b".to_string()]);

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
    }
}
