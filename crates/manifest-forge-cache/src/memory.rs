use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{ByteCache, CacheResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local backend: a mutex-guarded map from key to `(bytes, expiry)`.
/// A `get` past expiry reports a miss and evicts the entry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ByteCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let cache = MemoryCache::new();
        cache
            .set("a|b", b"payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("a|b").await.unwrap().as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn missing_key_is_a_miss_not_an_error() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted() {
        let cache = MemoryCache::new();
        cache
            .set("short", b"x", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let cache = MemoryCache::new();
        cache.set("k", b"first", Duration::from_secs(60)).await.unwrap();
        cache.set("k", b"second", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn keys_lists_live_entries() {
        let cache = MemoryCache::new();
        cache.set("one", b"1", Duration::from_secs(60)).await.unwrap();
        cache.set("two", b"2", Duration::from_secs(60)).await.unwrap();
        let mut keys = cache.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["one", "two"]);
    }
}
