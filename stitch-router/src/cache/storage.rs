use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use http::HeaderMap;
use lru::LruCache;
use sha2::Digest;
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::graphql;

/// Key of a memoized response: SHA-256 over the query, the operation name, the variables and
/// the values of the headers the response varies on.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct CacheKey(String);

impl CacheKey {
    /// `vary` lists the request headers forwarded upstream, such as credentials.
    pub(crate) fn new(request: &graphql::Request, headers: &HeaderMap, vary: &[String]) -> Self {
        let mut digest = Sha256::new();
        digest.update(request.query.as_deref().unwrap_or_default().as_bytes());
        digest.update([0]);
        digest.update(request.operation_name.as_deref().unwrap_or_default().as_bytes());
        digest.update([0]);
        digest.update(serde_json::to_vec(&request.variables).unwrap_or_default());
        for name in vary {
            digest.update([0]);
            digest.update(name.to_ascii_lowercase().as_bytes());
            for value in headers.get_all(name.as_str()) {
                digest.update([1]);
                digest.update(value.as_bytes());
            }
        }
        CacheKey(hex::encode(digest.finalize()))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct CachedResponse {
    pub(crate) body: Bytes,
    pub(crate) max_age: u32,
    stored_at: Instant,
}

impl CachedResponse {
    /// Seconds spent in the cache.
    pub(crate) fn age(&self) -> u32 {
        self.stored_at.elapsed().as_secs() as u32
    }

    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < Duration::from_secs(self.max_age.into())
    }

    fn weight(&self, key: &CacheKey) -> u64 {
        (self.body.len() + key.0.len()) as u64
    }
}

struct Inner {
    entries: LruCache<CacheKey, CachedResponse>,
    used: u64,
}

/// In memory LRU storage of serialized responses, bounded by a byte budget.
pub(crate) struct ResponseCache {
    inner: Mutex<Inner>,
    capacity: u64,
}

impl ResponseCache {
    pub(crate) fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                used: 0,
            }),
            capacity,
        }
    }

    pub(crate) async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get(key).cloned()?;
        if entry.is_fresh() {
            return Some(entry);
        }
        inner.entries.pop(key);
        inner.used -= entry.weight(key);
        None
    }

    /// Stores a response for `max_age` seconds. Entries larger than the whole budget are
    /// skipped.
    pub(crate) async fn insert(&self, key: CacheKey, body: Bytes, max_age: u32) {
        let entry = CachedResponse {
            body,
            max_age,
            stored_at: Instant::now(),
        };
        let weight = entry.weight(&key);
        if weight > self.capacity {
            tracing::debug!(weight, capacity = self.capacity, "response too large to cache");
            return;
        }

        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.entries.pop(&key) {
            inner.used -= previous.weight(&key);
        }
        while inner.used + weight > self.capacity {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => inner.used -= evicted.weight(&evicted_key),
                None => break,
            }
        }
        inner.used += weight;
        inner.entries.put(key, entry);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}
