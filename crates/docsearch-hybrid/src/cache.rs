//! LRU result cache keyed by (collection, normalized query, option fingerprint).
//!
//! Entries are `Arc`s: eviction drops the cache's reference only, so a reader
//! that already fetched an entry keeps it intact. Each entry records the
//! collection generation it was computed against and is ignored once the
//! collection has moved on, or once it is older than the configured TTL.
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use docsearch_core::{CacheStats, ChunkId, CollectionId, RetrievalQuery, StageReport};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    collection_id: CollectionId,
    digest: String,
}

impl CacheKey {
    pub fn new(collection_id: &str, normalized_query: &str, fingerprint: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(collection_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(normalized_query.as_bytes());
        hasher.update(&[0]);
        hasher.update(fingerprint.as_bytes());
        Self {
            collection_id: collection_id.to_string(),
            digest: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn for_query(query: &RetrievalQuery) -> Self {
        Self::new(
            &query.collection_id,
            &query.normalized_text(),
            &query.options.fingerprint(),
        )
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }
}

/// Final ranking as `(chunk_id, score)` in rank order.
#[derive(Debug, Clone)]
pub struct CachedRanking {
    pub entries: Vec<(ChunkId, f32)>,
    pub stages: StageReport,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl CachedRanking {
    fn expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        ttl.is_some_and(|ttl| now - self.created_at > ttl)
    }
}

pub struct ResultCache {
    entries: Mutex<LruCache<CacheKey, Arc<CachedRanking>>>,
    stats: Mutex<HashMap<CollectionId, CacheStats>>,
    ttl: Option<Duration>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Entries older than `ttl_secs` become misses; zero keeps them until evicted.
    #[must_use]
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl = i64::try_from(ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Any entry for `key`, regardless of generation. Not counted in stats.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedRanking>> {
        self.entries.lock().get(key).cloned()
    }

    /// The entry for `key` if it was computed at `generation` and has not
    /// expired; counted as a hit or miss for the key's collection. Stale
    /// entries are dropped.
    pub fn get_fresh(&self, key: &CacheKey, generation: u64) -> Option<Arc<CachedRanking>> {
        let now = Utc::now();
        let found = {
            let mut entries = self.entries.lock();
            match entries.get(key).cloned() {
                Some(hit) if hit.generation == generation && !hit.expired(self.ttl, now) => {
                    Some(hit)
                }
                Some(_) => {
                    entries.pop(key);
                    None
                }
                None => None,
            }
        };
        let mut stats = self.stats.lock();
        let counters = stats.entry(key.collection_id.clone()).or_default();
        if found.is_some() {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
        found
    }

    pub fn put(&self, key: CacheKey, value: CachedRanking) {
        self.entries.lock().put(key, Arc::new(value));
    }

    /// Drop every entry of `collection_id`. Returns how many were removed.
    pub fn invalidate(&self, collection_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| k.collection_id == collection_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        debug!(collection = collection_id, removed = stale.len(), "result cache invalidated");
        stale.len()
    }

    /// Invalidate and reset the counters of a deleted collection.
    pub fn forget(&self, collection_id: &str) {
        self.invalidate(collection_id);
        self.stats.lock().remove(collection_id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn stats(&self, collection_id: &str) -> CacheStats {
        self.stats
            .lock()
            .get(collection_id)
            .copied()
            .unwrap_or_default()
    }
}
