//! In-memory embedding cache keyed by `(content_hash, embedder_id)`.
//!
//! Values are shared `Arc`s so a caller keeps its vector even if the entry
//! is evicted right after the lookup.
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use docsearch_core::CacheStats;

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EmbeddingKey {
    content_hash: String,
    embedder_id: String,
}

pub struct EmbeddingCache {
    entries: Option<Mutex<LruCache<EmbeddingKey, Arc<Vec<f32>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// A zero capacity disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(embedder_id: &str, text: &str) -> EmbeddingKey {
        EmbeddingKey {
            content_hash: content_hash(text),
            embedder_id: embedder_id.to_string(),
        }
    }

    pub fn get(&self, embedder_id: &str, text: &str) -> Option<Arc<Vec<f32>>> {
        let entries = self.entries.as_ref()?;
        let found = entries.lock().get(&Self::key(embedder_id, text)).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, embedder_id: &str, text: &str, vector: Arc<Vec<f32>>) {
        if let Some(entries) = &self.entries {
            entries.lock().put(Self::key(embedder_id, text), vector);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }
}
