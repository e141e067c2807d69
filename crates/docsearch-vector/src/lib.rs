//! docsearch-vector
//!
//! Exact cosine search over an append-friendly, segmented in-memory store,
//! plus an LRU embedding cache keyed by content hash and embedder id.
pub mod embed_cache;
pub mod store;

pub use embed_cache::{content_hash, EmbeddingCache};
pub use store::VectorStore;
