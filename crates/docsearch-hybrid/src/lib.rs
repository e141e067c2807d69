//! docsearch-hybrid
//!
//! Per-collection hybrid retrieval: BM25 and dense search fused with
//! Reciprocal Rank Fusion, optional query rewriting and cross-encoder
//! reranking, fronted by a generation-checked LRU result cache.
pub mod cache;
pub mod collection;
pub mod engine;
pub mod eval;
pub mod fusion;
pub mod generator;
pub mod guard;
pub mod optimizer;
pub mod rerank;

pub use cache::{CacheKey, ResultCache};
pub use engine::{EngineDeps, MethodComparison, RetrievalEngine};
pub use fusion::{fuse, fuse_variants};
pub use generator::ChatCompletionsGenerator;
pub use optimizer::extract_keywords;
