//! Domain types shared by the lexical, semantic and hybrid engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type CollectionId = String;
pub type Meta = HashMap<String, String>;

/// Location of a chunk inside its source document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub page: Option<u32>,
    pub offset: usize,
}

/// An immutable unit of retrievable text.
///
/// - `id`: unique within a collection
/// - `source_document_id`: stable identity of the parent document
/// - `embedding`: filled in by the collection at indexing time unless supplied
/// - `metadata`: free-form key/value pairs carried through to results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub source_document_id: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn new(
        id: impl Into<ChunkId>,
        source_document_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_document_id: source_document_id.into(),
            position: Position::default(),
            embedding: None,
            metadata: Meta::new(),
        }
    }

    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Indicates which index produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Vector,
    Text,
}

/// Raw index output before chunks are attached.
///
/// `id` matches `Chunk::id`. `score` is index-specific but higher is
/// always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

/// Pipeline stage that produced a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lexical,
    Semantic,
    Fused,
    Final,
}

/// A chunk with its score and 1-based rank for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub rank: usize,
    pub stage: Stage,
}

impl RankedCandidate {
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

/// Relative weight of each ranked list during fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub lexical: f64,
    pub semantic: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 1.0,
            semantic: 1.0,
        }
    }
}

pub const DEFAULT_K: usize = 5;
pub const DEFAULT_CANDIDATE_POOL: usize = 20;
pub const DEFAULT_RANK_CONSTANT: f64 = 60.0;

/// Per-request switches and bounds for one retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    pub k: usize,
    pub use_hybrid: bool,
    pub use_query_expansion: bool,
    pub use_hyde: bool,
    pub use_decomposition: bool,
    pub use_reranking: bool,
    pub candidate_pool_size: usize,
    pub weights: FusionWeights,
    pub rank_constant: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            use_hybrid: true,
            use_query_expansion: false,
            use_hyde: false,
            use_decomposition: false,
            use_reranking: true,
            candidate_pool_size: DEFAULT_CANDIDATE_POOL,
            weights: FusionWeights::default(),
            rank_constant: DEFAULT_RANK_CONSTANT,
        }
    }
}

impl RetrievalOptions {
    /// Reject option combinations that can never produce a ranking.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidConfig("k must be greater than zero".into()));
        }
        if self.candidate_pool_size < self.k {
            return Err(Error::InvalidConfig(format!(
                "candidate_pool_size ({}) must be at least k ({})",
                self.candidate_pool_size, self.k
            )));
        }
        if !self.rank_constant.is_finite() || self.rank_constant < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "rank_constant must be a non-negative number, got {}",
                self.rank_constant
            )));
        }
        let FusionWeights { lexical, semantic } = self.weights;
        for (name, w) in [("lexical", lexical), ("semantic", semantic)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} weight must be a non-negative number, got {w}"
                )));
            }
        }
        if self.use_hybrid && lexical + semantic <= 0.0 {
            return Err(Error::InvalidConfig(
                "at least one fusion weight must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Stable textual form of every field that changes the ranking.
    pub fn fingerprint(&self) -> String {
        let mut out = String::with_capacity(96);
        let _ = write!(
            out,
            "k={};hybrid={};expand={};hyde={};decompose={};rerank={};pool={};wl={};ws={};rc={}",
            self.k,
            self.use_hybrid,
            self.use_query_expansion,
            self.use_hyde,
            self.use_decomposition,
            self.use_reranking,
            self.candidate_pool_size,
            self.weights.lexical,
            self.weights.semantic,
            self.rank_constant,
        );
        out
    }
}

/// Where a query variant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantOrigin {
    Original,
    Expansion,
    Decomposition,
}

/// One reformulation searched independently before cross-variant fusion.
///
/// `semantic_text` holds a hypothetical answer passage when one was
/// generated; it replaces `text` on the semantic path only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub text: String,
    pub semantic_text: Option<String>,
    pub origin: VariantOrigin,
}

impl QueryVariant {
    pub fn new(text: impl Into<String>, origin: VariantOrigin) -> Self {
        Self {
            text: text.into(),
            semantic_text: None,
            origin,
        }
    }

    pub fn semantic_input(&self) -> &str {
        self.semantic_text.as_deref().unwrap_or(&self.text)
    }
}

/// A validated retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub collection_id: CollectionId,
    pub text: String,
    pub options: RetrievalOptions,
}

impl RetrievalQuery {
    pub fn new(
        collection_id: impl Into<CollectionId>,
        text: impl Into<String>,
        options: RetrievalOptions,
    ) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::InvalidConfig("query text is empty".into()));
        }
        options.validate()?;
        Ok(Self {
            collection_id: collection_id.into(),
            text,
            options,
        })
    }

    /// Lowercased text with whitespace runs collapsed, used for cache keys.
    pub fn normalized_text(&self) -> String {
        normalize_query(&self.text)
    }
}

pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outcome of one pipeline stage for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Skipped,
    Ran,
    /// Requested, but no model is configured for it.
    Unavailable(String),
    /// Requested, but the dependency failed or timed out.
    Degraded(String),
}

impl StageStatus {
    /// The stage was requested and did not run.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_) | Self::Unavailable(_))
    }

    pub fn ran(&self) -> bool {
        matches!(self, Self::Ran)
    }
}

/// Which stages ran, were skipped, or fell back for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub expansion: StageStatus,
    pub hyde: StageStatus,
    pub decomposition: StageStatus,
    pub lexical: StageStatus,
    pub semantic: StageStatus,
    pub rerank: StageStatus,
    pub variants: usize,
    pub integrity_warning: bool,
}

impl StageReport {
    pub fn degraded(&self) -> bool {
        self.integrity_warning
            || [
                &self.expansion,
                &self.hyde,
                &self.decomposition,
                &self.lexical,
                &self.semantic,
                &self.rerank,
            ]
            .iter()
            .any(|s| s.is_degraded())
    }

    /// True when the same request would produce the same ranking again:
    /// no integrity warning and no stage lost to a failing dependency.
    /// Stages without a configured model are stable and do not count.
    pub fn cacheable(&self) -> bool {
        !self.integrity_warning
            && ![
                &self.expansion,
                &self.hyde,
                &self.decomposition,
                &self.lexical,
                &self.semantic,
                &self.rerank,
            ]
            .iter()
            .any(|s| matches!(s, StageStatus::Degraded(_)))
    }
}

/// Final ranking plus the stage report that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub candidates: Vec<RankedCandidate>,
    pub stages: StageReport,
    pub from_cache: bool,
}

/// Hit and miss counters for one collection's cached results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Operational view of one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionHealth {
    pub collection_id: CollectionId,
    pub chunk_count: usize,
    pub lexical_docs: u64,
    pub semantic_vectors: usize,
    pub consistent: bool,
    pub integrity_events: u64,
    pub generation: u64,
    pub last_build: DateTime<Utc>,
    pub cache: CacheStats,
    pub cache_hit_ratio: f64,
}
