#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use docsearch_core::config::{CallSettings, Settings};
use docsearch_core::traits::{Embedder, Generator, PairScorer};
use docsearch_core::{Chunk, RetrievalOptions};
use docsearch_embed::{FakeEmbedder, TokenOverlapScorer};
use docsearch_hybrid::{EngineDeps, RetrievalEngine};

pub const DIM: usize = 256;
pub const COLLECTION: &str = "session-1";

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    let fast = CallSettings {
        timeout_ms: 2_000,
        max_retries: 1,
        backoff_ms: 1,
    };
    settings.dependencies.embedding = fast;
    settings.dependencies.rerank = fast;
    settings.dependencies.generation = fast;
    settings
}

/// Hybrid, no rewrites, no rerank.
pub fn plain(k: usize) -> RetrievalOptions {
    RetrievalOptions {
        k,
        use_reranking: false,
        ..RetrievalOptions::default()
    }
}

pub fn revenue_chunks() -> Vec<Chunk> {
    vec![
        Chunk::new("c1", "report", "revenue was 10M"),
        Chunk::new("c2", "report", "revenue grew 5 percent"),
        Chunk::new("c3", "notes", "unrelated text about weather"),
    ]
}

pub async fn engine_with(deps: EngineDeps) -> RetrievalEngine {
    let engine = RetrievalEngine::new(deps, &settings());
    engine.create_collection(COLLECTION).expect("create");
    engine
        .add_chunks(COLLECTION, revenue_chunks())
        .await
        .expect("add chunks");
    engine
}

pub async fn revenue_engine() -> RetrievalEngine {
    engine_with(EngineDeps::new(Arc::new(FakeEmbedder::new(DIM)))).await
}

pub fn ids(candidates: &[docsearch_core::RankedCandidate]) -> Vec<String> {
    candidates.iter().map(|c| c.chunk.id.clone()).collect()
}

/// Hashing embedder that can be switched into a failing state.
pub struct ToggleEmbedder {
    inner: FakeEmbedder,
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl ToggleEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: FakeEmbedder::new(DIM),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl Embedder for ToggleEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding service unavailable"));
        }
        self.inner.embed_batch(texts)
    }
}

/// Hashing embedder that keeps every text it was asked to embed.
pub struct RecordingEmbedder {
    inner: FakeEmbedder,
    pub seen: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: FakeEmbedder::new(DIM),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("lock").clone()
    }
}

impl Embedder for RecordingEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.seen.lock().expect("lock").extend_from_slice(texts);
        self.inner.embed_batch(texts)
    }
}

/// Token-overlap scorer that records the largest batch it was handed.
#[derive(Default)]
pub struct CountingScorer {
    pub max_seen: AtomicUsize,
    pub calls: AtomicUsize,
}

impl PairScorer for CountingScorer {
    fn model_id(&self) -> &str {
        "counting"
    }

    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.max_seen.fetch_max(passages.len(), Ordering::SeqCst);
        TokenOverlapScorer.score_pairs(query, passages)
    }
}

pub struct FailingScorer;

impl PairScorer for FailingScorer {
    fn model_id(&self) -> &str {
        "failing"
    }

    fn score_pairs(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
        Err(anyhow!("rerank model crashed"))
    }
}

/// Answers by prompt kind; `None` makes that kind fail.
pub struct ScriptedGenerator {
    pub expansion: Option<String>,
    pub hyde: Option<String>,
    pub decomposition: Option<String>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn failing() -> Self {
        Self {
            expansion: None,
            hyde: None,
            decomposition: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = if prompt.contains("variations") {
            self.expansion.clone()
        } else if prompt.contains("Hypothetical passage") {
            self.hyde.clone()
        } else if prompt.contains("Sub-questions") {
            self.decomposition.clone()
        } else {
            None
        };
        answer.ok_or_else(|| anyhow!("generator offline"))
    }
}
