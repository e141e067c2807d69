//! Collection registry and the retrieval pipeline:
//! plan variants -> lexical + semantic per variant -> fuse -> rerank -> cache.
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use docsearch_core::config::Settings;
use docsearch_core::traits::{Embedder, Generator, PairScorer};
use docsearch_core::{
    Chunk, ChunkId, CollectionHealth, CollectionId, Dependency, Error, QueryVariant,
    RankedCandidate, Result, RetrievalOptions, RetrievalOutcome, RetrievalQuery, Stage,
    StageReport, StageStatus, VariantOrigin,
};
use docsearch_vector::EmbeddingCache;

use crate::cache::{CacheKey, CachedRanking, ResultCache};
use crate::collection::{Collection, CollectionSnapshot};
use crate::fusion::{finalize, fuse, fuse_variants};
use crate::generator::ChatCompletionsGenerator;
use crate::guard::{call_blocking, CallPolicy};
use crate::optimizer::QueryOptimizer;
use crate::rerank::Reranker;

const EMBED_BATCH: usize = 64;

/// External models the engine calls out to.
pub struct EngineDeps {
    pub embedder: Arc<dyn Embedder>,
    pub scorer: Option<Arc<dyn PairScorer>>,
    pub generator: Option<Arc<dyn Generator>>,
}

impl EngineDeps {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            scorer: None,
            generator: None,
        }
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn PairScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }
}

/// Lexical-only, semantic-only and hybrid rankings for one query.
#[derive(Debug, Clone, Serialize)]
pub struct MethodComparison {
    pub query: String,
    pub keywords: Vec<String>,
    pub lexical: Vec<RankedCandidate>,
    pub semantic: Vec<RankedCandidate>,
    pub hybrid: Vec<RankedCandidate>,
}

pub struct RetrievalEngine {
    collections: RwLock<HashMap<CollectionId, Arc<Collection>>>,
    generations: Arc<AtomicU64>,
    embedder: Arc<dyn Embedder>,
    embed_policy: CallPolicy,
    embeddings: EmbeddingCache,
    optimizer: QueryOptimizer,
    reranker: Reranker,
    cache: ResultCache,
    defaults: RetrievalOptions,
}

impl RetrievalEngine {
    pub fn new(deps: EngineDeps, settings: &Settings) -> Self {
        let dependencies = &settings.dependencies;
        Self {
            collections: RwLock::new(HashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            embedder: deps.embedder,
            embed_policy: CallPolicy::from_settings(Dependency::Embedding, &dependencies.embedding),
            embeddings: EmbeddingCache::new(settings.cache.embedding_capacity),
            optimizer: QueryOptimizer::new(
                deps.generator,
                CallPolicy::from_settings(Dependency::Generation, &dependencies.generation),
            ),
            reranker: Reranker::new(
                deps.scorer,
                CallPolicy::from_settings(Dependency::Rerank, &dependencies.rerank),
            ),
            cache: ResultCache::new(settings.cache.capacity).with_ttl_secs(settings.cache.ttl_secs),
            defaults: settings.retrieval.default_options(),
        }
    }

    /// Engine wired to the configured local models and HTTP generator.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let mut deps = EngineDeps::new(docsearch_embed::get_default_embedder(&settings.models)?);
        deps.scorer = docsearch_embed::get_default_scorer(&settings.models)?;
        deps.generator = ChatCompletionsGenerator::from_settings(&settings.models)
            .map(|g| Arc::new(g) as Arc<dyn Generator>);
        info!(
            embedder = deps.embedder.model_id(),
            reranker = ?deps.scorer.as_ref().map(|s| s.model_id()),
            generator = deps.generator.is_some(),
            "retrieval engine configured"
        );
        Ok(Self::new(deps, settings))
    }

    /// Configured defaults; reranking is off when no rerank model exists.
    pub fn default_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            use_reranking: self.defaults.use_reranking && self.reranker.is_available(),
            ..self.defaults.clone()
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn embedding_cache(&self) -> &EmbeddingCache {
        &self.embeddings
    }

    pub fn clear_caches(&self) {
        self.cache.clear();
        self.embeddings.clear();
        info!("result and embedding caches cleared");
    }

    // ---- registry ----

    pub fn create_collection(&self, collection_id: &str) -> Result<()> {
        if collection_id.trim().is_empty() {
            return Err(Error::InvalidConfig("collection id is empty".into()));
        }
        let mut collections = self.collections.write();
        if collections.contains_key(collection_id) {
            return Err(Error::CollectionExists(collection_id.to_string()));
        }
        let collection = Collection::new(
            collection_id,
            self.embedder.dim(),
            Arc::clone(&self.generations),
        )?;
        collections.insert(collection_id.to_string(), Arc::new(collection));
        info!(collection = collection_id, dim = self.embedder.dim(), "collection created");
        Ok(())
    }

    pub fn delete_collection(&self, collection_id: &str) -> Result<()> {
        let removed = self.collections.write().remove(collection_id);
        if removed.is_none() {
            return Err(Error::UnknownCollection(collection_id.to_string()));
        }
        self.cache.forget(collection_id);
        info!(collection = collection_id, "collection deleted");
        Ok(())
    }

    pub fn collection_ids(&self) -> Vec<CollectionId> {
        let mut ids: Vec<CollectionId> = self.collections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn collection(&self, collection_id: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(collection_id)
            .cloned()
            .ok_or_else(|| Error::UnknownCollection(collection_id.to_string()))
    }

    // ---- mutations ----

    /// Embed chunks that carry no vector, index them, then invalidate the
    /// collection's cached results. Returns the number of chunks added.
    pub async fn add_chunks(&self, collection_id: &str, mut chunks: Vec<Chunk>) -> Result<usize> {
        let collection = self.collection(collection_id)?;
        if chunks.is_empty() {
            return Ok(0);
        }
        let writer = collection.lock_writer().await;

        let missing: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| chunks[i].text.clone()).collect();
            let vectors = self.embed_texts(&texts).await?;
            for (i, v) in missing.into_iter().zip(vectors) {
                chunks[i].embedding = Some(v.as_ref().clone());
            }
        }

        let added = chunks.len();
        collection.publish_add(&writer, chunks)?;
        self.cache.invalidate(collection_id);
        Ok(added)
    }

    /// Remove chunks by id; unknown ids are ignored. Returns how many were
    /// removed. Cached results are invalidated either way.
    pub async fn remove_chunks(&self, collection_id: &str, ids: &[ChunkId]) -> Result<usize> {
        let collection = self.collection(collection_id)?;
        let writer = collection.lock_writer().await;
        let before = collection.snapshot().len();
        let removed = match collection.publish_remove(&writer, ids)? {
            Some(next) => before - next.len(),
            None => 0,
        };
        self.cache.invalidate(collection_id);
        Ok(removed)
    }

    // ---- embeddings ----

    /// Vectors for `texts` in input order, from the embedding cache where
    /// possible and in batches from the model otherwise.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Arc<Vec<f32>>>> {
        let model = self.embedder.model_id().to_string();
        let dim = self.embedder.dim();
        let mut out: Vec<Option<Arc<Vec<f32>>>> =
            texts.iter().map(|t| self.embeddings.get(&model, t)).collect();
        let missing: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        for batch in missing.chunks(EMBED_BATCH) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let embedder = Arc::clone(&self.embedder);
            let vectors =
                call_blocking(&self.embed_policy, move || embedder.embed_batch(&inputs)).await?;
            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingService(format!(
                    "model returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (&i, v) in batch.iter().zip(vectors) {
                if v.len() != dim {
                    return Err(Error::DimensionMismatch {
                        expected: dim,
                        actual: v.len(),
                    });
                }
                let v = Arc::new(v);
                self.embeddings.put(&model, &texts[i], Arc::clone(&v));
                out[i] = Some(v);
            }
        }
        debug!(texts = texts.len(), embedded = missing.len(), "embeddings resolved");
        Ok(out.into_iter().flatten().collect())
    }

    // ---- retrieval ----

    /// Ranked chunks for `text` in `collection_id`, best first.
    ///
    /// Dependency failures degrade the affected stage and are reported in
    /// the outcome's stage report; only the loss of both lexical and
    /// semantic search fails the request.
    pub async fn retrieve(
        &self,
        collection_id: &str,
        text: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalOutcome> {
        let query = RetrievalQuery::new(collection_id, text, options)?;
        let collection = self.collection(&query.collection_id)?;
        let snapshot = collection.snapshot();
        if snapshot.is_empty() {
            return Err(Error::EmptyIndex);
        }

        let key = CacheKey::for_query(&query);
        if let Some(hit) = self.cache.get_fresh(&key, snapshot.generation) {
            if let Some(candidates) = rehydrate(&snapshot, &hit) {
                debug!(collection = collection_id, results = candidates.len(), "result cache hit");
                return Ok(RetrievalOutcome {
                    candidates,
                    stages: hit.stages.clone(),
                    from_cache: true,
                });
            }
        }

        let mut stages = StageReport {
            integrity_warning: !snapshot.is_consistent(),
            ..StageReport::default()
        };
        let variants = self.plan(&query, &mut stages).await;
        let per_variant = self
            .search_variants(&snapshot, &query.options, &variants, &mut stages)
            .await?;
        let fused = fuse_variants(per_variant, query.options.rank_constant);

        let opts = &query.options;
        let candidates = if opts.use_reranking {
            let reranked = self
                .reranker
                .rerank(&query.text, fused, opts.k, opts.candidate_pool_size)
                .await;
            stages.rerank = reranked.status;
            reranked.candidates
        } else {
            finalize(fused, opts.k)
        };

        if !stages.cacheable() {
            warn!(collection = collection_id, stages = ?stages, "retrieval degraded, result not cached");
        } else {
            self.cache.put(
                key,
                CachedRanking {
                    entries: candidates.iter().map(|c| (c.chunk.id.clone(), c.score)).collect(),
                    stages: stages.clone(),
                    generation: snapshot.generation,
                    created_at: Utc::now(),
                },
            );
        }
        info!(
            collection = collection_id,
            results = candidates.len(),
            variants = stages.variants,
            "retrieval complete"
        );
        Ok(RetrievalOutcome {
            candidates,
            stages,
            from_cache: false,
        })
    }

    /// The original query plus any rewrites, transforms run concurrently.
    async fn plan(&self, query: &RetrievalQuery, stages: &mut StageReport) -> Vec<QueryVariant> {
        let opts = &query.options;
        let text = query.text.as_str();
        let (expansion, hyde, decomposition) = tokio::join!(
            async {
                if opts.use_query_expansion {
                    Some(self.optimizer.expand(text).await)
                } else {
                    None
                }
            },
            async {
                if opts.use_hyde {
                    Some(self.optimizer.hypothesize(text).await)
                } else {
                    None
                }
            },
            async {
                if opts.use_decomposition {
                    Some(self.optimizer.decompose(text).await)
                } else {
                    None
                }
            },
        );

        let mut original = QueryVariant::new(text, VariantOrigin::Original);
        if let Some(t) = hyde {
            if t.status.ran() {
                original.semantic_text = Some(t.value);
            }
            stages.hyde = t.status;
        }
        let mut variants = vec![original];
        let mut push = |candidate: String, origin: VariantOrigin| {
            if !variants.iter().any(|v| v.text.eq_ignore_ascii_case(&candidate)) {
                variants.push(QueryVariant::new(candidate, origin));
            }
        };
        if let Some(t) = expansion {
            for v in t.value {
                push(v, VariantOrigin::Expansion);
            }
            stages.expansion = t.status;
        }
        if let Some(t) = decomposition {
            for v in t.value {
                push(v, VariantOrigin::Decomposition);
            }
            stages.decomposition = t.status;
        }
        stages.variants = variants.len();
        variants
    }

    /// One ranked list per variant: fused lexical + semantic in hybrid mode,
    /// semantic alone otherwise, with lexical as the fallback either way.
    async fn search_variants(
        &self,
        snapshot: &Arc<CollectionSnapshot>,
        opts: &RetrievalOptions,
        variants: &[QueryVariant],
        stages: &mut StageReport,
    ) -> Result<Vec<Vec<RankedCandidate>>> {
        let pool = opts.candidate_pool_size;
        let (lexical, semantic) = if opts.use_hybrid {
            tokio::join!(
                self.lexical_lists(snapshot, variants, pool),
                self.semantic_lists(snapshot, variants, pool)
            )
        } else {
            match self.semantic_lists(snapshot, variants, pool).await {
                Ok(lists) => {
                    stages.semantic = StageStatus::Ran;
                    return Ok(lists);
                }
                Err(e) => (self.lexical_lists(snapshot, variants, pool).await, Err(e)),
            }
        };

        let lexical = settle("lexical", lexical, &mut stages.lexical)?;
        let semantic = settle("semantic", semantic, &mut stages.semantic)?;
        match (lexical, semantic) {
            (Some(lex), Some(sem)) => {
                let weights = [opts.weights.lexical, opts.weights.semantic];
                Ok(lex
                    .into_iter()
                    .zip(sem)
                    .map(|(l, s)| fuse(&[l, s], &weights, opts.rank_constant))
                    .collect())
            }
            (Some(lists), None) | (None, Some(lists)) => Ok(lists),
            (None, None) => Err(Error::NoRetrievalStrategy(format!(
                "lexical: {}; semantic: {}",
                reason(&stages.lexical),
                reason(&stages.semantic)
            ))),
        }
    }

    async fn lexical_lists(
        &self,
        snapshot: &Arc<CollectionSnapshot>,
        variants: &[QueryVariant],
        pool: usize,
    ) -> Result<Vec<Vec<RankedCandidate>>> {
        let searches = variants.iter().map(|variant| {
            let snapshot = Arc::clone(snapshot);
            let text = variant.text.clone();
            async move {
                tokio::task::spawn_blocking(move || snapshot.lexical_search(&text, pool))
                    .await
                    .map_err(|e| Error::Index(format!("lexical search task failed: {e}")))?
            }
        });
        join_all(searches).await.into_iter().collect()
    }

    async fn semantic_lists(
        &self,
        snapshot: &Arc<CollectionSnapshot>,
        variants: &[QueryVariant],
        pool: usize,
    ) -> Result<Vec<Vec<RankedCandidate>>> {
        let inputs: Vec<String> = variants
            .iter()
            .map(|v| v.semantic_input().to_string())
            .collect();
        let vectors = self.embed_texts(&inputs).await?;
        let searches = vectors.into_iter().map(|vector| {
            let snapshot = Arc::clone(snapshot);
            async move {
                tokio::task::spawn_blocking(move || snapshot.semantic_search(&vector, pool))
                    .await
                    .map_err(|e| Error::Index(format!("semantic search task failed: {e}")))?
            }
        });
        join_all(searches).await.into_iter().collect()
    }

    // ---- diagnostics ----

    /// Lexical-only, semantic-only and hybrid (no rewrites, no rerank)
    /// rankings side by side.
    pub async fn compare_methods(
        &self,
        collection_id: &str,
        text: &str,
        k: usize,
    ) -> Result<MethodComparison> {
        let options = RetrievalOptions {
            k,
            candidate_pool_size: self.defaults.candidate_pool_size.max(k),
            use_reranking: false,
            ..self.defaults.clone()
        };
        let query = RetrievalQuery::new(collection_id, text, options)?;
        let snapshot = self.collection(collection_id)?.snapshot();
        if snapshot.is_empty() {
            return Err(Error::EmptyIndex);
        }

        let lexical = snapshot.lexical_search(&query.text, k)?;
        let vector = self.embed_texts(&[query.text.clone()]).await?;
        let semantic = match vector.first() {
            Some(v) => snapshot.semantic_search(v, k)?,
            None => Vec::new(),
        };
        let hybrid = self
            .retrieve(collection_id, &query.text, query.options.clone())
            .await?
            .candidates;
        Ok(MethodComparison {
            keywords: crate::optimizer::extract_keywords(&query.text),
            query: query.text,
            lexical,
            semantic,
            hybrid,
        })
    }

    pub fn health(&self, collection_id: &str) -> Result<CollectionHealth> {
        let collection = self.collection(collection_id)?;
        let snapshot = collection.snapshot();
        let cache = self.cache.stats(collection_id);
        Ok(CollectionHealth {
            collection_id: collection_id.to_string(),
            chunk_count: snapshot.len(),
            lexical_docs: snapshot.lexical.num_docs(),
            semantic_vectors: snapshot.vectors.len(),
            consistent: snapshot.is_consistent(),
            integrity_events: collection.integrity_events(),
            generation: snapshot.generation,
            last_build: snapshot.built_at,
            cache_hit_ratio: cache.hit_ratio(),
            cache,
        })
    }

    pub fn health_all(&self) -> Vec<CollectionHealth> {
        self.collection_ids()
            .iter()
            .filter_map(|id| self.health(id).ok())
            .collect()
    }
}

/// Record a strategy's status. Degradable failures become `None`; anything
/// else is returned to the caller.
fn settle<T>(stage: &str, result: Result<T>, status: &mut StageStatus) -> Result<Option<T>> {
    match result {
        Ok(value) => {
            *status = StageStatus::Ran;
            Ok(Some(value))
        }
        Err(e) if e.is_degradable() => {
            warn!(stage, error = %e, "retrieval strategy unavailable");
            *status = StageStatus::Degraded(e.to_string());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn reason(status: &StageStatus) -> &str {
    match status {
        StageStatus::Degraded(reason) | StageStatus::Unavailable(reason) => reason,
        StageStatus::Ran => "ran",
        StageStatus::Skipped => "skipped",
    }
}

/// Rebuild cached candidates against the current snapshot; `None` if any
/// chunk has disappeared.
fn rehydrate(snapshot: &CollectionSnapshot, cached: &CachedRanking) -> Option<Vec<RankedCandidate>> {
    cached
        .entries
        .iter()
        .enumerate()
        .map(|(i, (id, score))| {
            snapshot.chunk(id).map(|chunk| RankedCandidate {
                chunk: Arc::clone(chunk),
                score: *score,
                rank: i + 1,
                stage: Stage::Final,
            })
        })
        .collect()
}
