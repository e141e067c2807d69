//! One collection: a lexical index and a vector store over the same chunks,
//! published together as an immutable [`CollectionSnapshot`].
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use docsearch_core::{
    Chunk, ChunkId, CollectionId, Error, RankedCandidate, Result, SearchHit, Stage,
};
use docsearch_text::{LexicalIndex, LexicalSnapshot};
use docsearch_vector::VectorStore;

/// Point-in-time state seen by a retrieval. Lexical and semantic halves
/// always belong to the same mutation.
pub struct CollectionSnapshot {
    pub generation: u64,
    pub chunks: Arc<HashMap<ChunkId, Arc<Chunk>>>,
    pub lexical: LexicalSnapshot,
    pub vectors: VectorStore,
    pub built_at: DateTime<Utc>,
    /// Ids present in every index; `None` when the indexes agree.
    usable: Option<Arc<HashSet<ChunkId>>>,
}

impl CollectionSnapshot {
    pub fn is_consistent(&self) -> bool {
        self.usable.is_none()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.get(id)
    }

    fn admits(&self, id: &str) -> bool {
        self.usable.as_ref().map_or(true, |ids| ids.contains(id))
    }

    fn fetch_size(&self, top_n: usize) -> usize {
        if self.is_consistent() {
            top_n
        } else {
            usize::MAX
        }
    }

    fn attach(&self, hits: Vec<SearchHit>, top_n: usize, stage: Stage) -> Vec<RankedCandidate> {
        hits.into_iter()
            .filter(|h| self.admits(&h.id))
            .filter_map(|h| {
                self.chunks.get(&h.id).map(|chunk| (Arc::clone(chunk), h.score))
            })
            .take(top_n)
            .enumerate()
            .map(|(i, (chunk, score))| RankedCandidate {
                chunk,
                score,
                rank: i + 1,
                stage,
            })
            .collect()
    }

    pub fn lexical_search(&self, query: &str, top_n: usize) -> Result<Vec<RankedCandidate>> {
        let hits = self.lexical.search(query, self.fetch_size(top_n))?;
        Ok(self.attach(hits, top_n, Stage::Lexical))
    }

    pub fn semantic_search(&self, vector: &[f32], top_n: usize) -> Result<Vec<RankedCandidate>> {
        let hits = self.vectors.search(vector, self.fetch_size(top_n))?;
        Ok(self.attach(hits, top_n, Stage::Semantic))
    }
}

/// Proof that the caller holds a collection's single-writer lock.
pub struct WriterGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

pub struct Collection {
    id: CollectionId,
    lexical: LexicalIndex,
    writer: Mutex<()>,
    current: RwLock<Arc<CollectionSnapshot>>,
    generations: Arc<AtomicU64>,
    integrity_events: AtomicU64,
}

impl Collection {
    /// `generations` is shared across collections so a recreated id never
    /// reuses a generation number.
    pub fn new(id: impl Into<CollectionId>, dim: usize, generations: Arc<AtomicU64>) -> Result<Self> {
        let lexical = LexicalIndex::new()?;
        let initial = CollectionSnapshot {
            generation: generations.fetch_add(1, Ordering::SeqCst) + 1,
            chunks: Arc::new(HashMap::new()),
            lexical: lexical.snapshot(),
            vectors: VectorStore::new(dim),
            built_at: Utc::now(),
            usable: None,
        };
        Ok(Self {
            id: id.into(),
            lexical,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(initial)),
            generations,
            integrity_events: AtomicU64::new(0),
        })
    }

    pub fn snapshot(&self) -> Arc<CollectionSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn integrity_events(&self) -> u64 {
        self.integrity_events.load(Ordering::Relaxed)
    }

    /// Wait for exclusive write access. Readers are never blocked by it.
    pub async fn lock_writer(&self) -> WriterGuard<'_> {
        WriterGuard {
            _guard: self.writer.lock().await,
        }
    }

    /// Insert embedded chunks and publish the next snapshot.
    ///
    /// Rejects the whole batch on a duplicate id, a missing embedding or a
    /// dimension mismatch; nothing is published in that case.
    pub fn publish_add(
        &self,
        _writer: &WriterGuard<'_>,
        chunks: Vec<Chunk>,
    ) -> Result<Arc<CollectionSnapshot>> {
        let current = self.snapshot();
        let dim = current.vectors.dim();

        let mut batch_ids = HashSet::with_capacity(chunks.len());
        let mut entries = Vec::with_capacity(chunks.len());
        for c in &chunks {
            if c.id.is_empty() {
                return Err(Error::InvalidConfig("chunk id is empty".into()));
            }
            if current.chunks.contains_key(&c.id) || !batch_ids.insert(c.id.as_str()) {
                return Err(Error::DuplicateChunk(c.id.clone()));
            }
            let Some(embedding) = &c.embedding else {
                return Err(Error::EmbeddingService(format!("chunk {} has no embedding", c.id)));
            };
            if embedding.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: embedding.len(),
                });
            }
            entries.push((c.id.clone(), embedding.clone()));
        }

        let vectors = current.vectors.with_added(entries)?;
        let lexical = self.lexical.index(&chunks)?;
        let mut map = HashMap::clone(&current.chunks);
        let added = chunks.len();
        for c in chunks {
            map.insert(c.id.clone(), Arc::new(c));
        }
        let next = self.publish(map, lexical, vectors)?;
        info!(
            collection = %self.id,
            added,
            chunks = next.len(),
            generation = next.generation,
            "chunks added"
        );
        Ok(next)
    }

    /// Remove chunks and publish the next snapshot. Unknown ids are ignored;
    /// `None` means nothing matched and the current snapshot stands.
    pub fn publish_remove(
        &self,
        _writer: &WriterGuard<'_>,
        ids: &[ChunkId],
    ) -> Result<Option<Arc<CollectionSnapshot>>> {
        let current = self.snapshot();
        let doomed: HashSet<ChunkId> = ids
            .iter()
            .filter(|id| current.chunks.contains_key(*id))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(None);
        }

        let doomed_list: Vec<ChunkId> = doomed.iter().cloned().collect();
        let lexical = self.lexical.remove(&doomed_list)?;
        let vectors = current.vectors.without(&doomed);
        let mut map = HashMap::clone(&current.chunks);
        map.retain(|id, _| !doomed.contains(id));
        let next = self.publish(map, lexical, vectors)?;
        info!(
            collection = %self.id,
            removed = doomed.len(),
            chunks = next.len(),
            generation = next.generation,
            "chunks removed"
        );
        Ok(Some(next))
    }

    fn publish(
        &self,
        chunks: HashMap<ChunkId, Arc<Chunk>>,
        lexical: LexicalSnapshot,
        vectors: VectorStore,
    ) -> Result<Arc<CollectionSnapshot>> {
        let next = Arc::new(self.assemble(chunks, lexical, vectors)?);
        *self.current.write() = Arc::clone(&next);
        Ok(next)
    }

    /// Build a snapshot, reconciling the indexes if their counts diverge.
    fn assemble(
        &self,
        chunks: HashMap<ChunkId, Arc<Chunk>>,
        lexical: LexicalSnapshot,
        vectors: VectorStore,
    ) -> Result<CollectionSnapshot> {
        let lexical_docs = usize::try_from(lexical.num_docs()).unwrap_or(usize::MAX);
        let usable = if lexical_docs == chunks.len() && vectors.len() == chunks.len() {
            None
        } else {
            let lexical_ids = lexical.chunk_ids()?;
            let vector_ids: HashSet<&ChunkId> = vectors.ids().collect();
            let usable: HashSet<ChunkId> = chunks
                .keys()
                .filter(|id| lexical_ids.contains(*id) && vector_ids.contains(id))
                .cloned()
                .collect();
            self.integrity_events.fetch_add(1, Ordering::Relaxed);
            warn!(
                collection = %self.id,
                chunks = chunks.len(),
                lexical_docs,
                semantic_vectors = vectors.len(),
                usable = usable.len(),
                "index counts diverge, serving the intersection"
            );
            Some(Arc::new(usable))
        };
        Ok(CollectionSnapshot {
            generation: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
            chunks: Arc::new(chunks),
            lexical,
            vectors,
            built_at: Utc::now(),
            usable,
        })
    }
}
