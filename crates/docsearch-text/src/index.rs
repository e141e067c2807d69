use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;

use parking_lot::Mutex;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery};
use tantivy::schema::{Field, Value};
use tantivy::{
    doc, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term,
};
use tracing::{debug, warn};

use docsearch_core::{Chunk, ChunkId, Error, Result, SearchHit, SourceKind};

use crate::tantivy_utils::{
    build_schema, register_tokenizer, tokens_with, DOC_ID_FIELD, ID_FIELD, TEXT_FIELD,
};

const WRITER_HEAP_BYTES: usize = 20_000_000;

fn index_err(e: impl Display) -> Error {
    Error::Index(e.to_string())
}

#[derive(Clone, Copy)]
struct LexicalFields {
    id: Field,
    doc_id: Field,
    text: Field,
}

/// BM25 index over one collection's chunks.
///
/// A single writer stages deletes and inserts, commits, then reloads the
/// reader; every commit yields a fresh [`LexicalSnapshot`].
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: LexicalFields,
}

impl LexicalIndex {
    pub fn new() -> Result<Self> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        register_tokenizer(&index);
        let fields = LexicalFields {
            id: schema.get_field(ID_FIELD).map_err(index_err)?,
            doc_id: schema.get_field(DOC_ID_FIELD).map_err(index_err)?,
            text: schema.get_field(TEXT_FIELD).map_err(index_err)?,
        };
        let writer = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(index_err)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_err)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    pub fn index(&self, chunks: &[Chunk]) -> Result<LexicalSnapshot> {
        self.apply(chunks, &[])
    }

    pub fn remove(&self, ids: &[ChunkId]) -> Result<LexicalSnapshot> {
        self.apply(&[], ids)
    }

    /// Delete `remove` then insert `add` in one commit.
    ///
    /// On failure the staged operations are rolled back and the last
    /// committed state stays visible.
    pub fn apply(&self, add: &[Chunk], remove: &[ChunkId]) -> Result<LexicalSnapshot> {
        let mut writer = self.writer.lock();
        if let Err(e) = self.stage(&mut writer, add, remove) {
            if let Err(rollback) = writer.rollback() {
                warn!(error = %rollback, "lexical rollback failed");
            }
            return Err(e);
        }
        self.reader.reload().map_err(index_err)?;
        let snapshot = self.snapshot();
        debug!(
            added = add.len(),
            removed = remove.len(),
            docs = snapshot.num_docs(),
            "lexical index committed"
        );
        Ok(snapshot)
    }

    fn stage(&self, writer: &mut IndexWriter, add: &[Chunk], remove: &[ChunkId]) -> Result<()> {
        for id in remove {
            writer.delete_term(Term::from_field_text(self.fields.id, id));
        }
        for c in add {
            writer
                .add_document(doc!(
                    self.fields.id => c.id.clone(),
                    self.fields.doc_id => c.source_document_id.clone(),
                    self.fields.text => c.text.clone(),
                ))
                .map_err(index_err)?;
        }
        writer.commit().map_err(index_err)?;
        Ok(())
    }

    /// The last committed state.
    pub fn snapshot(&self) -> LexicalSnapshot {
        LexicalSnapshot {
            searcher: self.reader.searcher(),
            index: self.index.clone(),
            fields: self.fields,
        }
    }
}

/// Immutable point-in-time view of a [`LexicalIndex`].
#[derive(Clone)]
pub struct LexicalSnapshot {
    searcher: Searcher,
    index: Index,
    fields: LexicalFields,
}

impl LexicalSnapshot {
    pub fn num_docs(&self) -> u64 {
        self.searcher.num_docs()
    }

    /// Score every chunk sharing at least one token with `query` and keep the
    /// best `top_n`, ties broken by lower chunk id.
    pub fn search(&self, query: &str, top_n: usize) -> Result<Vec<SearchHit>> {
        let total = self.num_docs();
        if total == 0 {
            return Err(Error::EmptyIndex);
        }
        if top_n == 0 {
            return Ok(Vec::new());
        }

        let mut analyzer = self
            .index
            .tokenizer_for_field(self.fields.text)
            .map_err(index_err)?;
        let tokens: BTreeSet<String> = tokens_with(&mut analyzer, query).into_iter().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let terms: Vec<Term> = tokens
            .iter()
            .map(|t| Term::from_field_text(self.fields.text, t))
            .collect();
        let query = BooleanQuery::new_multiterms_query(terms);

        // Every match is collected: ties at the cut-off are resolved by id below.
        let limit = usize::try_from(total).unwrap_or(usize::MAX);
        let top_docs = self
            .searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(index_err)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = self.searcher.doc(addr).map_err(index_err)?;
            if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) {
                hits.push(SearchHit {
                    id: id.to_string(),
                    score,
                    source: SourceKind::Text,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_n);
        Ok(hits)
    }

    /// Every chunk id visible in this snapshot. Linear in index size; used
    /// only when reconciling a count mismatch.
    pub fn chunk_ids(&self) -> Result<HashSet<ChunkId>> {
        let addrs = self
            .searcher
            .search(&AllQuery, &DocSetCollector)
            .map_err(index_err)?;
        let mut ids = HashSet::with_capacity(addrs.len());
        for addr in addrs {
            let doc: TantivyDocument = self.searcher.doc(addr).map_err(index_err)?;
            if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }
}
