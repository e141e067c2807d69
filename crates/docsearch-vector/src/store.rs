use std::collections::HashSet;
use std::sync::Arc;

use docsearch_core::{ChunkId, Error, Result, SearchHit, SourceKind};

/// Segments are merged once an insert pushes the count past this.
const MAX_SEGMENTS: usize = 16;

/// An immutable block of unit-length vectors.
#[derive(Debug)]
struct VectorSegment {
    ids: Vec<ChunkId>,
    /// Row-major, `ids.len() * dim` values.
    data: Vec<f32>,
}

impl VectorSegment {
    fn rows<'a>(&'a self, dim: usize) -> impl Iterator<Item = (&'a ChunkId, &'a [f32])> + 'a {
        self.ids.iter().zip(self.data.chunks_exact(dim))
    }
}

/// Persistent-style vector set: every mutation returns a new store that
/// shares untouched segments with the old one, so readers holding the old
/// value never see a partial update.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    segments: Vec<Arc<VectorSegment>>,
    len: usize,
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            segments: Vec::new(),
            len: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.segments.iter().flat_map(|s| s.ids.iter())
    }

    /// Append `entries` as one new segment. Ids must not already be present;
    /// the caller owns that check.
    pub fn with_added(&self, entries: Vec<(ChunkId, Vec<f32>)>) -> Result<Self> {
        if entries.is_empty() {
            return Ok(self.clone());
        }
        let mut ids = Vec::with_capacity(entries.len());
        let mut data = Vec::with_capacity(entries.len() * self.dim);
        for (id, mut v) in entries {
            if v.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    expected: self.dim,
                    actual: v.len(),
                });
            }
            normalize(&mut v);
            ids.push(id);
            data.extend_from_slice(&v);
        }
        let len = self.len + ids.len();
        let mut segments = self.segments.clone();
        segments.push(Arc::new(VectorSegment { ids, data }));
        let mut next = Self {
            dim: self.dim,
            segments,
            len,
        };
        if next.segments.len() > MAX_SEGMENTS {
            next = next.compacted();
        }
        Ok(next)
    }

    /// Drop `ids`, rewriting only the segments that contain one of them.
    pub fn without(&self, ids: &HashSet<ChunkId>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            if !seg.ids.iter().any(|id| ids.contains(id)) {
                segments.push(Arc::clone(seg));
                continue;
            }
            let mut kept_ids = Vec::new();
            let mut kept = Vec::new();
            for (id, row) in seg.rows(self.dim) {
                if !ids.contains(id) {
                    kept_ids.push(id.clone());
                    kept.extend_from_slice(row);
                }
            }
            if !kept_ids.is_empty() {
                segments.push(Arc::new(VectorSegment {
                    ids: kept_ids,
                    data: kept,
                }));
            }
        }
        let len = segments.iter().map(|s| s.ids.len()).sum();
        Self {
            dim: self.dim,
            segments,
            len,
        }
    }

    fn compacted(&self) -> Self {
        let mut ids = Vec::with_capacity(self.len);
        let mut data = Vec::with_capacity(self.len * self.dim);
        for seg in &self.segments {
            ids.extend(seg.ids.iter().cloned());
            data.extend_from_slice(&seg.data);
        }
        Self {
            dim: self.dim,
            segments: vec![Arc::new(VectorSegment { ids, data })],
            len: self.len,
        }
    }

    /// Exact cosine similarity against every stored vector; best `top_n`
    /// first, ties broken by lower chunk id.
    pub fn search(&self, query: &[f32], top_n: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut q = query.to_vec();
        normalize(&mut q);
        if top_n == 0 || q.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .segments
            .iter()
            .flat_map(|seg| seg.rows(self.dim))
            .map(|(id, row)| SearchHit {
                id: id.clone(),
                score: dot(&q, row),
                source: SourceKind::Vector,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_n);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, v: &[f32]) -> (ChunkId, Vec<f32>) {
        (id.to_string(), v.to_vec())
    }

    #[test]
    fn cosine_ranking_with_id_tie_break() {
        let store = VectorStore::new(2)
            .with_added(vec![
                entry("b", &[1.0, 0.0]),
                entry("a", &[2.0, 0.0]),
                entry("c", &[0.0, 1.0]),
            ])
            .expect("add");
        let hits = store.search(&[3.0, 0.0], 3).expect("search");
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);
    }

    #[test]
    fn incremental_adds_share_segments() {
        let first = VectorStore::new(2)
            .with_added(vec![entry("a", &[1.0, 0.0])])
            .expect("add");
        let second = first
            .with_added(vec![entry("b", &[0.0, 1.0])])
            .expect("add");
        assert_eq!(first.len(), 1, "old value untouched");
        assert_eq!(second.len(), 2);
        assert_eq!(second.segment_count(), 2);
        assert!(Arc::ptr_eq(&first.segments[0], &second.segments[0]));
    }

    #[test]
    fn compaction_keeps_all_rows() {
        let mut store = VectorStore::new(1);
        for i in 0..=MAX_SEGMENTS {
            store = store
                .with_added(vec![(format!("c{i:02}"), vec![1.0])])
                .expect("add");
        }
        assert_eq!(store.segment_count(), 1);
        assert_eq!(store.len(), MAX_SEGMENTS + 1);
    }

    #[test]
    fn removal_rewrites_only_affected_segments() {
        let store = VectorStore::new(2)
            .with_added(vec![entry("a", &[1.0, 0.0]), entry("b", &[0.0, 1.0])])
            .expect("add")
            .with_added(vec![entry("c", &[1.0, 1.0])])
            .expect("add");
        let removed: HashSet<ChunkId> = ["a".to_string()].into_iter().collect();
        let next = store.without(&removed);
        assert_eq!(next.len(), 2);
        assert!(Arc::ptr_eq(&store.segments[1], &next.segments[1]));
        assert!(next.ids().all(|id| id != "a"));
    }

    #[test]
    fn dimension_is_enforced() {
        let store = VectorStore::new(3);
        assert!(matches!(
            store.with_added(vec![entry("a", &[1.0])]),
            Err(Error::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert!(store.search(&[1.0, 0.0], 1).is_err());
    }
}
