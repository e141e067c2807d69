//! Reciprocal Rank Fusion: score = Σ weight_l / (rank_constant + rank_l)
//!
//! Only ranks are combined; per-list scores never cross lists. Lists must be
//! ordered best first, and a chunk absent from a list contributes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use docsearch_core::{Chunk, RankedCandidate, Stage};

struct Accumulated {
    chunk: Arc<Chunk>,
    contributions: Vec<f64>,
    best_rank: usize,
}

impl Accumulated {
    /// Summed smallest first so the total does not depend on list order.
    fn score(&mut self) -> f64 {
        self.contributions.sort_by(f64::total_cmp);
        self.contributions.iter().sum()
    }
}

/// Fuse weighted ranked lists. A missing weight counts as 1.0.
///
/// Output is sorted by fused score descending, then by best single-list rank,
/// then by chunk id, and re-ranked from 1 as [`Stage::Fused`].
pub fn fuse(
    lists: &[Vec<RankedCandidate>],
    weights: &[f64],
    rank_constant: f64,
) -> Vec<RankedCandidate> {
    let mut acc: HashMap<&str, Accumulated> = HashMap::new();

    for (i, list) in lists.iter().enumerate() {
        let weight = weights.get(i).copied().unwrap_or(1.0);
        for (pos, candidate) in list.iter().enumerate() {
            let rank = pos + 1;
            #[allow(clippy::cast_precision_loss)]
            let contribution = weight / (rank_constant + rank as f64);
            acc.entry(candidate.id())
                .and_modify(|a| {
                    a.contributions.push(contribution);
                    a.best_rank = a.best_rank.min(rank);
                })
                .or_insert_with(|| Accumulated {
                    chunk: Arc::clone(&candidate.chunk),
                    contributions: vec![contribution],
                    best_rank: rank,
                });
        }
    }

    let mut fused: Vec<(f64, Accumulated)> = acc
        .into_values()
        .map(|mut a| (a.score(), a))
        .collect();
    fused.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });

    fused
        .into_iter()
        .enumerate()
        .map(|(i, (score, a))| RankedCandidate {
            chunk: a.chunk,
            score: score as f32,
            rank: i + 1,
            stage: Stage::Fused,
        })
        .collect()
}

/// Fuse per-variant rankings with equal weight. A single list passes through.
pub fn fuse_variants(
    mut per_variant: Vec<Vec<RankedCandidate>>,
    rank_constant: f64,
) -> Vec<RankedCandidate> {
    if per_variant.len() == 1 {
        return per_variant.pop().unwrap_or_default();
    }
    fuse(&per_variant, &[], rank_constant)
}

/// Relabel the first `k` candidates as final results ranked from 1.
pub fn finalize(candidates: Vec<RankedCandidate>, k: usize) -> Vec<RankedCandidate> {
    candidates
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, c)| RankedCandidate {
            rank: i + 1,
            stage: Stage::Final,
            ..c
        })
        .collect()
}
