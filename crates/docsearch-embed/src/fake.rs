//! Deterministic stand-ins for the local models, for tests and offline runs.
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use twox_hash::XxHash64;

use docsearch_core::traits::{Embedder, PairScorer};

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Hashes each word into a bucket; texts sharing words get positive cosine.
pub struct FakeEmbedder {
    dim: usize,
    model_id: String,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            model_id: format!("fake-xxh64:{dim}"),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in words(text).enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i % 3) as f32 * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Fraction of distinct query words present in the passage, with a small
/// bonus for repeated mentions.
#[derive(Default)]
pub struct TokenOverlapScorer;

impl PairScorer for TokenOverlapScorer {
    fn model_id(&self) -> &str {
        "token-overlap"
    }

    #[allow(clippy::cast_precision_loss)]
    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let query_words: HashSet<String> = words(query).filter(|w| w.len() > 1).collect();
        if query_words.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }
        Ok(passages
            .iter()
            .map(|p| {
                let passage_words: Vec<String> = words(p).collect();
                let distinct: HashSet<&String> = passage_words.iter().collect();
                let covered = query_words.iter().filter(|w| distinct.contains(w)).count();
                let mentions = passage_words
                    .iter()
                    .filter(|w| query_words.contains(*w))
                    .count();
                covered as f32 / query_words.len() as f32
                    + 0.01 * mentions as f32 / (1.0 + passage_words.len() as f32)
            })
            .collect())
    }
}
