//! Offline retrieval quality metrics over labelled queries.
use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use docsearch_core::{ChunkId, RankedCandidate, Result, RetrievalOptions};

use crate::engine::RetrievalEngine;

/// A question and the chunk ids that answer it.
#[derive(Debug, Clone)]
pub struct LabeledQuery {
    pub question: String,
    pub relevant: Vec<ChunkId>,
}

impl LabeledQuery {
    pub fn new<I, S>(question: impl Into<String>, relevant: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ChunkId>,
    {
        Self {
            question: question.into(),
            relevant: relevant.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryScores {
    pub question: String,
    pub hit: f64,
    pub reciprocal_rank: f64,
    pub ndcg: f64,
    pub context_precision: f64,
    pub context_recall: f64,
}

/// Mean of every metric over the evaluated queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub queries: usize,
    pub hit_rate: f64,
    pub mrr: f64,
    pub ndcg: f64,
    pub context_precision: f64,
    pub context_recall: f64,
    pub per_query: Vec<QueryScores>,
}

impl EvalReport {
    #[allow(clippy::cast_precision_loss)]
    pub fn from_scores(per_query: Vec<QueryScores>) -> Self {
        if per_query.is_empty() {
            return Self::default();
        }
        let n = per_query.len() as f64;
        let mean = |f: fn(&QueryScores) -> f64| per_query.iter().map(f).sum::<f64>() / n;
        Self {
            queries: per_query.len(),
            hit_rate: mean(|s| s.hit),
            mrr: mean(|s| s.reciprocal_rank),
            ndcg: mean(|s| s.ndcg),
            context_precision: mean(|s| s.context_precision),
            context_recall: mean(|s| s.context_recall),
            per_query,
        }
    }
}

/// Word-overlap heuristic between a question and retrieved passages.
///
/// Precision is the share of passages sharing at least one question word;
/// recall is the mean share of question words found per passage.
#[allow(clippy::cast_precision_loss)]
pub fn context_precision_recall(question: &str, contexts: &[&str]) -> (f64, f64) {
    let question_words: HashSet<String> =
        question.split_whitespace().map(str::to_lowercase).collect();
    if contexts.is_empty() || question_words.is_empty() {
        return (0.0, 0.0);
    }
    let mut relevant = 0usize;
    let mut coverage = 0.0;
    for context in contexts {
        let words: HashSet<String> = context.split_whitespace().map(str::to_lowercase).collect();
        let overlap = question_words.intersection(&words).count();
        if overlap > 0 {
            relevant += 1;
            coverage += overlap as f64 / question_words.len() as f64;
        }
    }
    let n = contexts.len() as f64;
    (relevant as f64 / n, coverage / n)
}

/// 1.0 if any relevant id appears in `ranked`.
pub fn hit_rate(ranked: &[&str], relevant: &HashSet<&str>) -> f64 {
    if ranked.iter().any(|id| relevant.contains(id)) {
        1.0
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn reciprocal_rank(ranked: &[&str], relevant: &HashSet<&str>) -> f64 {
    ranked
        .iter()
        .position(|id| relevant.contains(id))
        .map_or(0.0, |pos| 1.0 / (pos + 1) as f64)
}

/// Binary-relevance nDCG over the first `k` results.
#[allow(clippy::cast_precision_loss)]
pub fn ndcg_at_k(ranked: &[&str], relevant: &HashSet<&str>, k: usize) -> f64 {
    let discount = |pos: usize| 1.0 / ((pos + 2) as f64).log2();
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id))
        .map(|(pos, _)| discount(pos))
        .sum();
    let ideal: f64 = (0..relevant.len().min(k)).map(discount).sum();
    if ideal == 0.0 {
        0.0
    } else {
        dcg / ideal
    }
}

pub fn score_ranking(query: &LabeledQuery, candidates: &[RankedCandidate], k: usize) -> QueryScores {
    let relevant: HashSet<&str> = query.relevant.iter().map(String::as_str).collect();
    let ranked: Vec<&str> = candidates.iter().take(k).map(RankedCandidate::id).collect();
    let contexts: Vec<&str> = candidates
        .iter()
        .take(k)
        .map(|c| c.chunk.text.as_str())
        .collect();
    let (context_precision, context_recall) = context_precision_recall(&query.question, &contexts);
    QueryScores {
        question: query.question.clone(),
        hit: hit_rate(&ranked, &relevant),
        reciprocal_rank: reciprocal_rank(&ranked, &relevant),
        ndcg: ndcg_at_k(&ranked, &relevant, k),
        context_precision,
        context_recall,
    }
}

/// Run every labelled query through `retrieve` with `options` and score it.
pub async fn evaluate(
    engine: &RetrievalEngine,
    collection_id: &str,
    queries: &[LabeledQuery],
    options: &RetrievalOptions,
) -> Result<EvalReport> {
    let mut scores = Vec::with_capacity(queries.len());
    for query in queries {
        let outcome = engine
            .retrieve(collection_id, &query.question, options.clone())
            .await?;
        scores.push(score_ranking(query, &outcome.candidates, options.k));
    }
    let report = EvalReport::from_scores(scores);
    info!(
        collection = collection_id,
        queries = report.queries,
        hit_rate = report.hit_rate,
        mrr = report.mrr,
        ndcg = report.ndcg,
        "evaluation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set<'a>(ids: &[&'a str]) -> HashSet<&'a str> {
        ids.iter().copied().collect()
    }

    #[test]
    fn rank_metrics() {
        let relevant = set(&["b"]);
        assert_eq!(hit_rate(&["a", "b"], &relevant), 1.0);
        assert_eq!(hit_rate(&["a", "c"], &relevant), 0.0);
        assert!((reciprocal_rank(&["a", "b"], &relevant) - 0.5).abs() < 1e-12);
        assert_eq!(reciprocal_rank(&[], &relevant), 0.0);
    }

    #[test]
    fn ndcg_is_one_for_ideal_order() {
        let relevant = set(&["a", "b"]);
        assert!((ndcg_at_k(&["a", "b", "c"], &relevant, 3) - 1.0).abs() < 1e-12);
        let worse = ndcg_at_k(&["c", "a", "b"], &relevant, 3);
        assert!(worse < 1.0 && worse > 0.0);
        assert_eq!(ndcg_at_k(&["a"], &HashSet::new(), 3), 0.0);
    }

    #[test]
    fn context_overlap_heuristic() {
        let (precision, recall) = context_precision_recall(
            "revenue growth",
            &["revenue was 10M", "weather was sunny"],
        );
        assert!((precision - 0.5).abs() < 1e-12);
        assert!((recall - 0.25).abs() < 1e-12);
        assert_eq!(context_precision_recall("q", &[]), (0.0, 0.0));
    }

    #[test]
    fn report_averages() {
        let q = |hit| QueryScores {
            question: "q".into(),
            hit,
            reciprocal_rank: hit,
            ndcg: hit,
            context_precision: 0.0,
            context_recall: 0.0,
        };
        let report = EvalReport::from_scores(vec![q(1.0), q(0.0)]);
        assert_eq!(report.queries, 2);
        assert!((report.hit_rate - 0.5).abs() < 1e-12);
        assert_eq!(EvalReport::from_scores(Vec::new()).queries, 0);
    }
}
