use std::sync::Arc;

use tracing::{debug, warn};

use docsearch_core::traits::PairScorer;
use docsearch_core::{RankedCandidate, StageStatus};

use crate::fusion::finalize;
use crate::guard::{call_blocking, CallPolicy};

pub struct Reranked {
    pub candidates: Vec<RankedCandidate>,
    pub status: StageStatus,
}

/// Cross-encoder stage over the head of the fused list.
pub struct Reranker {
    scorer: Option<Arc<dyn PairScorer>>,
    policy: CallPolicy,
}

impl Reranker {
    pub fn new(scorer: Option<Arc<dyn PairScorer>>, policy: CallPolicy) -> Self {
        Self { scorer, policy }
    }

    pub fn is_available(&self) -> bool {
        self.scorer.is_some()
    }

    /// Score at most `pool_size` candidates and keep the best `top_n`.
    ///
    /// When the model is missing or fails, the fused order is returned
    /// unchanged and the stage is reported as unavailable or degraded.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RankedCandidate>,
        top_n: usize,
        pool_size: usize,
    ) -> Reranked {
        candidates.truncate(pool_size);
        let Some(scorer) = &self.scorer else {
            return Reranked {
                candidates: finalize(candidates, top_n),
                status: StageStatus::Unavailable("no rerank model configured".into()),
            };
        };
        if candidates.is_empty() {
            return Reranked {
                candidates,
                status: StageStatus::Ran,
            };
        }

        let passages: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let expected = passages.len();
        let scorer = Arc::clone(scorer);
        let q = query.to_string();
        let scored = call_blocking(&self.policy, move || scorer.score_pairs(&q, &passages)).await;

        let reason = match scored {
            Ok(scores) if scores.len() == expected => {
                let mut paired: Vec<(f32, RankedCandidate)> =
                    scores.into_iter().zip(candidates).collect();
                // Stable: equal model scores keep their fused order.
                paired.sort_by(|a, b| b.0.total_cmp(&a.0));
                debug!(scored = expected, kept = top_n.min(expected), "reranked candidates");
                let rescored = paired
                    .into_iter()
                    .map(|(score, c)| RankedCandidate { score, ..c })
                    .collect();
                return Reranked {
                    candidates: finalize(rescored, top_n),
                    status: StageStatus::Ran,
                };
            }
            Ok(scores) => format!("model returned {} scores for {expected} passages", scores.len()),
            Err(e) => e.to_string(),
        };
        warn!(error = %reason, "rerank unavailable, keeping fused order");
        Reranked {
            candidates: finalize(candidates, top_n),
            status: StageStatus::Degraded(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{anyhow, Result};
    use docsearch_core::config::CallSettings;
    use docsearch_core::{Chunk, Dependency, Stage};

    use super::*;

    fn policy() -> CallPolicy {
        CallPolicy::from_settings(
            Dependency::Rerank,
            &CallSettings {
                timeout_ms: 1_000,
                max_retries: 0,
                backoff_ms: 1,
            },
        )
    }

    fn fused(texts: &[(&str, &str)]) -> Vec<RankedCandidate> {
        texts
            .iter()
            .enumerate()
            .map(|(i, (id, text))| RankedCandidate {
                chunk: Arc::new(Chunk::new(*id, "doc", *text)),
                score: 0.0,
                rank: i + 1,
                stage: Stage::Fused,
            })
            .collect()
    }

    fn ids(candidates: &[RankedCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.chunk.id.as_str()).collect()
    }

    /// Scores by passage length and counts how many passages it saw.
    #[derive(Default)]
    struct LengthScorer {
        seen: AtomicUsize,
    }

    impl PairScorer for LengthScorer {
        fn model_id(&self) -> &str {
            "length"
        }

        #[allow(clippy::cast_precision_loss)]
        fn score_pairs(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>> {
            self.seen.fetch_add(passages.len(), Ordering::SeqCst);
            Ok(passages.iter().map(|p| p.len() as f32).collect())
        }
    }

    struct ShortScorer;

    impl PairScorer for ShortScorer {
        fn model_id(&self) -> &str {
            "short"
        }

        fn score_pairs(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    struct BrokenScorer;

    impl PairScorer for BrokenScorer {
        fn model_id(&self) -> &str {
            "broken"
        }

        fn score_pairs(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            Err(anyhow!("model crashed"))
        }
    }

    #[tokio::test]
    async fn reorders_within_the_pool() {
        let scorer = Arc::new(LengthScorer::default());
        let shared: Arc<dyn PairScorer> = scorer.clone();
        let reranker = Reranker::new(Some(shared), policy());
        let input = fused(&[("a", "x"), ("b", "xxx"), ("c", "xx"), ("d", "xxxxxxxx")]);

        let out = reranker.rerank("q", input, 2, 3).await;

        assert_eq!(out.status, StageStatus::Ran);
        assert_eq!(ids(&out.candidates), vec!["b", "c"]);
        assert_eq!(scorer.seen.load(Ordering::SeqCst), 3);
        assert!(out.candidates.iter().all(|c| c.stage == Stage::Final));
    }

    #[tokio::test]
    async fn missing_model_keeps_fused_order() {
        let reranker = Reranker::new(None, policy());
        assert!(!reranker.is_available());

        let out = reranker
            .rerank("q", fused(&[("a", "x"), ("b", "xxx")]), 5, 5)
            .await;

        assert!(matches!(out.status, StageStatus::Unavailable(_)));
        assert_eq!(ids(&out.candidates), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failing_or_short_scores_keep_fused_order() {
        for scorer in [Arc::new(BrokenScorer) as Arc<dyn PairScorer>, Arc::new(ShortScorer)] {
            let reranker = Reranker::new(Some(scorer), policy());
            let out = reranker
                .rerank("q", fused(&[("a", "x"), ("b", "xxx"), ("c", "xx")]), 2, 3)
                .await;
            assert!(matches!(out.status, StageStatus::Degraded(_)));
            assert_eq!(ids(&out.candidates), vec!["a", "b"]);
        }
    }
}
