//! Query rewriting through a generative model: expansion, hypothetical
//! answer passages (HyDE) and decomposition.
//!
//! Every transform is best effort. A missing generator yields the original
//! query with an unavailable stage status, a failing one with a degraded
//! status; nothing here is retried.
use std::sync::Arc;

use tracing::{debug, warn};

use docsearch_core::traits::Generator;
use docsearch_core::StageStatus;
use docsearch_text::is_stop_word;

use crate::guard::{call_async, CallPolicy};

/// Original query plus at most three rewrites.
pub const MAX_EXPANSIONS: usize = 4;
/// Each sub-question becomes a retrieval variant.
pub const MAX_SUB_QUESTIONS: usize = 5;
const MAX_KEYWORDS: usize = 5;
const MIN_LINE_CHARS: usize = 10;

const EXPANSION_PROMPT: &str = "Generate 3 variations of this question that could help find the same \
information in a document.\nThe variations should use synonyms, different phrasings, or \
complementary angles.\n\nOriginal question: {query}\n\nVariations (one per line):\n1.";

const HYDE_PROMPT: &str = "Write a hypothetical document passage that would perfectly answer this \
question.\nThe passage should be factual and detailed, as if taken from a professional document.\n\n\
Question: {query}\n\nHypothetical passage:";

const DECOMPOSITION_PROMPT: &str = "Break this complex question down into simpler, independent \
sub-questions.\nEach sub-question must be answerable on its own.\n\nComplex question: {query}\n\n\
Sub-questions (one per line):\n1.";

/// Result of one transform together with how it went.
#[derive(Debug, Clone)]
pub struct Transform<T> {
    pub value: T,
    pub status: StageStatus,
}

impl<T> Transform<T> {
    fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self::fallback(value, StageStatus::Degraded(reason.into()))
    }

    fn fallback(value: T, status: StageStatus) -> Self {
        Self { value, status }
    }
}

pub struct QueryOptimizer {
    generator: Option<Arc<dyn Generator>>,
    policy: CallPolicy,
}

impl QueryOptimizer {
    pub fn new(generator: Option<Arc<dyn Generator>>, policy: CallPolicy) -> Self {
        Self { generator, policy }
    }

    async fn generate(&self, template: &str, query: &str) -> Result<String, StageStatus> {
        let Some(generator) = &self.generator else {
            return Err(StageStatus::Unavailable("no generator configured".into()));
        };
        let prompt = template.replace("{query}", query);
        call_async(&self.policy, || generator.generate(&prompt))
            .await
            .map_err(|e| StageStatus::Degraded(e.to_string()))
    }

    /// The original query first, then distinct rewrites, capped at
    /// [`MAX_EXPANSIONS`] in total.
    pub async fn expand(&self, query: &str) -> Transform<Vec<String>> {
        match self.generate(EXPANSION_PROMPT, query).await {
            Ok(response) => {
                let mut variations = vec![query.to_string()];
                for line in parse_lines(&response) {
                    if variations.len() == MAX_EXPANSIONS {
                        break;
                    }
                    if !variations.iter().any(|v| v.eq_ignore_ascii_case(&line)) {
                        variations.push(line);
                    }
                }
                debug!(variations = variations.len(), "query expanded");
                Transform {
                    value: variations,
                    status: StageStatus::Ran,
                }
            }
            Err(status) => {
                warn!(stage = "expansion", status = ?status, "query rewrite skipped");
                Transform::fallback(vec![query.to_string()], status)
            }
        }
    }

    /// A hypothetical answer passage to embed in place of the query.
    pub async fn hypothesize(&self, query: &str) -> Transform<String> {
        match self.generate(HYDE_PROMPT, query).await {
            Ok(response) => {
                let passage = response.trim();
                if passage.is_empty() {
                    warn!(stage = "hyde", "generator returned an empty passage");
                    return Transform::degraded(query.to_string(), "empty passage");
                }
                debug!(chars = passage.len(), "hypothetical passage generated");
                Transform {
                    value: passage.to_string(),
                    status: StageStatus::Ran,
                }
            }
            Err(status) => {
                warn!(stage = "hyde", status = ?status, "query rewrite skipped");
                Transform::fallback(query.to_string(), status)
            }
        }
    }

    /// Independent sub-questions; the original query when none are found.
    pub async fn decompose(&self, query: &str) -> Transform<Vec<String>> {
        match self.generate(DECOMPOSITION_PROMPT, query).await {
            Ok(response) => {
                let mut subs = Vec::new();
                for line in parse_lines(&response) {
                    if subs.len() == MAX_SUB_QUESTIONS {
                        break;
                    }
                    if !subs.contains(&line) {
                        subs.push(line);
                    }
                }
                if subs.is_empty() {
                    subs.push(query.to_string());
                }
                debug!(sub_questions = subs.len(), "query decomposed");
                Transform {
                    value: subs,
                    status: StageStatus::Ran,
                }
            }
            Err(status) => {
                warn!(stage = "decomposition", status = ?status, "query rewrite skipped");
                Transform::fallback(vec![query.to_string()], status)
            }
        }
    }
}

/// Lines longer than ten characters with list numbering stripped.
fn parse_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_LINE_CHARS)
        .map(|line| {
            line.trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | '-' | ')' | ' '))
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Up to five words longer than three characters that are not stop words,
/// in query order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 3 && !is_stop_word(w))
        .take(MAX_KEYWORDS)
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use docsearch_core::config::CallSettings;
    use docsearch_core::Dependency;

    use super::*;

    struct Canned(String);

    #[async_trait]
    impl Generator for Canned {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    fn optimizer(answer: &str) -> QueryOptimizer {
        let policy = CallPolicy::from_settings(Dependency::Generation, &CallSettings::default());
        QueryOptimizer::new(Some(Arc::new(Canned(answer.to_string()))), policy)
    }

    #[tokio::test]
    async fn decomposition_keeps_at_most_five_distinct_sub_questions() {
        let answer = (1..=8)
            .map(|n| format!("{n}. What happened in quarter {n}?"))
            .chain(std::iter::once("2. What happened in quarter 2?".to_string()))
            .collect::<Vec<_>>()
            .join("\n");
        let out = optimizer(&answer).decompose("quarterly history").await;

        assert_eq!(out.status, StageStatus::Ran);
        assert_eq!(out.value.len(), MAX_SUB_QUESTIONS);
        assert_eq!(out.value[0], "What happened in quarter 1?");
        assert_eq!(out.value[4], "What happened in quarter 5?");
    }

    #[tokio::test]
    async fn unparseable_decomposition_falls_back_to_query() {
        let out = optimizer("ok\nno").decompose("quarterly history").await;
        assert_eq!(out.value, vec!["quarterly history".to_string()]);
    }

    #[test]
    fn parses_numbered_lines() {
        let lines = parse_lines(
            "1. What was the revenue last quarter?\n2) How much income was earned?\n\nok\n- Q3 sales figures overall",
        );
        assert_eq!(
            lines,
            vec![
                "What was the revenue last quarter?".to_string(),
                "How much income was earned?".to_string(),
                "Q3 sales figures overall".to_string(),
            ]
        );
    }

    #[test]
    fn short_lines_are_ignored() {
        assert!(parse_lines("1. revenue\n2. short").is_empty());
    }

    #[test]
    fn keywords_skip_short_and_stop_words() {
        assert_eq!(
            extract_keywords("What were the quarterly revenue figures, which should matter?"),
            vec!["were", "quarterly", "revenue", "figures", "matter"]
        );
        assert_eq!(extract_keywords("a b c").len(), 0);
        assert_eq!(
            extract_keywords("alpha bravo charlie delta echo foxtrot").len(),
            MAX_KEYWORDS
        );
    }
}
