use async_trait::async_trait;

/// Text to dense vector model.
///
/// Implementations are blocking; callers run them on a blocking pool.
pub trait Embedder: Send + Sync {
    /// Identifies the model for embedding cache keys.
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Joint query/passage relevance model.
///
/// Returns one score per passage, in input order. Higher is better.
pub trait PairScorer: Send + Sync {
    fn model_id(&self) -> &str;
    fn score_pairs(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// Prompt-in, text-out language model used for query rewriting.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
