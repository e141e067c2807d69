//! docsearch-embed
//!
//! Local candle models behind the core `Embedder` / `PairScorer` traits,
//! plus hashing fakes selected by configuration.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;

use docsearch_core::config::{expand_path, ModelSettings};
use docsearch_core::traits::{Embedder, PairScorer};

pub mod bge;
pub mod cross_encoder;
pub mod device;
pub mod fake;
pub mod pool;
pub mod tokenize;
pub mod weights;

pub use bge::BgeM3Embedder;
pub use cross_encoder::CrossEncoderScorer;
pub use fake::{FakeEmbedder, TokenOverlapScorer};
pub use pool::masked_mean_l2;

pub const FAKE_DIM: usize = 1024;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn use_fake(models: &ModelSettings) -> bool {
    models.use_fake_models || env_flag("APP_USE_FAKE_EMBEDDINGS")
}

pub fn get_default_embedder(models: &ModelSettings) -> Result<Arc<dyn Embedder>> {
    if use_fake(models) {
        info!(dim = FAKE_DIM, "using fake embedder");
        return Ok(Arc::new(FakeEmbedder::new(FAKE_DIM)));
    }
    let dir = resolve_model_dir(
        models.embedding_dir.as_deref(),
        &["APP_MODEL_DIR", "MODEL_DIR"],
        &["../models/bge-m3", "models/bge-m3"],
    )?;
    Ok(Arc::new(BgeM3Embedder::load(&dir)?))
}

/// `None` when no rerank model is configured; retrieval then keeps the fused order.
pub fn get_default_scorer(models: &ModelSettings) -> Result<Option<Arc<dyn PairScorer>>> {
    if use_fake(models) {
        info!("using token-overlap scorer");
        return Ok(Some(Arc::new(TokenOverlapScorer)));
    }
    match models.reranker_dir.as_deref() {
        Some(dir) => {
            let dir = resolve_model_dir(Some(dir), &["APP_RERANKER_DIR"], &[])?;
            Ok(Some(Arc::new(CrossEncoderScorer::load(&dir)?)))
        }
        None => {
            info!("no rerank model configured");
            Ok(None)
        }
    }
}

/// First existing directory among: the configured path, the listed env vars,
/// then the fallback paths.
pub fn resolve_model_dir(
    configured: Option<&str>,
    env_vars: &[&str],
    fallbacks: &[&str],
) -> Result<PathBuf> {
    if let Some(dir) = configured {
        let p = expand_path(dir);
        if p.exists() {
            info!(path = %p.display(), "using configured model dir");
            return Ok(p);
        }
    }
    for var in env_vars {
        if let Ok(dir) = std::env::var(var) {
            let p = expand_path(&dir);
            if p.exists() {
                info!(path = %p.display(), source = *var, "using model dir from env");
                return Ok(p);
            }
        }
    }
    for dir in fallbacks {
        let p = Path::new(dir);
        if p.exists() {
            info!(path = %p.display(), "using default model dir");
            return Ok(p.to_path_buf());
        }
    }
    Err(anyhow!(
        "Could not locate model directory (configured: {:?})",
        configured
    ))
}
