//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Nested keys in the environment use a double underscore, e.g.
//! `APP_CACHE__CAPACITY=512`.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{
    FusionWeights, RetrievalOptions, DEFAULT_CANDIDATE_POOL, DEFAULT_K, DEFAULT_RANK_CONSTANT,
};

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Load from the working directory, picking the overlay file from `RUST_ENV`.
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    pub fn load_from(dir: &Path, env_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        let overlay = match env_name {
            "dev" | "development" => Some("config.dev.toml"),
            "prod" | "production" => Some("config.prod.toml"),
            "test" | "testing" => Some("config.test.toml"),
            _ => None,
        };
        if let Some(file) = overlay {
            figment = figment.merge(Toml::file(dir.join(file)));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the full settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retrieval: RetrievalSettings,
    pub cache: CacheSettings,
    pub dependencies: DependencySettings,
    pub models: ModelSettings,
}

impl Settings {
    pub fn validate(&self) -> crate::Result<()> {
        self.retrieval.default_options().validate()?;
        if self.cache.capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "cache.capacity must be greater than zero".into(),
            ));
        }
        let deps = &self.dependencies;
        deps.embedding.validate("embedding")?;
        deps.rerank.validate("rerank")?;
        deps.generation.validate("generation")?;
        Ok(())
    }
}

/// Defaults applied when a request does not carry its own options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub candidate_pool_size: usize,
    pub rank_constant: f64,
    pub lexical_weight: f64,
    pub semantic_weight: f64,
    pub use_reranking: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            candidate_pool_size: DEFAULT_CANDIDATE_POOL,
            rank_constant: DEFAULT_RANK_CONSTANT,
            lexical_weight: 1.0,
            semantic_weight: 1.0,
            use_reranking: true,
        }
    }
}

impl RetrievalSettings {
    pub fn default_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            k: self.k,
            candidate_pool_size: self.candidate_pool_size,
            rank_constant: self.rank_constant,
            weights: FusionWeights {
                lexical: self.lexical_weight,
                semantic: self.semantic_weight,
            },
            use_reranking: self.use_reranking,
            ..RetrievalOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Result cache entries across all collections.
    pub capacity: usize,
    /// Memoized embeddings; zero disables the embedding cache.
    pub embedding_capacity: usize,
    /// Age after which a cached ranking is recomputed; zero disables expiry.
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            embedding_capacity: 4096,
            ttl_secs: 86_400,
        }
    }
}

/// Timeout and retry bounds for one external dependency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_ms: 100,
        }
    }
}

/// Upper bound on the base retry delay.
pub const MAX_BACKOFF_MS: u64 = 60_000;

impl CallSettings {
    pub fn validate(&self, name: &str) -> crate::Result<()> {
        if self.timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(format!(
                "dependencies.{name}.timeout_ms must be greater than zero"
            )));
        }
        if self.backoff_ms > MAX_BACKOFF_MS {
            return Err(crate::Error::InvalidConfig(format!(
                "dependencies.{name}.backoff_ms must be at most {MAX_BACKOFF_MS}"
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySettings {
    pub embedding: CallSettings,
    pub rerank: CallSettings,
    /// Retries here are ignored: query rewriting is never retried.
    pub generation: CallSettings,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            embedding: CallSettings::default(),
            rerank: CallSettings::default(),
            generation: CallSettings {
                timeout_ms: 15_000,
                max_retries: 0,
                backoff_ms: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub embedding_dir: Option<String>,
    pub reranker_dir: Option<String>,
    pub generator_url: Option<String>,
    pub generator_model: String,
    pub generator_temperature: f32,
    /// Name of the environment variable holding the generator bearer token.
    pub generator_api_key_env: Option<String>,
    pub use_fake_models: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            embedding_dir: None,
            reranker_dir: None,
            generator_url: None,
            generator_model: "gpt-3.5-turbo".to_string(),
            generator_temperature: 0.7,
            generator_api_key_env: Some("OPENAI_API_KEY".to_string()),
            use_fake_models: false,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
