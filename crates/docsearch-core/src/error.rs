use std::fmt;

use thiserror::Error;

/// External dependency classes guarded by timeouts and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Embedding,
    Rerank,
    Generation,
}

impl Dependency {
    /// Wrap a failure message in the error variant owned by this dependency.
    #[must_use]
    pub fn error(self, message: impl Into<String>) -> Error {
        let message = message.into();
        match self {
            Self::Embedding => Error::EmbeddingService(message),
            Self::Rerank => Error::Rerank(message),
            Self::Generation => Error::Generation(message),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embedding => "embedding",
            Self::Rerank => "rerank",
            Self::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Duplicate chunk id: {0}")]
    DuplicateChunk(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index is empty")]
    EmptyIndex,

    #[error("Embedding service failed: {0}")]
    EmbeddingService(String),

    #[error("Rerank model failed: {0}")]
    Rerank(String),

    #[error("Query generation failed: {0}")]
    Generation(String),

    #[error("{dependency} call timed out after {millis} ms")]
    Timeout { dependency: Dependency, millis: u64 },

    #[error("Index operation failed: {0}")]
    Index(String),

    #[error("No retrieval strategy available: {0}")]
    NoRetrievalStrategy(String),
}

impl Error {
    /// Failures of an external dependency that may succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingService(_) | Self::Rerank(_) | Self::Generation(_) | Self::Timeout { .. }
        )
    }

    /// Failures a retrieval can route around by dropping one stage.
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        self.is_transient() || matches!(self, Self::EmptyIndex | Self::Index(_))
    }

    /// Caller mistakes that are surfaced immediately and never degraded around.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::UnknownCollection(_)
                | Self::CollectionExists(_)
                | Self::DuplicateChunk(_)
                | Self::DimensionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
