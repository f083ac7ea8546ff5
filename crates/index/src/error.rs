use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The embedding provider could not produce a vector. Never cached.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The vector or graph store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored embedding could not be turned into a dense vector.
    #[error("invalid vector: {0}")]
    InvalidVector(String),
}

impl IndexError {
    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::EmbeddingUnavailable(format!("{err:#}"))
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(format!("{err:#}"))
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
