use index::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Neither the vector store nor the graph store could be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The query could not be embedded and the graph offered no fallback.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("invalid retrieval config: {0}")]
    Config(String),
}

impl From<IndexError> for RetrievalError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::EmbeddingUnavailable(msg) => RetrievalError::EmbeddingUnavailable(msg),
            IndexError::StoreUnavailable(msg) => RetrievalError::StoreUnavailable(msg),
            IndexError::InvalidVector(msg) => RetrievalError::StoreUnavailable(msg),
        }
    }
}
