pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod rerank;

pub use config::{AppConfig, OperationMode, RetrievalConfig, ServiceEndpoints};
pub use context::{CandidateScore, CandidateSource, ContextSet, RetrievalDiagnostics};
pub use error::RetrievalError;
pub use orchestrator::{RetrievalOrchestrator, query_terms};
pub use rerank::{
    Candidate, EmbeddingCosine, HttpCrossEncoder, RerankError, Reranked, Reranker, ScoreError,
    ScoringStrategy, TransformerSimilarity,
};
