pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod recovery;
pub mod response;
pub mod schema;

pub use batch::BatchExtractionCoordinator;
pub use config::ExtractionConfig;
pub use error::{ExtractionFailure, FailureKind, LlmError};
pub use extractor::EntityExtractor;
pub use llm::{LlmClient, OllamaClient};
pub use normalizer::{content_words, name_similarity, normalize_name, normalize_relation_type};
pub use recovery::RecoveryLayer;
pub use schema::{
    Entity, EntityType, ExtractionDebug, ExtractionResult, ExtractionStatus, Relationship,
};
