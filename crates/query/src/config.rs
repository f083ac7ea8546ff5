use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use extract::ExtractionConfig;
use index::{EmbeddingCacheConfig, GraphSearchConfig};
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub extraction: ExtractionConfig,
    pub cache: EmbeddingCacheConfig,
    pub retrieval: RetrievalConfig,
    pub services: ServiceEndpoints,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // Small candidate sets, shallow graph, caches on
    Accurate, // Wider search, deeper graph, always fresh
    Balanced, // Default
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub top_k_rerank: usize,
    /// How many of the best vector hits may seed graph lookup.
    pub graph_seed_chunks: usize,
    /// Overall budget for one retrieval; past it the best context so far is returned.
    pub deadline_secs: Option<u64>,
    pub graph: GraphSearchConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            top_k_rerank: 5,
            graph_seed_chunks: 5,
            deadline_secs: None,
            graph: GraphSearchConfig::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.top_k == 0 {
            return Err(RetrievalError::Config("top_k must be at least 1".into()));
        }
        for (name, value) in [
            ("graph.entity_threshold", self.graph.entity_threshold),
            ("graph.chunk_threshold", self.graph.chunk_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RetrievalError::Config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub ollama_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    /// Separate encoder for the transformer-similarity rerank stage. Skipped when unset.
    pub similarity_model: Option<String>,
    /// Cross-encoder rerank service. Skipped when unset.
    pub reranker_url: Option<String>,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            llm_model: "llama3".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            similarity_model: None,
            reranker_url: None,
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_collection: "chunks".to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "neo4j".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            extraction: ExtractionConfig::default(),
            cache: EmbeddingCacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            services: ServiceEndpoints::default(),
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            extraction: ExtractionConfig {
                max_retries: 2,
                retry_delay_secs: 0.5,
                attempt_timeout_secs: 30,
                batch_size: 16,
                concurrency_limit: 10,
                ..ExtractionConfig::default()
            },
            cache: EmbeddingCacheConfig {
                ttl_secs: 4 * 3600,
                enabled: true,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                top_k_rerank: 3,
                graph_seed_chunks: 3,
                deadline_secs: Some(10),
                graph: GraphSearchConfig {
                    max_facts: 20,
                    ..GraphSearchConfig::default()
                },
            },
            services: ServiceEndpoints::default(),
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            extraction: ExtractionConfig {
                max_retries: 5,
                retry_delay_secs: 2.0,
                attempt_timeout_secs: 120,
                batch_size: 4,
                concurrency_limit: 3,
                cache_enabled: false,
                cache_max_entries: None,
            },
            cache: EmbeddingCacheConfig {
                ttl_secs: 600,
                enabled: false,
            },
            retrieval: RetrievalConfig {
                top_k: 20,
                top_k_rerank: 8,
                graph_seed_chunks: 8,
                deadline_secs: None,
                graph: GraphSearchConfig {
                    entity_threshold: 0.9,
                    chunk_threshold: 0.4,
                    max_hops: 2,
                    max_facts: 100,
                },
            },
            services: ServiceEndpoints::default(),
        }
    }

    pub fn preset(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// `graphrag.toml` (optional) then `GRAPHRAG__*` environment variables,
    /// layered over the preset for the configured mode.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("graphrag")
    }

    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let overrides = || {
            Config::builder()
                .add_source(File::with_name(file).required(false))
                .add_source(
                    Environment::with_prefix("GRAPHRAG")
                        .separator("__")
                        .try_parsing(true),
                )
        };

        // The mode picks which preset the other values are layered over
        let mode = overrides()
            .build()?
            .get::<OperationMode>("mode")
            .unwrap_or(OperationMode::Balanced);

        let config = Config::builder()
            .add_source(Config::try_from(&Self::preset(mode))?)
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("GRAPHRAG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
