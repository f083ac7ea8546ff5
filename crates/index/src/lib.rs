pub mod cache;
pub mod clock;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod neo4j_graph;
pub mod qdrant_index;
pub mod vector;
pub mod vector_index;

pub use cache::{CacheEntry, CacheStats, EmbeddingCache, EmbeddingCacheConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use embeddings::{EmbeddingProvider, OllamaEmbeddingClient};
pub use error::{IndexError, IndexResult};
pub use graph::{GraphQuery, GraphSearchConfig, GraphStore, InMemoryGraphStore};
pub use neo4j_graph::Neo4jGraphStore;
pub use qdrant_index::QdrantVectorIndex;
pub use vector::{StoredEmbedding, cosine_similarity, extract_vector};
pub use vector_index::{InMemoryVectorIndex, SearchHit, VectorIndex};
