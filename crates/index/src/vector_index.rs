use async_trait::async_trait;
use dashmap::DashMap;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IndexResult;
use crate::vector::{StoredEmbedding, cosine_similarity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

/// Nearest-neighbour search over embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `top_k` hits, highest similarity first. An empty index yields
    /// an empty list.
    async fn search(&self, query_vector: &[f32], top_k: usize) -> IndexResult<Vec<SearchHit>>;

    /// The chunks behind `chunk_ids`. Unknown ids are skipped.
    async fn fetch_chunks(&self, chunk_ids: &[String]) -> IndexResult<Vec<Chunk>>;
}

/// Highest similarity first; equal scores by chunk id.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

struct StoredChunk {
    chunk: Chunk,
    embedding: StoredEmbedding,
}

/// Brute-force index held in process memory.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    chunks: DashMap<String, StoredChunk>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: Chunk, embedding: StoredEmbedding) {
        self.chunks
            .insert(chunk.id.clone(), StoredChunk { chunk, embedding });
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, query_vector: &[f32], top_k: usize) -> IndexResult<Vec<SearchHit>> {
        if top_k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::with_capacity(self.chunks.len());
        for stored in self.chunks.iter() {
            let vector = match stored.embedding.to_dense() {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(chunk_id = %stored.chunk.id, error = %err, "Skipping chunk with unreadable embedding");
                    continue;
                }
            };
            if vector.len() != query_vector.len() {
                warn!(
                    chunk_id = %stored.chunk.id,
                    expected = query_vector.len(),
                    actual = vector.len(),
                    "Skipping chunk with mismatched embedding dimension"
                );
                continue;
            }
            hits.push(SearchHit {
                chunk_id: stored.chunk.id.clone(),
                similarity: cosine_similarity(query_vector, &vector),
            });
        }

        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn fetch_chunks(&self, chunk_ids: &[String]) -> IndexResult<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            let Some(stored) = self.chunks.get(id) else {
                continue;
            };
            let mut chunk = stored.chunk.clone();
            if !chunk.is_embedded() {
                if let Ok(vector) = stored.embedding.to_dense() {
                    chunk.set_embedding(vector);
                }
            }
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}
