use std::sync::Arc;

use async_trait::async_trait;
use index::{EmbeddingCache, cosine_similarity};
use ingest::Chunk;

use super::{ScoreError, ScoringStrategy};

/// Cosine similarity between cached embeddings of the query and each chunk.
/// Chunks that already carry a matching-dimension embedding are not re-embedded.
pub struct EmbeddingCosine {
    cache: Arc<EmbeddingCache>,
}

impl EmbeddingCosine {
    pub fn new(cache: Arc<EmbeddingCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ScoringStrategy for EmbeddingCosine {
    fn name(&self) -> &str {
        "embedding_cosine"
    }

    async fn score(&self, query: &str, chunks: &[Chunk]) -> Result<Vec<f32>, ScoreError> {
        let query_vector = self.cache.get_or_compute(query).await?;
        let dim = query_vector.len();

        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| c.embedding().is_none_or(|e| e.len() != dim))
            .map(|c| c.text.clone())
            .collect();
        let mut computed = self.cache.get_or_compute_batch(&missing).await?.into_iter();

        let mut scores = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let score = match chunk.embedding().filter(|e| e.len() == dim) {
                Some(stored) => cosine_similarity(&query_vector, stored),
                None => {
                    let vector = computed
                        .next()
                        .ok_or_else(|| ScoreError::Failed("embedding batch came back short".into()))?;
                    cosine_similarity(&query_vector, &vector)
                }
            };
            scores.push(score);
        }
        Ok(scores)
    }
}
