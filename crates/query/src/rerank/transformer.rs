use std::f32::consts::PI;
use std::sync::Arc;

use async_trait::async_trait;
use index::{EmbeddingProvider, cosine_similarity};
use ingest::Chunk;

use super::{ScoreError, ScoringStrategy};

/// Encodes query and chunks independently with a dedicated model and
/// scores by angular similarity, `1 - acos(cos) / pi`, in `[0, 1]`.
pub struct TransformerSimilarity {
    encoder: Arc<dyn EmbeddingProvider>,
}

impl TransformerSimilarity {
    pub fn new(encoder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { encoder }
    }
}

pub(crate) fn angular_similarity(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b).acos() / PI
}

#[async_trait]
impl ScoringStrategy for TransformerSimilarity {
    fn name(&self) -> &str {
        "transformer_similarity"
    }

    async fn score(&self, query: &str, chunks: &[Chunk]) -> Result<Vec<f32>, ScoreError> {
        let query_vector = self.encoder.embed(query).await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.encoder.embed_batch(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(ScoreError::Failed(format!(
                "encoder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != query_vector.len()) {
            return Err(ScoreError::Failed(format!(
                "dimension mismatch: query {} vs chunk {}",
                query_vector.len(),
                bad.len()
            )));
        }

        Ok(vectors
            .iter()
            .map(|v| angular_similarity(&query_vector, v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CandidateSource;
    use crate::rerank::{Candidate, Reranker};
    use index::IndexResult;

    /// Looks vectors up by text. `batch_limit` truncates batch replies.
    struct TableEncoder {
        table: Vec<(&'static str, Vec<f32>)>,
        batch_limit: Option<usize>,
    }

    impl TableEncoder {
        fn new(table: Vec<(&'static str, Vec<f32>)>) -> Arc<Self> {
            Arc::new(Self { table, batch_limit: None })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TableEncoder {
        async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
            Ok(self
                .table
                .iter()
                .find(|(key, _)| *key == text)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
        }

        async fn embed_batch(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
            let mut vectors = Vec::new();
            for text in texts.iter().take(self.batch_limit.unwrap_or(texts.len())) {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Scores every chunk the same.
    struct Flat;

    #[async_trait]
    impl ScoringStrategy for Flat {
        fn name(&self) -> &str {
            "flat"
        }

        async fn score(&self, _query: &str, chunks: &[Chunk]) -> Result<Vec<f32>, ScoreError> {
            Ok(vec![0.5; chunks.len()])
        }
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::with_id("c1", "doc", "aligned", (0, 7)),
            Chunk::with_id("c2", "doc", "orthogonal", (8, 18)),
        ]
    }

    #[test]
    fn test_angular_similarity_range() {
        assert!((angular_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((angular_similarity(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-6);
        assert!(angular_similarity(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_scores_follow_encoder_geometry() {
        let encoder = TableEncoder::new(vec![
            ("query", vec![1.0, 0.0]),
            ("aligned", vec![2.0, 0.0]),
            ("orthogonal", vec![0.0, 3.0]),
        ]);
        let strategy = TransformerSimilarity::new(encoder);

        let scores = strategy.score("query", &chunks()).await.unwrap();

        assert_eq!(scores.len(), 2);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!((scores[1] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails() {
        let encoder = TableEncoder::new(vec![
            ("query", vec![1.0, 0.0]),
            ("aligned", vec![1.0, 0.0]),
            ("orthogonal", vec![0.0, 1.0, 0.0]),
        ]);
        let strategy = TransformerSimilarity::new(encoder);

        let err = strategy.score("query", &chunks()).await.unwrap_err();

        assert!(matches!(err, ScoreError::Failed(msg) if msg.contains("dimension mismatch")));
    }

    #[tokio::test]
    async fn test_short_batch_fails() {
        let encoder = Arc::new(TableEncoder {
            table: vec![("query", vec![1.0, 0.0])],
            batch_limit: Some(1),
        });
        let strategy = TransformerSimilarity::new(encoder);

        let err = strategy.score("query", &chunks()).await.unwrap_err();

        assert!(matches!(err, ScoreError::Failed(msg) if msg.contains("1 vectors for 2 chunks")));
    }

    #[tokio::test]
    async fn test_mismatch_falls_through_to_next_stage() {
        let encoder = TableEncoder::new(vec![("query", vec![1.0, 0.0, 0.0, 0.0])]);
        let reranker = Reranker::new(vec![
            Arc::new(TransformerSimilarity::new(encoder)),
            Arc::new(Flat),
        ]);
        let candidates = chunks()
            .into_iter()
            .enumerate()
            .map(|(rank, chunk)| Candidate {
                chunk,
                raw_similarity: 0.9,
                source: CandidateSource::Vector,
                vector_rank: Some(rank),
            })
            .collect();

        let reranked = reranker.rerank("query", candidates).await.unwrap();

        assert_eq!(reranked.stage.as_deref(), Some("flat"));
        assert_eq!(reranked.skipped.len(), 1);
        assert!(reranked.skipped[0].starts_with("transformer_similarity"));
        assert_eq!(reranked.chunks[0].id, "c1");
    }
}
