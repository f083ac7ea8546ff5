pub mod cross_encoder;
pub mod embedding;
pub mod transformer;

pub use cross_encoder::HttpCrossEncoder;
pub use embedding::EmbeddingCosine;
pub use transformer::TransformerSimilarity;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use index::IndexError;
use ingest::Chunk;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{CandidateScore, CandidateSource};

#[derive(Debug, Clone, Error)]
pub enum ScoreError {
    /// The model behind the strategy cannot be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("failed: {0}")]
    Failed(String),
}

impl From<IndexError> for ScoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::EmbeddingUnavailable(msg) | IndexError::StoreUnavailable(msg) => {
                ScoreError::Unavailable(msg)
            }
            IndexError::InvalidVector(msg) => ScoreError::Failed(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("no scoring strategies configured")]
    NoStrategies,
    /// Every strategy failed; carries the last one's error.
    #[error("all scoring strategies failed, last was {stage}: {source}")]
    Exhausted { stage: String, source: ScoreError },
}

/// One way of scoring chunks against a query.
#[async_trait]
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// One relevance score per chunk, in the order given. Higher is better.
    async fn score(&self, query: &str, chunks: &[Chunk]) -> Result<Vec<f32>, ScoreError>;
}

/// A chunk proposed for the context, with its retrieval signals.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub raw_similarity: f32,
    pub source: CandidateSource,
    pub vector_rank: Option<usize>,
}

/// Reranker output, best first. `chunks` and `scores` are parallel.
#[derive(Debug, Clone, Default)]
pub struct Reranked {
    pub stage: Option<String>,
    pub skipped: Vec<String>,
    pub chunks: Vec<Chunk>,
    pub scores: Vec<CandidateScore>,
}

/// Merge candidates that name the same chunk. The survivor keeps the
/// higher raw similarity (and that entry's source) and the best vector rank.
pub fn dedup_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        match positions.get(&candidate.chunk.id) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                let vector_rank = match (existing.vector_rank, candidate.vector_rank) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if candidate.raw_similarity > existing.raw_similarity {
                    existing.raw_similarity = candidate.raw_similarity;
                    existing.source = candidate.source;
                }
                existing.vector_rank = vector_rank;
                if !existing.chunk.is_embedded() {
                    if let Some(vector) = candidate.chunk.embedding() {
                        existing.chunk.set_embedding(vector.to_vec());
                    }
                }
            }
            None => {
                positions.insert(candidate.chunk.id.clone(), merged.len());
                merged.push(candidate);
            }
        }
    }

    merged
}

/// Score descending, then vector rank ascending (graph-only last), then
/// chunk id ascending.
fn compare_scores(a: &CandidateScore, b: &CandidateScore) -> Ordering {
    b.reranked_score
        .total_cmp(&a.reranked_score)
        .then_with(|| match (a.vector_rank, b.vector_rank) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn assemble(candidates: Vec<Candidate>, scores: &[f32]) -> (Vec<Chunk>, Vec<CandidateScore>) {
    let mut ranked: Vec<(Chunk, CandidateScore)> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, &score)| {
            let record = CandidateScore {
                chunk_id: candidate.chunk.id.clone(),
                raw_similarity: candidate.raw_similarity,
                reranked_score: score,
                source: candidate.source,
                vector_rank: candidate.vector_rank,
            };
            (candidate.chunk, record)
        })
        .collect();
    ranked.sort_by(|(_, a), (_, b)| compare_scores(a, b));
    ranked.into_iter().unzip()
}

/// Order candidates by their retrieval similarity alone. Used when no
/// strategy can score them.
pub fn rank_by_raw_similarity(candidates: Vec<Candidate>) -> Reranked {
    let candidates = dedup_candidates(candidates);
    let raw: Vec<f32> = candidates.iter().map(|c| c.raw_similarity).collect();
    let (chunks, scores) = assemble(candidates, &raw);
    Reranked {
        stage: None,
        skipped: Vec::new(),
        chunks,
        scores,
    }
}

/// Re-scores candidates with the first strategy in the chain that succeeds.
pub struct Reranker {
    strategies: Vec<Arc<dyn ScoringStrategy>>,
}

impl Reranker {
    pub fn new(strategies: Vec<Arc<dyn ScoringStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn rerank(&self, query: &str, candidates: Vec<Candidate>) -> Result<Reranked, RerankError> {
        if self.strategies.is_empty() {
            return Err(RerankError::NoStrategies);
        }
        let candidates = dedup_candidates(candidates);
        if candidates.is_empty() {
            return Ok(Reranked::default());
        }

        let chunks: Vec<Chunk> = candidates.iter().map(|c| c.chunk.clone()).collect();
        let mut skipped = Vec::new();
        let mut last_error = None;

        for strategy in &self.strategies {
            let name = strategy.name().to_string();
            let outcome = strategy
                .score(query, &chunks)
                .await
                .and_then(|scores| usable(scores, chunks.len()));

            match outcome {
                Ok(scores) => {
                    if !skipped.is_empty() {
                        info!(stage = %name, skipped = skipped.len(), "Reranked with fallback strategy");
                    } else {
                        debug!(stage = %name, candidates = chunks.len(), "Reranked");
                    }
                    let (chunks, scores) = assemble(candidates, &scores);
                    return Ok(Reranked {
                        stage: Some(name),
                        skipped,
                        chunks,
                        scores,
                    });
                }
                Err(err) => {
                    warn!(stage = %name, error = %err, "Scoring strategy failed, falling through");
                    skipped.push(format!("{name}: {err}"));
                    last_error = Some((name, err));
                }
            }
        }

        match last_error {
            Some((stage, source)) => Err(RerankError::Exhausted { stage, source }),
            None => Err(RerankError::NoStrategies),
        }
    }
}

fn usable(scores: Vec<f32>, expected: usize) -> Result<Vec<f32>, ScoreError> {
    if scores.len() != expected {
        return Err(ScoreError::Failed(format!(
            "{} scores for {expected} candidates",
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ScoreError::Failed("non-finite score".into()));
    }
    Ok(scores)
}
