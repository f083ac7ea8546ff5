use extract::Relationship;
use ingest::Chunk;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Vector,
    Graph,
}

/// Per-query score record for one candidate chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub chunk_id: String,
    pub raw_similarity: f32,
    pub reranked_score: f32,
    pub source: CandidateSource,
    /// Position in the vector search results. `None` for graph-only candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
}

/// What happened while assembling a [`ContextSet`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDiagnostics {
    /// The reranking strategy whose scores were used.
    pub scoring_stage: Option<String>,
    /// Strategies tried before `scoring_stage`, with the reason each was skipped.
    pub skipped_stages: Vec<String>,
    /// Pipeline steps that failed and were worked around.
    pub degraded: Vec<String>,
    pub deadline_exceeded: bool,
}

/// Ranked retrieval context handed to answer generation.
///
/// `chunks` and `scores` are parallel and ordered best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSet {
    pub chunks: Vec<Chunk>,
    pub scores: Vec<CandidateScore>,
    pub graph_facts: Vec<Relationship>,
    pub diagnostics: RetrievalDiagnostics,
}

impl ContextSet {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.graph_facts.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.id.as_str()).collect()
    }
}
