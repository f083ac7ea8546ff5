use std::time::Duration;

use async_trait::async_trait;
use ingest::Chunk;
use serde::{Deserialize, Serialize};

use super::{ScoreError, ScoringStrategy};

/// Cross-encoder relevance served over HTTP (text-embeddings-inference
/// style `POST /rerank`).
pub struct HttpCrossEncoder {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RerankItem {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn transport_error(err: reqwest::Error) -> ScoreError {
    if err.is_connect() || err.is_timeout() {
        ScoreError::Unavailable(err.to_string())
    } else {
        ScoreError::Failed(err.to_string())
    }
}

/// Place each returned score at its candidate's position.
pub(crate) fn scores_from_items(items: Vec<RerankItem>, expected: usize) -> Result<Vec<f32>, ScoreError> {
    let mut scores = vec![None; expected];
    for item in items {
        let slot = scores
            .get_mut(item.index)
            .ok_or_else(|| ScoreError::Failed(format!("score for unknown index {}", item.index)))?;
        *slot = Some(item.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| ScoreError::Failed(format!("no score for candidate {i}"))))
        .collect()
}

#[async_trait]
impl ScoringStrategy for HttpCrossEncoder {
    fn name(&self) -> &str {
        "cross_encoder"
    }

    async fn score(&self, query: &str, chunks: &[Chunk]) -> Result<Vec<f32>, ScoreError> {
        let url = format!("{}/rerank", self.base_url);
        let request = RerankRequest {
            query,
            texts: chunks.iter().map(|c| c.text.as_str()).collect(),
            truncate: true,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("reranker returned {status}");
            return Err(if status.is_server_error() || status.as_u16() == 404 {
                ScoreError::Unavailable(reason)
            } else {
                ScoreError::Failed(reason)
            });
        }

        let items: Vec<RerankItem> = response
            .json()
            .await
            .map_err(|e| ScoreError::Failed(format!("unparseable reranker response: {e}")))?;

        scores_from_items(items, chunks.len())
    }
}
