use anyhow::{Context, Result};
use async_trait::async_trait;
use ingest::Chunk;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::vector::{cosine_similarity, extract_vector};
use crate::vector_index::{SearchHit, VectorIndex, sort_hits};

/// Vector search against a Qdrant collection over its REST API.
///
/// Points carry `chunk_id`, `doc_id`, `text` and `offset` in their payload.
/// Similarity is recomputed from the returned vector when it can be decoded,
/// so stored quantized or multi-vector points score like dense ones.
pub struct QdrantVectorIndex {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
}

impl QdrantVectorIndex {
    pub fn new(base_url: String, collection_name: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            collection_name,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!(
            "{}/collections/{}/points/{}",
            self.base_url, self.collection_name, path
        );

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {path} request to Qdrant"))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant {path} failed: {error_text}");
        }

        response.json().await.context("Failed to parse Qdrant response")
    }

    async fn search_rest(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let body = json!({
            "vector": query_vector,
            "limit": top_k,
            "with_payload": true,
            "with_vector": true
        });
        let result = self.post("search", &body).await?;

        let points = result["result"]
            .as_array()
            .context("Invalid Qdrant response format")?;

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let Some(chunk_id) = payload_of(point).and_then(|p| p.get("chunk_id")).and_then(Value::as_str) else {
                warn!(point_id = %point["id"], "Qdrant point without chunk_id");
                continue;
            };
            hits.push(SearchHit {
                chunk_id: chunk_id.to_string(),
                similarity: rescore(query_vector, point),
            });
        }

        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn scroll_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        let body = json!({
            "filter": { "must": [ { "key": "chunk_id", "match": { "any": chunk_ids } } ] },
            "limit": chunk_ids.len(),
            "with_payload": true,
            "with_vector": true
        });
        let result = self.post("scroll", &body).await?;

        let points = result["result"]["points"]
            .as_array()
            .context("Invalid Qdrant scroll response format")?;

        let mut chunks = Vec::with_capacity(points.len());
        for point in points {
            match chunk_from_point(point) {
                Some(chunk) => chunks.push(chunk),
                None => warn!(point_id = %point["id"], "Qdrant point with incomplete payload"),
            }
        }

        // Input order, not scroll order
        chunks.sort_by_key(|c| chunk_ids.iter().position(|id| *id == c.id));
        Ok(chunks)
    }
}

fn payload_of(point: &Value) -> Option<&Map<String, Value>> {
    point["payload"].as_object()
}

/// Score from the decoded vector, falling back to the score Qdrant reported.
fn rescore(query_vector: &[f32], point: &Value) -> f32 {
    let reported = point["score"].as_f64().unwrap_or(0.0) as f32;
    match stored_vector(point) {
        Some(vector) if vector.len() == query_vector.len() => cosine_similarity(query_vector, &vector),
        _ => reported.clamp(-1.0, 1.0),
    }
}

fn stored_vector(point: &Value) -> Option<Vec<f32>> {
    let raw = point.get("vector")?;
    match extract_vector(raw) {
        Ok(vector) => Some(vector),
        Err(err) => {
            debug!(point_id = %point["id"], error = %err, "Using reported score");
            None
        }
    }
}

fn chunk_from_point(point: &Value) -> Option<Chunk> {
    let payload = payload_of(point)?;
    let chunk_id = payload.get("chunk_id")?.as_str()?;
    let text = payload.get("text")?.as_str()?;
    let doc_id = payload.get("doc_id").and_then(Value::as_str).unwrap_or_default();
    let offset = payload
        .get("offset")
        .and_then(|o| serde_json::from_value::<(usize, usize)>(o.clone()).ok())
        .unwrap_or((0, text.len()));

    let mut chunk = Chunk::with_id(chunk_id, doc_id, text, offset);
    if let Some(vector) = stored_vector(point) {
        chunk.set_embedding(vector);
    }
    Some(chunk)
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn search(&self, query_vector: &[f32], top_k: usize) -> IndexResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.search_rest(query_vector, top_k)
            .await
            .map_err(IndexError::store)
    }

    async fn fetch_chunks(&self, chunk_ids: &[String]) -> IndexResult<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.scroll_chunks(chunk_ids)
            .await
            .map_err(IndexError::store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescore_prefers_decoded_vector() {
        let point = json!({"id": 1, "score": 0.1, "vector": [1.0, 0.0]});
        assert!((rescore(&[1.0, 0.0], &point) - 1.0).abs() < 1e-6);

        let quantized = json!({"id": 2, "score": 0.1, "vector": {"scale": 1.0, "offset": 0.0, "values": [1, 0]}});
        assert!((rescore(&[1.0, 0.0], &quantized) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rescore_falls_back_to_reported_score() {
        let named = json!({"id": 1, "score": 0.42, "vector": {"dense": [1.0, 0.0]}});
        assert!((rescore(&[1.0, 0.0], &named) - 0.42).abs() < 1e-6);

        let missing = json!({"id": 2, "score": 0.7});
        assert!((rescore(&[1.0, 0.0], &missing) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_chunk_from_payload() {
        let point = json!({
            "id": 7,
            "payload": {"chunk_id": "c1", "doc_id": "d1", "text": "Climate policy", "offset": [10, 24]},
            "vector": [0.5, 0.5]
        });

        let chunk = chunk_from_point(&point).unwrap();
        assert_eq!(chunk.id, "c1");
        assert_eq!(chunk.source_document_id, "d1");
        assert_eq!(chunk.offset, (10, 24));
        assert_eq!(chunk.embedding(), Some(&[0.5, 0.5][..]));

        assert!(chunk_from_point(&json!({"id": 8, "payload": {"doc_id": "d1"}})).is_none());
    }
}
