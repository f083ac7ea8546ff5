use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A contiguous span of document text, optionally carrying its embedding.
///
/// Chunks are produced upstream during ingestion. The embedding is filled in
/// lazily and never replaced once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
    pub offset: (usize, usize), // [start, end] character positions
}

impl Chunk {
    pub fn new(source_document_id: String, text: String, offset: (usize, usize)) -> Self {
        // Generate stable chunk id from content
        let id = Self::generate_chunk_id(&source_document_id, &text, offset);
        Self::with_id(id, source_document_id, text, offset)
    }

    /// Build a chunk whose id was assigned elsewhere (e.g. by the vector store).
    pub fn with_id(
        id: impl Into<String>,
        source_document_id: impl Into<String>,
        text: impl Into<String>,
        offset: (usize, usize),
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_document_id: source_document_id.into(),
            embedding: None,
            offset,
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Attach an embedding. Returns `false` and leaves the chunk untouched if
    /// it was already embedded.
    pub fn set_embedding(&mut self, embedding: Vec<f32>) -> bool {
        if self.embedding.is_some() {
            return false;
        }
        self.embedding = Some(embedding);
        true
    }

    pub fn embedded(mut self, embedding: Vec<f32>) -> Self {
        self.set_embedding(embedding);
        self
    }

    fn generate_chunk_id(doc_id: &str, text: &str, offset: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(offset.0.to_string().as_bytes());
        hasher.update(offset.1.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }
}
