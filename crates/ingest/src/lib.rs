pub mod chunk;

pub use chunk::Chunk;

use sha2::{Digest, Sha256};

/// Content-addressed key for caches: hex SHA-256 of the text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
