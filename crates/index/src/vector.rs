use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IndexError, IndexResult};

/// The shapes an embedding may be stored in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredEmbedding {
    RawFloatArray(Vec<f32>),
    /// Per-token or per-window rows; several rows are mean-pooled.
    Nested(Vec<Vec<f32>>),
    /// `value = offset + scale * q` for each byte `q`.
    Quantized { scale: f32, offset: f32, values: Vec<u8> },
}

impl StoredEmbedding {
    /// Normalize into a dense float vector.
    pub fn to_dense(&self) -> IndexResult<Vec<f32>> {
        let dense = match self {
            StoredEmbedding::RawFloatArray(values) => values.clone(),
            StoredEmbedding::Nested(rows) => mean_pool(rows)?,
            StoredEmbedding::Quantized { scale, offset, values } => {
                values.iter().map(|&q| offset + scale * q as f32).collect()
            }
        };

        if dense.is_empty() {
            return Err(IndexError::InvalidVector("empty embedding".into()));
        }
        if dense.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::InvalidVector("non-finite component".into()));
        }
        Ok(dense)
    }
}

fn mean_pool(rows: &[Vec<f32>]) -> IndexResult<Vec<f32>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    if rows.len() == 1 {
        return Ok(first.clone());
    }

    let dim = first.len();
    let mut pooled = vec![0.0f32; dim];
    for row in rows {
        if row.len() != dim {
            return Err(IndexError::InvalidVector(format!(
                "nested rows of unequal length ({} vs {dim})",
                row.len()
            )));
        }
        for (acc, x) in pooled.iter_mut().zip(row) {
            *acc += x;
        }
    }
    let n = rows.len() as f32;
    pooled.iter_mut().for_each(|x| *x /= n);
    Ok(pooled)
}

/// Decode whatever a store handed back as a vector.
pub fn extract_vector(value: &Value) -> IndexResult<Vec<f32>> {
    let stored: StoredEmbedding = serde_json::from_value(value.clone())
        .map_err(|e| IndexError::InvalidVector(format!("unrecognized embedding format: {e}")))?;
    stored.to_dense()
}

/// Cosine similarity clamped to `[-1, 1]`. Zero when the vectors differ in
/// length or either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
    }
}
