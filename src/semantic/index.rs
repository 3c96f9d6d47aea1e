//! Cosine-distance vector search over a user's stored embeddings.
//!
//! The index is built per query from the rows the store returns, so it never
//! outlives a request and never mixes users.

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Item id
    pub id: String,
    /// Cosine distance, `1 - cosine similarity`
    pub distance: f32,
}

impl SearchResult {
    pub fn score(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Embedding blob of {0} bytes is not a whole number of f32 values")]
    MalformedBlob(usize),
}

pub struct VectorIndex {
    entries: Vec<(String, Vec<f32>, f32)>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            dimensions,
        }
    }

    /// Add an entry. Vectors of the wrong size or with zero norm are rejected.
    pub fn insert(&mut self, id: String, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = l2_norm(&embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.push((id, embedding, norm));
        Ok(())
    }

    /// Nearest entries first, at most `limit`.
    pub fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .map(|(id, embedding, norm)| SearchResult {
                id: id.clone(),
                distance: 1.0 - cosine_similarity(query, embedding, query_norm, *norm),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        Ok(results)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32, target_norm: f32) -> f32 {
    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

/// Little-endian f32 encoding used for the `content_embedding` column.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, IndexError> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::MalformedBlob(blob.len()));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
