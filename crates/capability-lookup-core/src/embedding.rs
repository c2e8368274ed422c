//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait every embedding backend implements,
//! pure helpers for similarity and BLOB encoding, and [`HashEmbedder`], a
//! deterministic feature-hashing embedder that needs no network or model
//! files.
//!
//! HTTP providers (OpenAI, Ollama) and fastembed live in the
//! `capability-lookup` app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbeddingError;

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector length; identical for every call.
    fn dims(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Reject a vector whose length differs from `expected`.
pub fn check_dims(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use capability_lookup_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Euclidean distance. Mismatched lengths compare as infinitely far apart.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Lower-cased alphanumeric tokens with a naive plural strip.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let lower = t.to_lowercase();
            if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
                lower[..lower.len() - 1].to_string()
            } else {
                lower
            }
        })
}

/// Deterministic feature-hashing embedder.
///
/// Each token is hashed with SHA-256 into one of `dims` buckets with a
/// hashed sign, and the result is L2-normalized. Texts sharing words
/// land close together under cosine distance, which is enough for
/// offline use and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            name: format!("hash-{}", dims.max(1)),
        }
    }

    /// Synchronous form of [`Embedder::embed`].
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_orthogonal_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn l2_distance_basics() {
        assert!((l2_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert!(l2_distance(&[1.0], &[1.0, 2.0]).is_infinite());
    }

    #[test]
    fn check_dims_rejects_wrong_length() {
        assert!(check_dims(vec![0.0; 4], 4).is_ok());
        assert_eq!(
            check_dims(vec![0.0; 3], 4),
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(256);
        let a = e.embed_sync("Mutual Fund Selection");
        let b = e.embed_sync("Mutual Fund Selection");
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embedder_ranks_shared_words_higher() {
        let e = HashEmbedder::new(512);
        let query = e.embed_sync("mutual funds");
        let close = e.embed_sync("Capability: Mutual Fund Selection");
        let far = e.embed_sync("Capability: KYC Verification");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn hash_embedder_empty_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert!(e.embed_sync("").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn embed_trait_matches_sync_form() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed("kyc").await.unwrap(), e.embed_sync("kyc"));
        assert_eq!(e.model_name(), "hash-64");
    }
}
