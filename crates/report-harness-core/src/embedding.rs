//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the offline [`HashEmbedder`], and pure helpers for vector
//! serialization and distance computation.
//!
//! Network-backed providers (OpenAI-compatible, Ollama, fastembed) live in
//! the `report-harness` app crate.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Trait for embedding providers.
///
/// `embed` must preserve input order, return exactly one vector per input
/// and be deterministic for the same model and input.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"embedding-3"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `2048`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, EmbeddingError> {
    let mut vectors = provider.embed(&[text.to_string()]).await?;
    if vectors.len() != 1 {
        return Err(EmbeddingError::CountMismatch {
            sent: 1,
            received: vectors.len(),
        });
    }
    let vector = vectors.remove(0);
    check_dims(provider.dims(), &vector)?;
    Ok(vector)
}

/// Fail with [`EmbeddingError::DimensionMismatch`] unless `vector` has `dims` entries.
pub fn check_dims(dims: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.len() != dims {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dims,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Each character unigram and bigram of the input is hashed into one of
/// `dims` buckets with a sign bit; the bucket counts are L2-normalised.
/// Texts sharing vocabulary land close together, which is enough for
/// offline builds and tests. No network, no model files.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model: format!("hash-{}", dims.max(1)),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        for (i, &c) in chars.iter().enumerate() {
            self.bump(&mut v, feature_hash(&[c]));
            if let Some(&next) = chars.get(i + 1) {
                self.bump(&mut v, feature_hash(&[c, next]));
            }
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn bump(&self, v: &mut [f32], hash: u64) {
        let bucket = (hash % self.dims as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn feature_hash(chars: &[char]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &c in chars {
        for b in (c as u32).to_le_bytes() {
            hash = (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use report_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
///
/// Trailing bytes that do not form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Squared Euclidean distance.
///
/// ```text
/// d(a, b) = Σ (aᵢ − bᵢ)²
/// ```
///
/// Callers must pass equal-length slices; extra entries in the longer
/// slice are ignored.
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
