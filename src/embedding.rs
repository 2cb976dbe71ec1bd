use candle_core::Tensor;

use crate::error::{Error, Result};

/// A model that maps text to a fixed-dimension dense vector.
///
/// For a given configuration, identical text must produce the same vector.
/// Implementations are shared across request threads.
pub trait Embedder: Send + Sync {
    /// Identifies the model configuration; cached vectors produced under a
    /// different id are not reused.
    fn model_id(&self) -> &str;

    /// Dimension of the produced vectors.
    fn dimension(&self) -> usize;

    /// Encode a batch of texts, returning one vector per input in order.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single text.
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| {
                Error::Computation("embedder returned no vector".to_string())
            })
    }
}

/// Stable 64-bit fingerprint of an embedder's configuration.
pub fn model_fingerprint(embedder: &dyn Embedder) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(embedder.model_id().as_bytes());
    hasher.update(&(embedder.dimension() as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Feature-hashing bag-of-words embedder.
///
/// Each lowercased alphanumeric token is hashed with BLAKE3 into one of
/// `dimension` buckets with a hash-derived sign. Needs no model download,
/// which makes it suitable for offline use and tests.
///
/// # Examples
///
/// ```
/// use askdoc::embedding::{Embedder, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(64);
/// let a = embedder.encode("cats are mammals").unwrap();
/// let b = embedder.encode("cats are mammals").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-bow-{dimension}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let mut head = [0u8; 8];
            head.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dimension as u64)
                as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Split text into lowercase word tokens (alphanumerics and underscores).
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Mean-pool a `[batch, tokens, dimension]` tensor into one vector per
/// batch entry.
pub fn mean_pool(embeddings: &Tensor) -> Result<Vec<Vec<f32>>> {
    let (_batch, _tokens, _dimension) = embeddings.dims3().map_err(|e| {
        Error::Computation(format!("unexpected embedding tensor shape: {e}"))
    })?;
    let pooled = embeddings.mean(1).map_err(|e| {
        Error::Computation(format!("failed to pool token embeddings: {e}"))
    })?;
    pooled.to_vec2::<f32>().map_err(|e| {
        Error::Computation(format!("failed to convert tensor to f32: {e}"))
    })
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
