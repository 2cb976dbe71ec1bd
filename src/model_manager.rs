use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::info;

use crate::{
    embedding::{Embedder, mean_pool},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const DEFAULT_DIMENSION: usize = 128;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Manages the ColBERT model lifecycle, loading it on first use.
///
/// The same loaded model backs both dense embeddings (mean-pooled token
/// vectors, via [`Embedder`]) and late-interaction reranking.
pub struct ModelManager {
    model: Mutex<Option<ColBERT>>,
    model_id: String,
    dimension: usize,
}

impl ModelManager {
    /// Creates a manager for `model_id` producing `dimension`-wide pooled
    /// vectors. Nothing is downloaded or loaded until the first encode.
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: Mutex::new(None),
            model_id: model_id.into(),
            dimension,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    fn with_model<T>(
        &self,
        f: impl FnOnce(&mut ColBERT) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.model.lock().map_err(|_| {
            Error::Computation("model lock poisoned".to_string())
        })?;

        if guard.is_none() {
            info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::Computation(format!(
                        "failed to load model {}: {e}",
                        self.model_id
                    ))
                })?;
            *guard = Some(colbert);
        }

        let Some(model) = guard.as_mut() else {
            return Err(Error::Computation("model not loaded".to_string()));
        };
        f(model)
    }

    /// Encodes document texts into ColBERT token-level embeddings of shape
    /// `[batch, tokens, dimension]`.
    pub fn encode_documents(&self, texts: &[String]) -> Result<Tensor> {
        self.with_model(|model| {
            model.encode(texts, false).map_err(|e| {
                Error::Computation(format!("document encoding failed: {e}"))
            })
        })
    }

    /// Encodes a query string into ColBERT token-level embeddings.
    ///
    /// Returns a 2D tensor of shape `[Q, D]` where Q is the number of query
    /// tokens and D is the embedding dimension.
    pub fn encode_query(&self, query: &str) -> Result<Tensor> {
        let embeddings = self.with_model(|model| {
            model.encode(&[query.to_string()], true).map_err(|e| {
                Error::Computation(format!("query encoding failed: {e}"))
            })
        })?;
        // Squeeze the batch dimension: [1, Q, D] -> [Q, D]
        embeddings.squeeze(0).map_err(|e| {
            Error::Computation(format!("unexpected query tensor shape: {e}"))
        })
    }
}

impl Embedder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let pooled = pool_each(texts, |one| self.encode_documents(one))?;
        if pooled.len() != texts.len() {
            return Err(Error::Computation(format!(
                "model returned {} vectors for {} texts",
                pooled.len(),
                texts.len()
            )));
        }
        if let Some(bad) = pooled.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::Computation(format!(
                "model {} produced {}-dimensional vectors, configured for {}",
                self.model_id,
                bad.len(),
                self.dimension
            )));
        }
        Ok(pooled)
    }
}

/// Mean-pool each text's token embeddings, encoding one text per call.
///
/// A padded batch would average pad positions into every shorter text, so
/// the same text would pool differently depending on its batch mates.
fn pool_each(
    texts: &[String],
    mut encode: impl FnMut(&[String]) -> Result<Tensor>,
) -> Result<Vec<Vec<f32>>> {
    let mut pooled = Vec::with_capacity(texts.len());
    for text in texts {
        let embeddings = encode(std::slice::from_ref(text))?;
        let mut vectors = mean_pool(&embeddings)?;
        if vectors.len() != 1 {
            return Err(Error::Computation(format!(
                "model returned {} vectors for one text",
                vectors.len()
            )));
        }
        pooled.append(&mut vectors);
    }
    Ok(pooled)
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}
