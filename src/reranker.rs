use std::sync::Arc;

use candle_core::Tensor;
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    model_manager::ModelManager,
};

/// Scores (query, passage) pairs jointly. Higher is more relevant.
///
/// Scores are only comparable within a single call.
pub trait PairwiseScorer: Send + Sync {
    /// Return one score per passage, in input order.
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Late-interaction reranker backed by the ColBERT model.
///
/// The query and every passage are encoded to token-level embeddings, and
/// each passage is scored by MaxSim against the query.
#[derive(Debug, Clone)]
pub struct MaxSimReranker {
    model: Arc<ModelManager>,
}

impl MaxSimReranker {
    pub fn new(model: Arc<ModelManager>) -> Self {
        Self { model }
    }
}

impl PairwiseScorer for MaxSimReranker {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.model.encode_query(query)?;
        let documents = self.model.encode_documents(passages)?;
        let (batch, _tokens, _dimension) =
            documents.dims3().map_err(map_candle_err)?;
        if batch != passages.len() {
            return Err(Error::Computation(format!(
                "model returned {batch} passage encodings for {} passages",
                passages.len()
            )));
        }

        let doc_embeddings = (0..batch)
            .map(|i| documents.get(i).map_err(map_candle_err))
            .collect::<Result<Vec<Tensor>>>()?;

        doc_embeddings
            .par_iter()
            .map(|doc| maxsim(&query_embedding, doc))
            .collect()
    }
}

/// Compute the MaxSim score between a query embedding and a document embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = document tokens, D = embedding dimension
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
pub fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    // [Q, T]
    let sim_matrix = query_embedding
        .matmul(&doc_embedding.t().map_err(map_candle_err)?)
        .map_err(map_candle_err)?;

    // Best document token per query token.
    let row_maxes = sim_matrix.max(1).map_err(map_candle_err)?;

    row_maxes
        .sum_all()
        .map_err(map_candle_err)?
        .to_scalar::<f32>()
        .map_err(map_candle_err)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::Computation(format!("tensor computation error: {e}"))
}
