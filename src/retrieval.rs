use std::{collections::HashMap, fmt, str::FromStr};

use tracing::{debug, warn};

use crate::{
    chunk::{Candidate, ChunkId, sort_by_score_desc},
    embedding::Embedder,
    error::{Error, Result},
    lexical_index::LexicalIndex,
    reranker::PairwiseScorer,
    vector_index::SharedVectorIndex,
};

pub const DEFAULT_TOP_K_LEXICAL: usize = 5;
pub const DEFAULT_TOP_K_VECTOR: usize = 5;
pub const DEFAULT_TOP_N: usize = 5;

/// How pairwise rerank scores combine with fused scores.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RerankPolicy {
    /// The rerank score becomes the final score.
    #[default]
    Replace,
    /// `weight * rerank + (1 - weight) * fused`, with `weight` in `[0, 1]`.
    Blend { weight: f32 },
}

impl RerankPolicy {
    fn combine(self, fused: f32, rerank: f32) -> f32 {
        match self {
            RerankPolicy::Replace => rerank,
            RerankPolicy::Blend { weight } => {
                weight * rerank + (1.0 - weight) * fused
            }
        }
    }
}

impl FromStr for RerankPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "replace" {
            return Ok(RerankPolicy::Replace);
        }
        let Some(weight) = s.strip_prefix("blend:") else {
            return Err(Error::Config(format!("unknown rerank policy: {s}")));
        };
        let weight: f32 = weight.trim().parse().map_err(|_| {
            Error::Config(format!("invalid blend weight: {weight}"))
        })?;
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::Config(format!(
                "blend weight must be within [0, 1], got {weight}"
            )));
        }
        Ok(RerankPolicy::Blend { weight })
    }
}

impl fmt::Display for RerankPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RerankPolicy::Replace => f.write_str("replace"),
            RerankPolicy::Blend { weight } => write!(f, "blend:{weight}"),
        }
    }
}

/// Per-query retrieval knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveParams {
    pub top_k_lexical: usize,
    pub top_k_vector: usize,
    pub top_n: usize,
    pub rerank: bool,
}

impl Default for RetrieveParams {
    fn default() -> Self {
        Self {
            top_k_lexical: DEFAULT_TOP_K_LEXICAL,
            top_k_vector: DEFAULT_TOP_K_VECTOR,
            top_n: DEFAULT_TOP_N,
            rerank: false,
        }
    }
}

/// Resolves a chunk id to the text the reranker should read.
pub trait ChunkTextSource: Send + Sync {
    fn chunk_text(&self, chunk_id: ChunkId) -> Result<Option<String>>;
}

impl ChunkTextSource for LexicalIndex {
    fn chunk_text(&self, chunk_id: ChunkId) -> Result<Option<String>> {
        Ok(self.get(chunk_id)?.map(|chunk| chunk.text))
    }
}

/// Hybrid lexical + vector retrieval with optional reranking.
///
/// Every collaborator is optional except the embedder; a missing or failing
/// branch contributes no candidates and the query proceeds with the rest.
pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    lexical: Option<&'a LexicalIndex>,
    vectors: Option<&'a SharedVectorIndex>,
    reranker: Option<&'a dyn PairwiseScorer>,
    texts: Option<&'a dyn ChunkTextSource>,
    policy: RerankPolicy,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self {
            embedder,
            lexical: None,
            vectors: None,
            reranker: None,
            texts: None,
            policy: RerankPolicy::default(),
        }
    }

    pub fn with_lexical(mut self, lexical: &'a LexicalIndex) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn with_vectors(mut self, vectors: &'a SharedVectorIndex) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_reranker(
        mut self,
        reranker: &'a dyn PairwiseScorer,
        texts: &'a dyn ChunkTextSource,
    ) -> Self {
        self.reranker = Some(reranker);
        self.texts = Some(texts);
        self
    }

    pub fn with_policy(mut self, policy: RerankPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rank chunks for `query`, best first, at most `params.top_n`.
    ///
    /// A blank query is the only error. Unavailable indexes and model
    /// failures are logged and degrade to fewer (possibly zero) results.
    pub fn retrieve(
        &self,
        query: &str,
        params: &RetrieveParams,
    ) -> Result<Vec<Candidate>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query is empty".to_string()));
        }
        if params.top_n == 0 {
            return Ok(Vec::new());
        }

        let (lexical, vector) = rayon::join(
            || self.lexical_branch(query, params.top_k_lexical),
            || self.vector_branch(query, params.top_k_vector),
        );
        debug!(
            lexical = lexical.len(),
            vector = vector.len(),
            "retrieval branches finished"
        );

        let mut candidates = fuse(&lexical, &vector);
        if params.rerank {
            candidates = self.rerank(query, candidates);
        }

        sort_by_score_desc(&mut candidates);
        candidates.truncate(params.top_n);
        Ok(candidates)
    }

    fn lexical_branch(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        let Some(lexical) = self.lexical else {
            warn!("lexical index unavailable, skipping");
            return Vec::new();
        };
        match lexical.search(query, top_k) {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| Candidate::new(hit.chunk_id, hit.score))
                .collect(),
            Err(e) => {
                warn!("lexical search failed: {e}");
                Vec::new()
            }
        }
    }

    fn vector_branch(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        let Some(vectors) = self.vectors else {
            warn!("vector index unavailable, skipping");
            return Vec::new();
        };
        if top_k == 0 {
            return Vec::new();
        }
        let embedding = match self.embedder.encode(query) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("query embedding failed: {e}");
                return Vec::new();
            }
        };
        match vectors.search(&embedding, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("vector search failed: {e}");
                Vec::new()
            }
        }
    }

    /// Rescore `fused` with the pairwise model.
    ///
    /// Candidates whose text cannot be resolved, or is blank, are dropped,
    /// as are candidates the model scores as NaN or infinite. If nothing
    /// could be scored, `fused` is returned unchanged.
    fn rerank(&self, query: &str, fused: Vec<Candidate>) -> Vec<Candidate> {
        if fused.is_empty() {
            return fused;
        }
        let (Some(reranker), Some(texts)) = (self.reranker, self.texts) else {
            warn!("reranking requested but no reranker configured");
            return fused;
        };

        let mut resolved = Vec::with_capacity(fused.len());
        let mut passages = Vec::with_capacity(fused.len());
        for candidate in &fused {
            match texts.chunk_text(candidate.chunk_id) {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    resolved.push(*candidate);
                    passages.push(text);
                }
                Ok(_) => debug!(
                    chunk_id = candidate.chunk_id,
                    "no text for candidate, dropping from rerank"
                ),
                Err(e) => warn!(
                    chunk_id = candidate.chunk_id,
                    "failed to load candidate text: {e}"
                ),
            }
        }
        if resolved.is_empty() {
            warn!("no candidate text resolved, keeping fused ranking");
            return fused;
        }

        match reranker.score(query, &passages) {
            Ok(scores) if scores.len() == resolved.len() => {
                let reranked = self.apply_scores(resolved, scores);
                if reranked.is_empty() {
                    warn!("no usable rerank scores, keeping fused ranking");
                    return fused;
                }
                reranked
            }
            Ok(scores) => {
                warn!(
                    expected = resolved.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores, keeping fused ranking"
                );
                fused
            }
            Err(e) => {
                warn!("reranking failed, keeping fused ranking: {e}");
                fused
            }
        }
    }

    fn apply_scores(
        &self,
        resolved: Vec<Candidate>,
        scores: Vec<f32>,
    ) -> Vec<Candidate> {
        resolved
            .into_iter()
            .zip(scores)
            .filter_map(|(candidate, score)| {
                if !score.is_finite() {
                    warn!(
                        chunk_id = candidate.chunk_id,
                        "reranker returned a non-finite score, dropping"
                    );
                    return None;
                }
                Some(Candidate::new(
                    candidate.chunk_id,
                    self.policy.combine(candidate.score, score),
                ))
            })
            .collect()
    }
}

/// Merge lexical and vector hits by chunk id, keeping the larger score.
///
/// Lexical hits seed the table; each vector hit then sets its chunk to
/// `max(existing or 0, vector score)`. Output keeps first-seen order.
pub fn fuse(lexical: &[Candidate], vector: &[Candidate]) -> Vec<Candidate> {
    let mut fused: Vec<Candidate> =
        Vec::with_capacity(lexical.len() + vector.len());
    let mut slots: HashMap<ChunkId, usize> = HashMap::new();

    for hit in lexical {
        match slots.get(&hit.chunk_id) {
            Some(&slot) => fused[slot].score = hit.score,
            None => {
                slots.insert(hit.chunk_id, fused.len());
                fused.push(*hit);
            }
        }
    }

    for hit in vector {
        match slots.get(&hit.chunk_id) {
            Some(&slot) => {
                fused[slot].score = fused[slot].score.max(hit.score);
            }
            None => {
                slots.insert(hit.chunk_id, fused.len());
                fused.push(Candidate::new(hit.chunk_id, hit.score.max(0.0)));
            }
        }
    }

    fused
}
