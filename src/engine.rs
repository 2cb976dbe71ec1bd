use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    chunk::{Candidate, Chunk, ChunkId, RankedChunk},
    data_dir::DataDir,
    embedding::{Embedder, HashingEmbedder},
    embedding_cache::EmbeddingCache,
    error::{Error, Result},
    indexer::{BuildReport, Indexer, RemoveReport},
    lexical_index::LexicalIndex,
    model_manager::ModelManager,
    persistence::VectorStore,
    reranker::{MaxSimReranker, PairwiseScorer},
    retrieval::{RetrieveParams, Retriever},
    settings::{EmbedderKind, Settings},
    vector_index::SharedVectorIndex,
};

/// Index and storage counters.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub data_dir: PathBuf,
    pub model: String,
    pub lexical_chunks: u64,
    pub vector_rows: usize,
    pub vector_dimension: Option<usize>,
    pub vector_metric: Option<String>,
    /// `None` when the cache database is unavailable.
    pub cached_embeddings: Option<usize>,
}

/// Every index and model handle, opened once and shared by all requests.
pub struct Engine {
    data_dir: DataDir,
    settings: Settings,
    cache: EmbeddingCache,
    lexical: Option<LexicalIndex>,
    vectors: SharedVectorIndex,
    reranker: Option<Arc<dyn PairwiseScorer>>,
}

impl Engine {
    /// Open the engine with the embedder selected in `settings`.
    ///
    /// The ColBERT embedder also provides the reranker; the hashing
    /// embedder runs without one.
    pub fn open(data_dir: DataDir, settings: Settings) -> Result<Self> {
        let (embedder, reranker): (
            Arc<dyn Embedder>,
            Option<Arc<dyn PairwiseScorer>>,
        ) = match settings.embedder {
            EmbedderKind::Colbert => {
                let model = Arc::new(ModelManager::new(
                    settings.model_id.clone(),
                    settings.embed_dim,
                ));
                let reranker: Arc<dyn PairwiseScorer> =
                    Arc::new(MaxSimReranker::new(Arc::clone(&model)));
                let embedder: Arc<dyn Embedder> = model;
                (embedder, Some(reranker))
            }
            EmbedderKind::Hashing => {
                let embedder: Arc<dyn Embedder> =
                    Arc::new(HashingEmbedder::new(settings.embed_dim));
                (embedder, None)
            }
        };
        Self::with_components(data_dir, settings, embedder, reranker)
    }

    /// Open the engine around caller-supplied models.
    pub fn with_components(
        data_dir: DataDir,
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn PairwiseScorer>>,
    ) -> Result<Self> {
        let cache = EmbeddingCache::open(
            &data_dir.embeddings_db(),
            embedder,
            settings.cache_options(),
        );

        let lexical = match LexicalIndex::open(&data_dir.lexical_dir()?) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("lexical index unavailable: {e}");
                None
            }
        };

        let vectors = SharedVectorIndex::open(
            VectorStore::new(data_dir.vector_dir()?),
            settings.metric,
        );

        Ok(Self {
            data_dir,
            settings,
            cache,
            lexical,
            vectors,
            reranker,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    fn lexical(&self) -> Result<&LexicalIndex> {
        self.lexical.as_ref().ok_or_else(|| {
            Error::IndexUnavailable("lexical index could not be opened".into())
        })
    }

    fn indexer(&self) -> Result<Indexer<'_>> {
        Ok(Indexer::new(
            &self.cache,
            self.lexical()?,
            &self.vectors,
            self.settings.metric,
        ))
    }

    /// Index chunks. See [`Indexer::build`].
    pub fn build_indexes(
        &self,
        chunks: &[Chunk],
        reindex_all: bool,
    ) -> Result<BuildReport> {
        self.build_indexes_with_progress(chunks, reindex_all, &mut |_| {})
    }

    pub fn build_indexes_with_progress(
        &self,
        chunks: &[Chunk],
        reindex_all: bool,
        progress: &mut dyn FnMut(usize),
    ) -> Result<BuildReport> {
        self.indexer()?.build(chunks, reindex_all, progress)
    }

    pub fn remove_chunks(&self, chunk_ids: &[ChunkId]) -> Result<RemoveReport> {
        self.indexer()?.remove(chunk_ids)
    }

    /// Hybrid retrieval over both indexes. Reranking only happens when
    /// `params.rerank` is set and a reranker is available.
    pub fn retrieve(
        &self,
        query: &str,
        params: &RetrieveParams,
    ) -> Result<Vec<Candidate>> {
        let mut retriever = Retriever::new(self.cache.embedder().as_ref())
            .with_vectors(&self.vectors)
            .with_policy(self.settings.rerank_policy);
        if let Some(lexical) = &self.lexical {
            retriever = retriever.with_lexical(lexical);
            if let Some(reranker) = &self.reranker {
                retriever = retriever.with_reranker(reranker.as_ref(), lexical);
            }
        }
        retriever.retrieve(query, params)
    }

    pub fn chunk(&self, chunk_id: ChunkId) -> Result<Option<Chunk>> {
        self.lexical()?.get(chunk_id)
    }

    /// Load the chunks behind `candidates`, keeping rank order. Candidates
    /// whose chunk is gone are skipped.
    pub fn context(&self, candidates: &[Candidate]) -> Result<Vec<RankedChunk>> {
        let lexical = self.lexical()?;
        let mut ranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match lexical.get(candidate.chunk_id)? {
                Some(chunk) => ranked.push(RankedChunk {
                    chunk,
                    score: candidate.score,
                }),
                None => debug!(
                    chunk_id = candidate.chunk_id,
                    "candidate chunk not stored, skipping"
                ),
            }
        }
        Ok(ranked)
    }

    pub fn status(&self) -> Result<Status> {
        let snapshot = self.vectors.snapshot();
        let cached_embeddings = if self.cache.is_available() {
            Some(self.cache.len()?)
        } else {
            None
        };

        Ok(Status {
            data_dir: self.data_dir.root().to_path_buf(),
            model: self.cache.embedder().model_id().to_string(),
            lexical_chunks: self.lexical.as_ref().map_or(0, |l| l.len()),
            vector_rows: snapshot.as_ref().map_or(0, |s| s.len()),
            vector_dimension: snapshot.as_ref().map(|s| s.dimension()),
            vector_metric: snapshot.as_ref().map(|s| s.metric().to_string()),
            cached_embeddings,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .field("vectors", &self.vectors)
            .field("reranker", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashing_settings() -> Settings {
        Settings {
            embedder: EmbedderKind::Hashing,
            embed_dim: 128,
            ..Settings::default()
        }
    }

    fn chunk(id: ChunkId, text: &str) -> Chunk {
        Chunk {
            id,
            document_id: 1,
            page_number: id,
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn hashing_engine_has_no_reranker() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let engine = Engine::open(data_dir, hashing_settings()).unwrap();
        assert!(engine.reranker.is_none());
        assert_eq!(engine.status().unwrap().model, "hashing-bow-128");
    }

    #[test]
    fn status_before_indexing() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let engine = Engine::open(data_dir, hashing_settings()).unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.lexical_chunks, 0);
        assert_eq!(status.vector_rows, 0);
        assert_eq!(status.vector_dimension, None);
        assert_eq!(status.cached_embeddings, Some(0));
    }

    #[test]
    fn context_follows_rank_order_and_skips_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let engine = Engine::open(data_dir, hashing_settings()).unwrap();
        engine
            .build_indexes(&[chunk(1, "alpha"), chunk(2, "beta")], false)
            .unwrap();

        let ranked = engine
            .context(&[
                Candidate::new(2, 0.9),
                Candidate::new(5, 0.5),
                Candidate::new(1, 0.1),
            ])
            .unwrap();
        let ids: Vec<_> = ranked.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(ranked[0].score, 0.9);
    }

    #[test]
    fn status_after_indexing() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let engine = Engine::open(data_dir, hashing_settings()).unwrap();
        engine
            .build_indexes(&[chunk(1, "alpha"), chunk(2, "beta")], true)
            .unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.lexical_chunks, 2);
        assert_eq!(status.vector_rows, 2);
        assert_eq!(status.vector_dimension, Some(128));
        assert_eq!(status.vector_metric.as_deref(), Some("ip"));
        assert_eq!(status.cached_embeddings, Some(2));
        assert_eq!(engine.chunk(2).unwrap().unwrap().text, "beta");
    }
}
