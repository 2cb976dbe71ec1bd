use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    chunk::{Chunk, ChunkId, EmbeddedChunk},
    embedding_cache::EmbeddingCache,
    error::Result,
    lexical_index::LexicalIndex,
    vector_index::{Metric, SharedVectorIndex, VectorIndex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Full,
    Incremental,
}

/// What a call to [`Indexer::build`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub mode: BuildMode,
    /// Chunks passed in, before deduplication.
    pub received: usize,
    /// Chunks written to both indexes.
    pub indexed: usize,
    /// Chunks skipped because they were already indexed.
    pub already_indexed: usize,
    pub vector_rows: usize,
    pub lexical_chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub requested: usize,
    pub vector_rows_removed: usize,
}

/// Writes chunks into the lexical and vector indexes together.
pub struct Indexer<'a> {
    cache: &'a EmbeddingCache,
    lexical: &'a LexicalIndex,
    vectors: &'a SharedVectorIndex,
    metric: Metric,
}

impl<'a> Indexer<'a> {
    pub fn new(
        cache: &'a EmbeddingCache,
        lexical: &'a LexicalIndex,
        vectors: &'a SharedVectorIndex,
        metric: Metric,
    ) -> Self {
        Self {
            cache,
            lexical,
            vectors,
            metric,
        }
    }

    /// Index `chunks`.
    ///
    /// With `reindex_all`, `chunks` is taken as the complete corpus and both
    /// indexes are rebuilt from it. Otherwise only chunks missing from the
    /// vector index are embedded and added. `progress` is called with the
    /// number of chunks embedded after each batch.
    pub fn build(
        &self,
        chunks: &[Chunk],
        reindex_all: bool,
        progress: &mut dyn FnMut(usize),
    ) -> Result<BuildReport> {
        let received = chunks.len();
        let unique = dedupe_keep_last(chunks);

        if reindex_all {
            self.rebuild(received, &unique, progress)
        } else {
            self.extend(received, unique, progress)
        }
    }

    fn rebuild(
        &self,
        received: usize,
        chunks: &[Chunk],
        progress: &mut dyn FnMut(usize),
    ) -> Result<BuildReport> {
        info!(chunks = chunks.len(), "rebuilding indexes");

        let embedded = self.embed(chunks, progress);
        // Build the vectors before touching the lexical index so an empty
        // corpus fails without clearing anything.
        let index = VectorIndex::build(&embedded, self.metric)?;
        let lexical_chunks = self.lexical.rebuild_all(chunks)? as u64;
        let vector_rows = index.len();
        self.vectors.replace(index)?;

        Ok(BuildReport {
            mode: BuildMode::Full,
            received,
            indexed: chunks.len(),
            already_indexed: 0,
            vector_rows,
            lexical_chunks,
        })
    }

    fn extend(
        &self,
        received: usize,
        chunks: Vec<Chunk>,
        progress: &mut dyn FnMut(usize),
    ) -> Result<BuildReport> {
        let unique = chunks.len();
        let fresh: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !self.vectors.contains(c.id))
            .collect();
        let already_indexed = unique - fresh.len();
        info!(new = fresh.len(), already_indexed, "updating indexes");

        if !fresh.is_empty() {
            let embedded = self.embed(&fresh, progress);
            // Vector membership marks a chunk as indexed, so it is committed
            // last.
            self.lexical.upsert(&fresh)?;
            self.vectors.append(&embedded)?;
        }

        Ok(BuildReport {
            mode: BuildMode::Incremental,
            received,
            indexed: fresh.len(),
            already_indexed,
            vector_rows: self.vectors.len(),
            lexical_chunks: self.lexical.len(),
        })
    }

    fn embed(
        &self,
        chunks: &[Chunk],
        progress: &mut dyn FnMut(usize),
    ) -> Vec<EmbeddedChunk> {
        let mut embedded = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.cache.batch_size()) {
            embedded.extend(self.cache.encode_all(batch));
            progress(batch.len());
        }
        embedded
    }

    /// Remove chunks from both indexes and the embedding cache. Ids that are
    /// not indexed are ignored.
    pub fn remove(&self, chunk_ids: &[ChunkId]) -> Result<RemoveReport> {
        self.lexical.remove(chunk_ids)?;
        let vector_rows_removed = self.vectors.remove(chunk_ids)?;
        if let Err(e) = self.cache.evict(chunk_ids) {
            warn!("failed to evict cached embeddings: {e}");
        }
        info!(
            requested = chunk_ids.len(),
            vector_rows_removed, "removed chunks"
        );

        Ok(RemoveReport {
            requested: chunk_ids.len(),
            vector_rows_removed,
        })
    }
}

/// Drop repeated ids, keeping each id's last occurrence in its position.
fn dedupe_keep_last(chunks: &[Chunk]) -> Vec<Chunk> {
    let mut seen = HashSet::with_capacity(chunks.len());
    let mut unique: Vec<Chunk> = chunks
        .iter()
        .rev()
        .filter(|c| seen.insert(c.id))
        .cloned()
        .collect();
    unique.reverse();
    unique
}
