use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, RwLock},
};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    chunk::{Candidate, ChunkId, EmbeddedChunk},
    embedding::normalize,
    error::{Error, Result},
    persistence::VectorStore,
};

/// How a query vector is compared against stored rows.
///
/// Both variants produce scores where higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// Inner product of normalized vectors, i.e. cosine similarity.
    #[default]
    InnerProduct,
    /// Squared Euclidean distance `d` between normalized vectors, reported
    /// as `1 / (1 + d)`.
    L2,
}

impl Metric {
    pub(crate) fn code(self) -> u32 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Metric::InnerProduct),
            1 => Some(Metric::L2),
            _ => None,
        }
    }

    fn score(self, query: &[f32], row: &[f32]) -> f32 {
        match self {
            Metric::InnerProduct => {
                query.iter().zip(row).map(|(a, b)| a * b).sum()
            }
            Metric::L2 => {
                let distance: f32 = query
                    .iter()
                    .zip(row)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                1.0 / (1.0 + distance)
            }
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" | "inner_product" | "cosine" => Ok(Metric::InnerProduct),
            "l2" => Ok(Metric::L2),
            other => Err(Error::Config(format!("unknown vector metric: {other}"))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::InnerProduct => f.write_str("ip"),
            Metric::L2 => f.write_str("l2"),
        }
    }
}

/// Outcome of [`VectorIndex::append`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStats {
    /// New rows added after the previous `len()`.
    pub appended: usize,
    /// Existing rows whose vector was overwritten in place.
    pub replaced: usize,
    /// Chunks without a usable embedding.
    pub skipped: usize,
}

/// Flat, exhaustively searched vector index.
///
/// Rows form a dense arena of normalized vectors; `ids[row]` is the chunk
/// stored at that row. Row numbers never leave this module's callers in the
/// retrieval layer: searches report chunk ids.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
    ids: Vec<ChunkId>,
    rows: HashMap<ChunkId, usize>,
}

impl VectorIndex {
    /// An index with no rows.
    pub fn empty(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
            ids: Vec::new(),
            rows: HashMap::new(),
        }
    }

    /// Build an index from every chunk that carries an embedding.
    ///
    /// The dimension is taken from the first embedded chunk; chunks without
    /// an embedding, or with a different dimension, are skipped. Fails with
    /// [`Error::EmptyIndex`] if nothing qualifies.
    pub fn build(chunks: &[EmbeddedChunk], metric: Metric) -> Result<Self> {
        let dimension = chunks
            .iter()
            .filter_map(|c| c.embedding.as_ref())
            .map(Vec::len)
            .find(|&len| len > 0)
            .ok_or(Error::EmptyIndex)?;

        let mut index = Self::empty(dimension, metric);
        let stats = index.append(chunks);
        if index.is_empty() {
            return Err(Error::EmptyIndex);
        }
        info!(
            rows = index.len(),
            dimension,
            skipped = stats.skipped,
            "vector index built"
        );
        Ok(index)
    }

    /// Reassemble an index from its persisted parts.
    ///
    /// `data` must hold exactly `ids.len()` rows of `dimension` values and
    /// `ids` must not repeat.
    pub fn from_parts(
        dimension: usize,
        metric: Metric,
        data: Vec<f32>,
        ids: Vec<ChunkId>,
    ) -> Result<Self> {
        if dimension == 0 && !ids.is_empty() {
            return Err(Error::Validation(
                "vector index has rows but zero dimension".to_string(),
            ));
        }
        if data.len() != dimension * ids.len() {
            return Err(Error::Validation(format!(
                "vector data holds {} values, expected {} rows of {}",
                data.len(),
                ids.len(),
                dimension
            )));
        }

        let mut rows = HashMap::with_capacity(ids.len());
        for (row, &id) in ids.iter().enumerate() {
            if rows.insert(id, row).is_some() {
                return Err(Error::Validation(format!(
                    "chunk {id} mapped to more than one row"
                )));
            }
        }

        Ok(Self {
            dimension,
            metric,
            data,
            ids,
            rows,
        })
    }

    /// Add chunks after the current last row.
    ///
    /// A chunk whose id is already present has its row overwritten instead,
    /// so each id occupies exactly one row.
    pub fn append(&mut self, chunks: &[EmbeddedChunk]) -> AppendStats {
        let mut stats = AppendStats::default();

        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_ref() else {
                debug!(chunk_id = chunk.id(), "no embedding, skipping");
                stats.skipped += 1;
                continue;
            };
            if embedding.len() != self.dimension {
                warn!(
                    chunk_id = chunk.id(),
                    expected = self.dimension,
                    got = embedding.len(),
                    "embedding dimension mismatch, skipping"
                );
                stats.skipped += 1;
                continue;
            }

            let mut vector = embedding.clone();
            normalize(&mut vector);

            match self.rows.get(&chunk.id()) {
                Some(&row) => {
                    let start = row * self.dimension;
                    self.data[start..start + self.dimension]
                        .copy_from_slice(&vector);
                    stats.replaced += 1;
                }
                None => {
                    self.rows.insert(chunk.id(), self.ids.len());
                    self.ids.push(chunk.id());
                    self.data.extend_from_slice(&vector);
                    stats.appended += 1;
                }
            }
        }

        stats
    }

    /// Drop the given chunks and compact the remaining rows, preserving
    /// their order. Returns the number of rows removed.
    pub fn remove(&mut self, chunk_ids: &[ChunkId]) -> usize {
        let doomed: HashSet<ChunkId> = chunk_ids
            .iter()
            .copied()
            .filter(|id| self.rows.contains_key(id))
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let mut data = Vec::with_capacity(self.data.len());
        let mut ids = Vec::with_capacity(self.ids.len() - doomed.len());
        for (row, &id) in self.ids.iter().enumerate() {
            if doomed.contains(&id) {
                continue;
            }
            let start = row * self.dimension;
            data.extend_from_slice(&self.data[start..start + self.dimension]);
            ids.push(id);
        }

        self.rows = ids.iter().enumerate().map(|(row, &id)| (id, row)).collect();
        self.data = data;
        self.ids = ids;
        doomed.len()
    }

    /// Exhaustively score every row against `query` and return the best
    /// `top_k` chunks, highest score first. Ties keep row order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Candidate>> {
        if query.len() != self.dimension {
            return Err(Error::Validation(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.dimension
            )));
        }
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let metric = self.metric;
        let scores: Vec<f32> = self
            .data
            .par_chunks_exact(self.dimension)
            .map(|row| metric.score(&query, row))
            .collect();

        // Rows holding NaN can never rank.
        let mut order: Vec<usize> =
            (0..scores.len()).filter(|&row| !scores[row].is_nan()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        order.truncate(top_k);

        Ok(order
            .into_iter()
            .map(|row| Candidate::new(self.ids[row], scores[row]))
            .collect())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dense row -> chunk id table; `id_map()[row]` is the chunk at `row`.
    pub fn id_map(&self) -> &[ChunkId] {
        &self.ids
    }

    /// Row-major vector storage.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn contains(&self, chunk_id: ChunkId) -> bool {
        self.rows.contains_key(&chunk_id)
    }

    /// The normalized vector stored for `chunk_id`.
    pub fn vector(&self, chunk_id: ChunkId) -> Option<&[f32]> {
        let row = *self.rows.get(&chunk_id)?;
        let start = row * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }
}

/// The process-wide vector index: one persisted [`VectorIndex`] shared by
/// readers and serialized writers.
///
/// Writers copy the current index, modify the copy, persist it, and only
/// then publish it. Readers therefore observe either the previous or the
/// new committed state, and the in-memory index never runs ahead of disk.
pub struct SharedVectorIndex {
    current: RwLock<Option<Arc<VectorIndex>>>,
    write_lock: Mutex<()>,
    store: VectorStore,
    metric: Metric,
}

impl SharedVectorIndex {
    /// Load whatever the store holds. A missing or unreadable index leaves
    /// the handle empty; the next build replaces it.
    pub fn open(store: VectorStore, metric: Metric) -> Self {
        let current = match store.load() {
            Ok(Some(index)) => {
                if index.metric() != metric {
                    info!(
                        persisted = %index.metric(),
                        configured = %metric,
                        "keeping persisted vector metric until next rebuild"
                    );
                }
                info!(rows = index.len(), "vector index loaded");
                Some(Arc::new(index))
            }
            Ok(None) => {
                debug!(dir = %store.dir().display(), "no vector index on disk");
                None
            }
            Err(e) => {
                warn!("vector index unavailable: {e}");
                None
            }
        };

        Self {
            current: RwLock::new(current),
            write_lock: Mutex::new(()),
            store,
            metric,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// The committed index, if any.
    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    pub fn contains(&self, chunk_id: ChunkId) -> bool {
        self.snapshot().is_some_and(|index| index.contains(chunk_id))
    }

    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Search the committed index.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Candidate>> {
        let index = self.snapshot().ok_or_else(|| {
            Error::IndexUnavailable("vector index has not been built".into())
        })?;
        index.search(query, top_k)
    }

    /// Append chunks to the committed index, building it first if none
    /// exists yet.
    pub fn append(&self, chunks: &[EmbeddedChunk]) -> Result<AppendStats> {
        let _guard = self.lock_writer()?;

        let (next, stats) = match self.snapshot() {
            Some(current) => {
                let mut next = VectorIndex::clone(&current);
                let stats = next.append(chunks);
                (next, stats)
            }
            None => {
                let next = VectorIndex::build(chunks, self.metric)?;
                let stats = AppendStats {
                    appended: next.len(),
                    replaced: 0,
                    skipped: chunks.len() - next.len(),
                };
                (next, stats)
            }
        };

        if stats.appended + stats.replaced > 0 {
            self.commit(next)?;
        }
        Ok(stats)
    }

    /// Replace the committed index wholesale.
    pub fn replace(&self, index: VectorIndex) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.commit(index)
    }

    /// Remove chunks from the committed index. Returns the number of rows
    /// removed.
    pub fn remove(&self, chunk_ids: &[ChunkId]) -> Result<usize> {
        let _guard = self.lock_writer()?;
        let Some(current) = self.snapshot() else {
            return Ok(0);
        };

        let mut next = VectorIndex::clone(&current);
        let removed = next.remove(chunk_ids);
        if removed > 0 {
            self.commit(next)?;
        }
        Ok(removed)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| {
            Error::IndexUnavailable("vector writer lock poisoned".into())
        })
    }

    fn commit(&self, index: VectorIndex) -> Result<()> {
        self.store.save(&index)?;
        let mut current = self.current.write().map_err(|_| {
            Error::IndexUnavailable("vector index lock poisoned".into())
        })?;
        *current = Some(Arc::new(index));
        Ok(())
    }
}

impl fmt::Debug for SharedVectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVectorIndex")
            .field("rows", &self.len())
            .field("metric", &self.metric)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::chunk::Chunk;

    fn embedded(id: ChunkId, embedding: Option<Vec<f32>>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id,
                document_id: 1,
                page_number: 1,
                chunk_index: id,
                text: format!("chunk {id}"),
            },
            embedding,
        }
    }

    fn e(id: ChunkId, v: &[f32]) -> EmbeddedChunk {
        embedded(id, Some(v.to_vec()))
    }

    fn ids(hits: &[Candidate]) -> Vec<ChunkId> {
        hits.iter().map(|h| h.chunk_id).collect()
    }

    #[test]
    fn build_normalizes_and_maps_rows() {
        let index = VectorIndex::build(
            &[e(10, &[3.0, 4.0]), e(20, &[0.0, 2.0])],
            Metric::InnerProduct,
        )
        .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), 2);
        assert_eq!(index.id_map(), &[10, 20]);
        let v = index.vector(10).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(index.vector(20).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn build_skips_chunks_without_embeddings() {
        let index = VectorIndex::build(
            &[embedded(1, None), e(2, &[1.0, 0.0]), e(3, &[1.0, 0.0, 0.0])],
            Metric::InnerProduct,
        )
        .unwrap();
        assert_eq!(index.id_map(), &[2]);
    }

    #[test]
    fn build_without_embeddings_is_empty_index_error() {
        let err = VectorIndex::build(
            &[embedded(1, None), embedded(2, Some(vec![]))],
            Metric::InnerProduct,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));

        let err = VectorIndex::build(&[], Metric::InnerProduct).unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));
    }

    #[test]
    fn append_extends_after_existing_rows() {
        let mut index =
            VectorIndex::build(&[e(1, &[1.0, 0.0])], Metric::InnerProduct)
                .unwrap();
        let stats = index.append(&[e(2, &[0.0, 1.0]), e(3, &[1.0, 1.0])]);

        assert_eq!(stats.appended, 2);
        assert_eq!(index.id_map(), &[1, 2, 3]);
        assert_eq!(index.data().len(), 3 * 2);
    }

    #[test]
    fn append_existing_id_replaces_in_place() {
        let mut index = VectorIndex::build(
            &[e(1, &[1.0, 0.0]), e(2, &[0.0, 1.0])],
            Metric::InnerProduct,
        )
        .unwrap();
        let stats = index.append(&[e(1, &[0.0, 5.0])]);

        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.appended, 0);
        assert_eq!(index.id_map(), &[1, 2]);
        assert_eq!(index.vector(1).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn zero_vector_is_kept_unnormalized() {
        let index = VectorIndex::build(
            &[e(1, &[1.0, 0.0]), e(2, &[0.0, 0.0])],
            Metric::InnerProduct,
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(ids(&hits), vec![1, 2]);
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn remove_compacts_rows() {
        let mut index = VectorIndex::build(
            &[e(1, &[1.0, 0.0]), e(2, &[0.0, 1.0]), e(3, &[1.0, 1.0])],
            Metric::InnerProduct,
        )
        .unwrap();

        assert_eq!(index.remove(&[2, 99]), 1);
        assert_eq!(index.id_map(), &[1, 3]);
        assert_eq!(index.data().len(), 4);
        assert!(!index.contains(2));
        assert_eq!(index.vector(1).unwrap(), &[1.0, 0.0]);
        assert!(!ids(&index.search(&[0.0, 1.0], 10).unwrap()).contains(&2));
        assert_eq!(index.remove(&[2]), 0);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let index = VectorIndex::build(
            &[e(1, &[1.0, 0.0]), e(2, &[0.0, 1.0]), e(3, &[1.0, 1.0])],
            Metric::InnerProduct,
        )
        .unwrap();

        let hits = index.search(&[2.0, 0.1], 2).unwrap();
        assert_eq!(ids(&hits), vec![1, 3]);
        assert!(hits[0].score <= 1.0 + 1e-6);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn l2_metric_reports_bounded_scores() {
        let index = VectorIndex::build(
            &[e(1, &[1.0, 0.0]), e(2, &[-1.0, 0.0])],
            Metric::L2,
        )
        .unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec![1, 2]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        // Opposite unit vectors are at squared distance 4.
        assert!((hits[1].score - 0.2).abs() < 1e-6);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let index =
            VectorIndex::build(&[e(1, &[1.0, 0.0])], Metric::InnerProduct)
                .unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn from_parts_validates_shape() {
        assert!(
            VectorIndex::from_parts(2, Metric::InnerProduct, vec![1.0], vec![1])
                .is_err()
        );
        assert!(
            VectorIndex::from_parts(
                1,
                Metric::InnerProduct,
                vec![1.0, 1.0],
                vec![7, 7]
            )
            .is_err()
        );
        let index = VectorIndex::from_parts(
            1,
            Metric::InnerProduct,
            vec![1.0, 1.0],
            vec![7, 8],
        )
        .unwrap();
        assert!(index.contains(8));
    }

    #[test]
    fn metric_parses() {
        assert_eq!("ip".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert!("manhattan".parse::<Metric>().is_err());
    }

    fn shared(tmp: &tempfile::TempDir) -> SharedVectorIndex {
        SharedVectorIndex::open(
            VectorStore::new(tmp.path().join("vectors")),
            Metric::InnerProduct,
        )
    }

    #[test]
    fn shared_index_starts_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let index = shared(&tmp);
        assert!(index.snapshot().is_none());
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(Error::IndexUnavailable(_))
        ));
        assert_eq!(index.remove(&[1]).unwrap(), 0);
    }

    #[test]
    fn shared_append_builds_then_extends_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let index = shared(&tmp);

        let err = index.append(&[embedded(1, None)]).unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));

        index.append(&[e(1, &[1.0, 0.0])]).unwrap();
        let stats = index.append(&[e(2, &[0.0, 1.0])]).unwrap();
        assert_eq!(stats.appended, 1);
        assert_eq!(index.len(), 2);

        let reopened = shared(&tmp);
        assert_eq!(reopened.snapshot().unwrap().id_map(), &[1, 2]);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let index = shared(&tmp);
        index.append(&[e(1, &[1.0, 0.0])]).unwrap();

        let before = index.snapshot().unwrap();
        index.append(&[e(2, &[0.0, 1.0])]).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(index.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn shared_remove_persists_compaction() {
        let tmp = tempfile::tempdir().unwrap();
        let index = shared(&tmp);
        index
            .append(&[e(1, &[1.0, 0.0]), e(2, &[0.0, 1.0]), e(3, &[1.0, 1.0])])
            .unwrap();

        assert_eq!(index.remove(&[1]).unwrap(), 1);
        let reopened = shared(&tmp);
        assert_eq!(reopened.snapshot().unwrap().id_map(), &[2, 3]);
    }

    #[test]
    fn concurrent_appends_do_not_lose_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Arc::new(shared(&tmp));
        index.append(&[e(0, &[1.0, 1.0])]).unwrap();

        let handles: Vec<_> = (1..=8u64)
            .map(|id| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    index.append(&[e(id, &[id as f32, 1.0])]).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = index.snapshot().unwrap();
        assert_eq!(snapshot.len(), 9);
        let mut mapped = snapshot.id_map().to_vec();
        mapped.sort_unstable();
        assert_eq!(mapped, (0..=8).collect::<Vec<_>>());
    }

    #[test]
    fn nan_rows_never_rank() {
        let mut data = vec![f32::NAN; 2];
        data.extend([1.0, 0.0, 0.0, 1.0]);
        let index = VectorIndex::from_parts(
            2,
            Metric::InnerProduct,
            data,
            vec![7, 8, 9],
        )
        .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids(&hits), vec![8, 9]);
    }

    fn arb_chunks(
        ids: std::ops::Range<u64>,
    ) -> impl Strategy<Value = Vec<EmbeddedChunk>> {
        let start = ids.start;
        prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), ids.count())
            .prop_map(move |vectors| {
                vectors
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| embedded(start + i as u64, Some(v)))
                    .collect()
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn append_matches_full_build(
            a in arb_chunks(0..5),
            b in arb_chunks(5..9),
            query in prop::collection::vec(-1.0f32..1.0, 4),
        ) {
            let mut incremental =
                VectorIndex::build(&a, Metric::InnerProduct).unwrap();
            incremental.append(&b);

            let all: Vec<EmbeddedChunk> =
                a.iter().chain(b.iter()).cloned().collect();
            let full = VectorIndex::build(&all, Metric::InnerProduct).unwrap();

            let mut inc_ids = incremental.id_map().to_vec();
            let mut full_ids = full.id_map().to_vec();
            inc_ids.sort_unstable();
            full_ids.sort_unstable();
            prop_assert_eq!(inc_ids, full_ids);

            let inc_hits = incremental.search(&query, 9).unwrap();
            let full_hits = full.search(&query, 9).unwrap();
            let inc_scores: Vec<f32> = inc_hits.iter().map(|h| h.score).collect();
            let full_scores: Vec<f32> = full_hits.iter().map(|h| h.score).collect();
            prop_assert_eq!(inc_scores, full_scores);
        }

        #[test]
        fn save_then_load_round_trips(
            rows in prop::collection::hash_map(
                any::<u64>(),
                prop::option::of(prop::collection::vec(-1.0f32..1.0, 4)),
                0..24,
            ),
            metric in prop_oneof![Just(Metric::InnerProduct), Just(Metric::L2)],
        ) {
            let chunks: Vec<EmbeddedChunk> = rows
                .into_iter()
                .map(|(id, v)| embedded(id, v))
                .collect();
            let expected: HashMap<ChunkId, Vec<f32>> = chunks
                .iter()
                .filter_map(|c| Some((c.id(), c.embedding.clone()?)))
                .collect();

            let index = match VectorIndex::build(&chunks, metric) {
                Ok(index) => index,
                Err(Error::EmptyIndex) => {
                    prop_assert!(expected.is_empty());
                    return Ok(());
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            };

            let tmp = tempfile::tempdir().unwrap();
            let store = VectorStore::new(tmp.path());
            store.save(&index).unwrap();
            let loaded = store.load().unwrap().unwrap();

            prop_assert_eq!(&loaded, &index);
            prop_assert_eq!(loaded.metric(), metric);
            let mut loaded_ids = loaded.id_map().to_vec();
            let mut expected_ids: Vec<ChunkId> =
                expected.keys().copied().collect();
            loaded_ids.sort_unstable();
            expected_ids.sort_unstable();
            prop_assert_eq!(loaded_ids, expected_ids);
            for id in expected.keys() {
                prop_assert_eq!(loaded.vector(*id), index.vector(*id));
            }
        }
    }
}
