//! Content-addressed memoization of chunk embeddings.
//!
//! The cache is never a source of truth: every failure to read or write it
//! is logged and the vector is recomputed instead.
//!
//! # Failure policy
//!
//! When the embedding model itself fails for a chunk, [`EmbeddingCache`]
//! returns a zero vector of the expected dimension rather than an error.
//! A zero vector has zero similarity to every query, so the chunk is
//! effectively invisible to vector search while the rest of the batch is
//! still indexed. Callers trade precision for availability here.

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, error, warn};

use crate::{
    chunk::{Chunk, ChunkId, EmbeddedChunk},
    embedding::{Embedder, model_fingerprint},
    error::{Error, Result},
};

const EMBEDDINGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("embeddings");

/// Header size: 8 bytes model fingerprint + 8 bytes text digest + 8 bytes
/// stored-at (unix secs) + 4 bytes dimension.
const HEADER_SIZE: usize = 28;

const ZSTD_LEVEL: i32 = 3;

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Tunables for [`EmbeddingCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Maximum number of texts sent to the model in one call.
    pub batch_size: usize,
    /// Entries older than this are treated as misses. `None` keeps them
    /// forever.
    pub ttl: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            ttl: None,
        }
    }
}

/// Memoizes embeddings keyed by chunk id.
///
/// Each entry records a digest of the text it was computed from, so a chunk
/// id that comes back with different text is a miss.
///
/// Binary format per entry:
/// - 8 bytes: model fingerprint (u64 LE)
/// - 8 bytes: text digest, the first 8 bytes of its blake3 hash (u64 LE)
/// - 8 bytes: stored-at, seconds since the unix epoch (u64 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - zstd-compressed D * 4 bytes of native-endian f32 values
pub struct EmbeddingCache {
    db: Option<Database>,
    embedder: Arc<dyn Embedder>,
    fingerprint: u64,
    options: CacheOptions,
}

impl EmbeddingCache {
    /// Open or create a cache database at the given path.
    ///
    /// A database that cannot be opened disables caching instead of
    /// failing; every lookup then recomputes.
    pub fn open(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        options: CacheOptions,
    ) -> Self {
        let db = match open_database(path) {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "embedding cache unavailable, computing directly: {e}"
                );
                None
            }
        };
        Self::with_database(db, embedder, options)
    }

    /// A cache with no backing store. Every call computes.
    pub fn disabled(embedder: Arc<dyn Embedder>, options: CacheOptions) -> Self {
        Self::with_database(None, embedder, options)
    }

    fn with_database(
        db: Option<Database>,
        embedder: Arc<dyn Embedder>,
        options: CacheOptions,
    ) -> Self {
        let fingerprint = model_fingerprint(embedder.as_ref());
        let options = CacheOptions {
            batch_size: options.batch_size.max(1),
            ..options
        };
        Self {
            db,
            embedder,
            fingerprint,
            options,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size
    }

    /// Whether a backing store is attached.
    pub fn is_available(&self) -> bool {
        self.db.is_some()
    }

    /// Return the cached vector for `chunk_id`, computing and caching it on
    /// a miss.
    ///
    /// Never fails: cache errors fall back to direct computation, and a
    /// model failure yields a zero vector (see the module docs).
    pub fn get_or_compute(&self, chunk_id: ChunkId, text: &str) -> Vec<f32> {
        match self.lookup(chunk_id, text) {
            Ok(Some(vector)) => {
                debug!(chunk_id, "embedding cache hit");
                return vector;
            }
            Ok(None) => debug!(chunk_id, "embedding cache miss"),
            Err(e) => warn!(chunk_id, "embedding cache read failed: {e}"),
        }

        match self.embedder.encode(text) {
            Ok(vector) => {
                if let Err(e) = self.store(chunk_id, text, &vector) {
                    warn!(chunk_id, "embedding cache write failed: {e}");
                }
                vector
            }
            Err(e) => {
                error!(
                    chunk_id,
                    "embedding failed, substituting zero vector: {e}"
                );
                vec![0.0; self.dimension()]
            }
        }
    }

    /// Embed every chunk, reusing cached vectors and sending misses to the
    /// model in batches of at most `batch_size`.
    ///
    /// If a whole batch fails, its chunks are retried one at a time through
    /// [`get_or_compute`](Self::get_or_compute), so one bad chunk cannot sink
    /// the others. Output order matches input order and every chunk gets an
    /// embedding.
    pub fn encode_all(&self, chunks: &[Chunk]) -> Vec<EmbeddedChunk> {
        let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];

        match self.batch_lookup(chunks) {
            Ok(found) => {
                for (slot, vector) in embeddings.iter_mut().zip(found) {
                    *slot = vector;
                }
            }
            Err(e) => warn!("embedding cache batch read failed: {e}"),
        }

        let misses: Vec<usize> = embeddings
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i)
            .collect();
        debug!(
            hits = chunks.len() - misses.len(),
            misses = misses.len(),
            "embedding cache batch lookup"
        );

        for batch in misses.chunks(self.options.batch_size) {
            let texts: Vec<String> =
                batch.iter().map(|&i| chunks[i].text.clone()).collect();

            let encoded = self.embedder.encode_batch(&texts).and_then(|v| {
                if v.len() == texts.len() {
                    Ok(v)
                } else {
                    Err(Error::Computation(format!(
                        "model returned {} vectors for {} texts",
                        v.len(),
                        texts.len()
                    )))
                }
            });

            match encoded {
                Ok(vectors) => {
                    let entries: Vec<(ChunkId, &str, &[f32])> = batch
                        .iter()
                        .zip(&vectors)
                        .map(|(&i, v)| {
                            let chunk = &chunks[i];
                            (chunk.id, chunk.text.as_str(), v.as_slice())
                        })
                        .collect();
                    if let Err(e) = self.batch_store(&entries) {
                        warn!("embedding cache batch write failed: {e}");
                    }
                    for (&i, vector) in batch.iter().zip(vectors) {
                        embeddings[i] = Some(vector);
                    }
                }
                Err(e) => {
                    error!(
                        size = batch.len(),
                        "batch encoding failed, retrying per chunk: {e}"
                    );
                    for &i in batch {
                        let chunk = &chunks[i];
                        embeddings[i] =
                            Some(self.get_or_compute(chunk.id, &chunk.text));
                    }
                }
            }
        }

        chunks
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect()
    }

    /// Read the vector cached for `chunk_id` with this `text`. Entries that
    /// are stale, malformed, from another model or for other text read as a
    /// miss.
    pub fn lookup(
        &self,
        chunk_id: ChunkId,
        text: &str,
    ) -> Result<Option<Vec<f32>>> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        let txn = db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let Some(guard) = table.get(chunk_id)? else {
            return Ok(None);
        };
        Ok(self.decode(guard.value(), text_digest(text)))
    }

    /// Read the cached vectors for several chunks in one transaction,
    /// preserving input order.
    pub fn batch_lookup(
        &self,
        chunks: &[Chunk],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let Some(db) = &self.db else {
            return Ok(vec![None; chunks.len()]);
        };
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let txn = db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut results = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = match table.get(chunk.id)? {
                Some(guard) => {
                    self.decode(guard.value(), text_digest(&chunk.text))
                }
                None => None,
            };
            results.push(vector);
        }
        Ok(results)
    }

    /// Store the vector computed from `text` under `chunk_id`, overwriting
    /// any previous entry.
    pub fn store(
        &self,
        chunk_id: ChunkId,
        text: &str,
        vector: &[f32],
    ) -> Result<()> {
        self.batch_store(&[(chunk_id, text, vector)])
    }

    /// Store multiple `(chunk_id, text, vector)` entries in a single
    /// transaction.
    pub fn batch_store(
        &self,
        entries: &[(ChunkId, &str, &[f32])],
    ) -> Result<()> {
        self.batch_store_at(entries, unix_now())
    }

    fn batch_store_at(
        &self,
        entries: &[(ChunkId, &str, &[f32])],
        stored_at: u64,
    ) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }

        let encoded: Vec<(ChunkId, Vec<u8>)> = entries
            .iter()
            .map(|&(id, text, v)| {
                Ok((id, self.encode(v, text_digest(text), stored_at)?))
            })
            .collect::<Result<_>>()?;

        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            for (chunk_id, bytes) in &encoded {
                table.insert(*chunk_id, bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove cached vectors for the given chunks.
    pub fn evict(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            for &chunk_id in chunk_ids {
                table.remove(chunk_id)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Number of stored entries, including stale ones.
    pub fn len(&self) -> Result<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let txn = db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn encode(
        &self,
        vector: &[f32],
        digest: u64,
        stored_at: u64,
    ) -> Result<Vec<u8>> {
        let raw: &[u8] = bytemuck::cast_slice(vector);
        let compressed = zstd::encode_all(raw, ZSTD_LEVEL)?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + compressed.len());
        bytes.extend_from_slice(&self.fingerprint.to_le_bytes());
        bytes.extend_from_slice(&digest.to_le_bytes());
        bytes.extend_from_slice(&stored_at.to_le_bytes());
        bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&compressed);
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8], digest: u64) -> Option<Vec<f32>> {
        let fingerprint = read_u64(bytes, 0)?;
        let stored_digest = read_u64(bytes, 8)?;
        let stored_at = read_u64(bytes, 16)?;
        let dimension = read_u32(bytes, 24)? as usize;

        if fingerprint != self.fingerprint
            || stored_digest != digest
            || dimension != self.dimension()
        {
            return None;
        }
        if let Some(ttl) = self.options.ttl
            && unix_now().saturating_sub(stored_at) > ttl.as_secs()
        {
            return None;
        }

        let raw = zstd::decode_all(&bytes[HEADER_SIZE..]).ok()?;
        if raw.len() != dimension * 4 {
            return None;
        }
        Some(
            raw.chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("available", &self.db.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn open_database(path: &Path) -> Result<Database> {
    let db = Database::create(path)?;

    let txn = db.begin_write()?;
    txn.open_table(EMBEDDINGS)?;
    txn.commit()?;

    Ok(db)
}

/// First 8 bytes of the blake3 hash of `text`.
fn text_digest(text: &str) -> u64 {
    let digest = blake3::hash(text.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(slice.try_into().ok()?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(slice.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use proptest::prelude::*;

    use super::*;
    use crate::embedding::HashingEmbedder;

    /// Wraps the hashing embedder, counting calls and optionally failing
    /// batches larger than one or texts containing "poison".
    struct ProbeEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        fail_multi: bool,
    }

    impl ProbeEmbedder {
        fn new(fail_multi: bool) -> Self {
            Self {
                inner: HashingEmbedder::new(16),
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                fail_multi,
            }
        }
    }

    impl Embedder for ProbeEmbedder {
        fn model_id(&self) -> &str {
            "probe"
        }

        fn dimension(&self) -> usize {
            16
        }

        fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            if self.fail_multi && texts.len() > 1 {
                return Err(Error::Computation("batch too large".into()));
            }
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(Error::Computation("poisoned text".into()));
            }
            self.inner.encode_batch(texts)
        }
    }

    fn chunk(id: ChunkId, text: &str) -> Chunk {
        Chunk {
            id,
            document_id: 1,
            page_number: 1,
            chunk_index: id,
            text: text.to_string(),
        }
    }

    fn open_cache(
        tmp: &tempfile::TempDir,
        embedder: Arc<dyn Embedder>,
        options: CacheOptions,
    ) -> EmbeddingCache {
        EmbeddingCache::open(
            &tmp.path().join("embeddings.redb"),
            embedder,
            options,
        )
    }

    #[test]
    fn miss_then_hit_skips_model() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(false));
        let cache = open_cache(&tmp, probe.clone(), CacheOptions::default());
        assert!(cache.is_available());

        let first = cache.get_or_compute(1, "cats are mammals");
        let second = cache.get_or_compute(1, "cats are mammals");

        assert_eq!(first, second);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn model_failure_yields_zero_vector() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(false));
        let cache = open_cache(&tmp, probe, CacheOptions::default());

        let vector = cache.get_or_compute(9, "poison pill");
        assert_eq!(vector, vec![0.0; 16]);
        // Failures are not memoized.
        assert!(cache.lookup(9, "poison pill").unwrap().is_none());
    }

    #[test]
    fn disabled_cache_still_computes() {
        let probe = Arc::new(ProbeEmbedder::new(false));
        let cache =
            EmbeddingCache::disabled(probe.clone(), CacheOptions::default());
        assert!(!cache.is_available());

        let a = cache.get_or_compute(1, "hello");
        let b = cache.get_or_compute(1, "hello");
        assert_eq!(a, b);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().unwrap(), 0);
    }

    #[test]
    fn unopenable_path_disables_cache() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let cache = EmbeddingCache::open(
            tmp.path(),
            Arc::new(HashingEmbedder::new(8)),
            CacheOptions::default(),
        );
        assert!(!cache.is_available());
        assert_eq!(cache.get_or_compute(1, "still works").len(), 8);
    }

    #[test]
    fn expired_entry_is_recomputed() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(false));
        let options = CacheOptions {
            ttl: Some(Duration::from_secs(60)),
            ..CacheOptions::default()
        };
        let cache = open_cache(&tmp, probe.clone(), options);

        let vector = probe.inner.encode("old text").unwrap();
        cache
            .batch_store_at(
                &[(5, "old text", vector.as_slice())],
                unix_now() - 3600,
            )
            .unwrap();
        assert!(cache.lookup(5, "old text").unwrap().is_none());

        cache.get_or_compute(5, "old text");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(cache.lookup(5, "old text").unwrap().is_some());
    }

    #[test]
    fn entries_from_other_model_are_misses() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("embeddings.redb");
        {
            let cache = EmbeddingCache::open(
                &path,
                Arc::new(HashingEmbedder::new(16)),
                CacheOptions::default(),
            );
            cache.get_or_compute(1, "text");
            assert!(cache.lookup(1, "text").unwrap().is_some());
        }

        let probe = Arc::new(ProbeEmbedder::new(false));
        let cache = EmbeddingCache::open(&path, probe, CacheOptions::default());
        assert!(cache.lookup(1, "text").unwrap().is_none());
    }

    #[test]
    fn changed_text_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(false));
        let cache = open_cache(&tmp, probe.clone(), CacheOptions::default());

        let old = cache.get_or_compute(1, "cats purr softly");
        assert!(cache.lookup(1, "volcano lava eruption").unwrap().is_none());

        let new = cache.get_or_compute(1, "volcano lava eruption");
        assert_ne!(old, new);
        assert_eq!(new, probe.inner.encode("volcano lava eruption").unwrap());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        // The entry now belongs to the new text.
        assert!(cache.lookup(1, "cats purr softly").unwrap().is_none());
        assert_eq!(
            cache.lookup(1, "volcano lava eruption").unwrap(),
            Some(new)
        );
    }

    #[test]
    fn encode_all_recomputes_chunks_whose_text_changed() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(false));
        let cache = open_cache(&tmp, probe.clone(), CacheOptions::default());

        cache.encode_all(&[chunk(1, "cats purr softly"), chunk(2, "dogs bark")]);
        let embedded = cache.encode_all(&[
            chunk(1, "volcano lava eruption"),
            chunk(2, "dogs bark"),
        ]);

        let expected = probe.inner.encode("volcano lava eruption").unwrap();
        assert_eq!(embedded[0].embedding.as_deref(), Some(&expected[..]));
        // Only the changed chunk reached the model on the second pass.
        assert_eq!(*probe.batch_sizes.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn reopen_preserves_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
        let stored = {
            let cache =
                open_cache(&tmp, embedder.clone(), CacheOptions::default());
            cache.get_or_compute(42, "persistent vector")
        };

        let cache = open_cache(&tmp, embedder, CacheOptions::default());
        assert_eq!(
            cache.lookup(42, "persistent vector").unwrap(),
            Some(stored)
        );
    }

    #[test]
    fn encode_all_batches_up_to_batch_size() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(false));
        let options = CacheOptions {
            batch_size: 2,
            ..CacheOptions::default()
        };
        let cache = open_cache(&tmp, probe.clone(), options);

        let chunks: Vec<Chunk> =
            (1..=5).map(|i| chunk(i, &format!("text {i}"))).collect();
        let embedded = cache.encode_all(&chunks);

        assert_eq!(embedded.len(), 5);
        assert!(embedded.iter().all(|e| e.embedding.is_some()));
        let ids: Vec<_> = embedded.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(*probe.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(cache.len().unwrap(), 5);

        // Second pass is served entirely from the cache.
        cache.encode_all(&chunks);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn encode_all_retries_failed_batch_per_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let probe = Arc::new(ProbeEmbedder::new(true));
        let cache = open_cache(&tmp, probe.clone(), CacheOptions::default());

        let chunks = vec![
            chunk(1, "alpha"),
            chunk(2, "poison"),
            chunk(3, "gamma"),
        ];
        let embedded = cache.encode_all(&chunks);

        let expected = probe.inner.encode("alpha").unwrap();
        assert_eq!(embedded[0].embedding.as_deref(), Some(&expected[..]));
        assert_eq!(embedded[1].embedding.as_deref(), Some(&[0.0; 16][..]));
        assert!(embedded[2].embedding.is_some());
        // One failed batch plus three single retries.
        assert_eq!(*probe.batch_sizes.lock().unwrap(), vec![3, 1, 1, 1]);
    }

    #[test]
    fn evict_removes_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(
            &tmp,
            Arc::new(HashingEmbedder::new(8)),
            CacheOptions::default(),
        );
        cache.get_or_compute(1, "one");
        cache.get_or_compute(2, "two");

        cache.evict(&[1]).unwrap();
        assert!(cache.lookup(1, "one").unwrap().is_none());
        assert!(cache.lookup(2, "two").unwrap().is_some());
        assert_eq!(cache.len().unwrap(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn repeated_lookups_are_bit_identical(
            id in 0u64..1000,
            text in "[a-z ]{0,40}",
        ) {
            let tmp = tempfile::tempdir().unwrap();
            let cache = open_cache(
                &tmp,
                Arc::new(HashingEmbedder::new(32)),
                CacheOptions::default(),
            );
            let first = cache.get_or_compute(id, &text);
            let second = cache.get_or_compute(id, &text);
            let a: Vec<u32> = first.iter().map(|v| v.to_bits()).collect();
            let b: Vec<u32> = second.iter().map(|v| v.to_bits()).collect();
            prop_assert_eq!(a, b);
        }
    }
}
