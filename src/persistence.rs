//! On-disk form of the vector index.
//!
//! Two files live in the store directory:
//!
//! - `vectors.bin`: a fixed 32-byte header followed by the row-major `f32`
//!   vectors in native byte order.
//! - `id_map.json`: a JSON object mapping each row number (as a string key)
//!   to its chunk id, e.g. `{"0": 17, "1": 42}`.
//!
//! Each file is written to a temporary sibling and renamed into place. The
//! vector header carries a digest of the id list it was saved with, so a
//! crash between the two renames leaves a pair that fails to load as
//! [`Error::Corrupt`] instead of pairing vectors with the wrong chunks.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use bytemuck::{Pod, Zeroable};
use serde::{Serialize, Serializer, ser::SerializeMap};
use tracing::debug;

use crate::{
    chunk::ChunkId,
    error::{Error, Result},
    vector_index::{Metric, VectorIndex},
};

pub const VECTOR_FILE: &str = "vectors.bin";
pub const ID_MAP_FILE: &str = "id_map.json";

const MAGIC: [u8; 4] = *b"AQVX";
const FORMAT_VERSION: u32 = 2;
const HEADER_LEN: usize = std::mem::size_of::<VectorFileHeader>();

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VectorFileHeader {
    magic: [u8; 4],
    version: u32,
    dimension: u32,
    metric: u32,
    count: u64,
    /// [`ids_digest`] of the id map saved alongside.
    ids_digest: u64,
}

/// Directory holding a persisted [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct VectorStore {
    dir: PathBuf,
}

impl VectorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vector_path(&self) -> PathBuf {
        self.dir.join(VECTOR_FILE)
    }

    pub fn id_map_path(&self) -> PathBuf {
        self.dir.join(ID_MAP_FILE)
    }

    /// Write `index` to disk, replacing any previous copy.
    pub fn save(&self, index: &VectorIndex) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let header = VectorFileHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
            dimension: u32::try_from(index.dimension()).map_err(|_| {
                Error::Validation(format!(
                    "dimension {} does not fit the vector file format",
                    index.dimension()
                ))
            })?,
            metric: index.metric().code(),
            count: index.len() as u64,
            ids_digest: ids_digest(index.id_map()),
        };

        let mut bytes =
            Vec::with_capacity(HEADER_LEN + std::mem::size_of_val(index.data()));
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        bytes.extend_from_slice(bytemuck::cast_slice(index.data()));
        write_atomic(&self.vector_path(), &bytes)?;

        let id_map = serde_json::to_vec(&RowMap(index.id_map()))?;
        write_atomic(&self.id_map_path(), &id_map)?;

        debug!(
            dir = %self.dir.display(),
            rows = index.len(),
            "vector index saved"
        );
        Ok(())
    }

    /// Read the saved index.
    ///
    /// Returns `Ok(None)` when nothing has been saved yet. A vector file
    /// without its id map, or files that disagree, are reported as
    /// [`Error::Corrupt`].
    pub fn load(&self) -> Result<Option<VectorIndex>> {
        let vector_path = self.vector_path();
        if !vector_path.is_file() {
            return Ok(None);
        }

        let id_map_path = self.id_map_path();
        if !id_map_path.is_file() {
            return Err(Error::Corrupt {
                path: id_map_path,
                reason: "id map missing next to vector file".to_string(),
            });
        }

        let bytes = fs::read(&vector_path)?;
        let corrupt = |reason: String| Error::Corrupt {
            path: vector_path.clone(),
            reason,
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!(
                "file is {} bytes, shorter than the header",
                bytes.len()
            )));
        }
        let header: VectorFileHeader =
            bytemuck::try_pod_read_unaligned(&bytes[..HEADER_LEN])
                .map_err(|e| corrupt(format!("unreadable header: {e:?}")))?;
        if header.magic != MAGIC {
            return Err(corrupt("not a vector index file".to_string()));
        }
        if header.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                header.version
            )));
        }
        let metric = Metric::from_code(header.metric).ok_or_else(|| {
            corrupt(format!("unknown metric code {}", header.metric))
        })?;

        let dimension = header.dimension as usize;
        let count = usize::try_from(header.count)
            .map_err(|_| corrupt("row count overflows".to_string()))?;
        let payload = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .ok_or_else(|| corrupt("row count overflows".to_string()))?;
        if payload.len() != expected {
            return Err(corrupt(format!(
                "payload is {} bytes, expected {expected}",
                payload.len()
            )));
        }
        let data: Vec<f32> = payload
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned)
            .collect();

        let json = fs::read_to_string(&id_map_path)?;
        let ids = decode_id_map(&json).map_err(|reason| Error::Corrupt {
            path: id_map_path.clone(),
            reason,
        })?;
        if ids.len() != count {
            return Err(Error::Corrupt {
                path: id_map_path,
                reason: format!(
                    "id map has {} rows, vector file has {count}",
                    ids.len()
                ),
            });
        }
        if ids_digest(&ids) != header.ids_digest {
            return Err(Error::Corrupt {
                path: id_map_path,
                reason: "id map does not belong to the vector file".to_string(),
            });
        }

        VectorIndex::from_parts(dimension, metric, data, ids)
            .map(Some)
            .map_err(|e| corrupt(e.to_string()))
    }
}

/// Serializes a dense id table as `{"row": chunk_id, ...}` in row order.
struct RowMap<'a>(&'a [ChunkId]);

impl Serialize for RowMap<'_> {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (row, id) in self.0.iter().enumerate() {
            map.serialize_entry(&row.to_string(), id)?;
        }
        map.end()
    }
}

/// Parse an id map, requiring rows `0..n` with no gaps.
fn decode_id_map(json: &str) -> std::result::Result<Vec<ChunkId>, String> {
    let raw: HashMap<String, ChunkId> =
        serde_json::from_str(json).map_err(|e| e.to_string())?;

    let mut ids = vec![None; raw.len()];
    for (key, id) in raw {
        let row: usize = key
            .parse()
            .map_err(|_| format!("row key {key:?} is not a number"))?;
        let slot = ids
            .get_mut(row)
            .ok_or_else(|| format!("row {row} leaves a gap in the id map"))?;
        *slot = Some(id);
    }

    ids.into_iter()
        .enumerate()
        .map(|(row, id)| id.ok_or_else(|| format!("row {row} is missing")))
        .collect()
}

/// First 8 bytes of the blake3 hash of the ids in row order.
fn ids_digest(ids: &[ChunkId]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for id in ids {
        hasher.update(&id.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
