use serde::{Deserialize, Serialize};

/// Identifier assigned to a chunk by the ingestion side. Unique within the
/// corpus and stable for the lifetime of the chunk.
pub type ChunkId = u64;

/// A contiguous slice of a document's extracted text.
///
/// Chunks are immutable once created; the index only ever reads them.
///
/// # Examples
///
/// ```
/// use askdoc::Chunk;
///
/// let chunk: Chunk = serde_json::from_str(
///     r#"{"id": 7, "document_id": 1, "page_number": 2, "chunk_index": 0,
///         "text": "cats are mammals"}"#,
/// )
/// .unwrap();
/// assert_eq!(chunk.id, 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(alias = "chunk_id")]
    pub id: ChunkId,
    pub document_id: u64,
    pub page_number: u64,
    pub chunk_index: u64,
    pub text: String,
}

/// A chunk paired with its embedding, if one could be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk,
            embedding: Some(embedding),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.chunk.id
    }
}

/// A ranked retrieval result. Only ever produced per query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
    pub chunk_id: ChunkId,
    pub score: f32,
}

impl Candidate {
    pub fn new(chunk_id: ChunkId, score: f32) -> Self {
        Self { chunk_id, score }
    }
}

/// A retrieved chunk with its final score, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

/// Sort candidates by score, highest first. Equal scores keep their
/// relative order and NaN scores sort last.
pub fn sort_by_score_desc(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
}

/// Orders NaN below every real score.
pub(crate) fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_alias_accepted() {
        let chunk: Chunk = serde_json::from_str(
            r#"{"chunk_id": 3, "document_id": 1, "page_number": 1,
                "chunk_index": 4, "text": "hello"}"#,
        )
        .unwrap();
        assert_eq!(chunk.id, 3);
        assert_eq!(chunk.chunk_index, 4);
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let mut c = vec![
            Candidate::new(1, 0.5),
            Candidate::new(2, 0.9),
            Candidate::new(3, 0.5),
        ];
        sort_by_score_desc(&mut c);
        let ids: Vec<_> = c.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn sort_puts_nan_last_without_panicking() {
        let mut c: Vec<Candidate> = (0..64)
            .map(|i| {
                let score = if i % 3 == 0 { f32::NAN } else { i as f32 };
                Candidate::new(i, score)
            })
            .collect();
        sort_by_score_desc(&mut c);

        assert_eq!(c[0].chunk_id, 62);
        let first_nan = c.iter().position(|c| c.score.is_nan()).unwrap();
        assert!(c[first_nan..].iter().all(|c| c.score.is_nan()));
        assert!(c[..first_nan].windows(2).all(|w| w[0].score >= w[1].score));
    }
}
