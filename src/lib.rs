//! askdoc - hybrid retrieval over document chunks, combining BM25 and dense
//! vector search with optional ColBERT reranking.
//!
//! Chunks are indexed twice: into a [Tantivy](https://github.com/quickwit-oss/tantivy)
//! BM25 index and into a flat vector index of pooled embeddings. A query
//! runs against both, the hits are fused by taking each chunk's best score,
//! and the fused list can be rescored by a pairwise model.
//!
//! # Quick start
//!
//! ```no_run
//! use askdoc::{Chunk, DataDir, Engine, Settings};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let settings = Settings::from_env().unwrap();
//! let engine = Engine::open(data_dir, settings).unwrap();
//!
//! let chunks = vec![Chunk {
//!     id: 1,
//!     document_id: 1,
//!     page_number: 1,
//!     chunk_index: 0,
//!     text: "cats are mammals".to_string(),
//! }];
//! engine.build_indexes(&chunks, false).unwrap();
//!
//! let params = engine.settings().retrieve_params(false);
//! for hit in engine.retrieve("mammals", &params).unwrap() {
//!     println!("#{} (score: {:.3})", hit.chunk_id, hit.score);
//! }
//! ```

pub mod answer;
pub mod chunk;
pub mod data_dir;
pub mod embedding;
pub mod embedding_cache;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod lexical_index;
pub mod model_manager;
pub mod persistence;
pub mod reranker;
pub mod retrieval;
pub mod settings;
pub mod vector_index;

pub use chunk::{Candidate, Chunk, ChunkId};
pub use data_dir::DataDir;
pub use embedding::{Embedder, HashingEmbedder};
pub use embedding_cache::EmbeddingCache;
pub use engine::Engine;
pub use error::{Error, Result};
pub use lexical_index::LexicalIndex;
pub use model_manager::ModelManager;
pub use retrieval::{RetrieveParams, Retriever};
pub use settings::Settings;
pub use vector_index::{Metric, SharedVectorIndex, VectorIndex};
