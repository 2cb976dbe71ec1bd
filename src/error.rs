use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("lexical index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    /// A vector index was requested but no chunk carried an embedding.
    #[error("no embeddings available to build a vector index")]
    EmptyIndex,

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Embedding or reranking model failure.
    #[error("model computation failed: {0}")]
    Computation(String),

    #[error("corrupt index file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
