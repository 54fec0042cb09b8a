use std::path::PathBuf;

use crate::generation::GenerationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("failed to extract '{document}': {reason}")]
    Extraction { document: String, reason: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("invalid chunk {document}#{chunk_id}: {reason}")]
    InvalidChunk {
        document: String,
        chunk_id: u32,
        reason: String,
    },

    #[error(
        "vector store and chunk store are out of sync ({vectors} vectors, {chunks} chunks); \
         manual reconciliation required"
    )]
    StoreDesync { vectors: usize, chunks: usize },

    #[error("corrupt store file {path}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error(
        "another indexing run holds {0}; remove it if no indexer is running"
    )]
    IndexLocked(PathBuf),

    #[error("embedding model error: {0}")]
    Model(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}
