//! Snapshot-layer error kinds.

use conceptgraph_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The document is malformed: missing required fields, wrong types,
    /// or an incoherent scope. Raised before any mutation.
    #[error("malformed snapshot document: {0}")]
    Format(String),

    #[error("unsupported snapshot version `{0}`")]
    UnsupportedVersion(String),

    /// Archive container problems, including traversal-hostile member
    /// paths.
    #[error("snapshot archive: {0}")]
    Archive(String),

    /// A blob referenced by the archive manifest could not be handled.
    #[error("archive blob `{key}`: {message}")]
    Blob { key: String, message: String },

    #[error("import worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
