//! Restore-layer error kinds.
//!
//! The split that matters operationally: everything up to and including
//! validation fails with nothing to undo; an apply failure is reported
//! *after* a successful rollback as a terminal report state; and a
//! rollback failure is its own fatal kind, never conflated with the apply
//! failure that triggered it.

use conceptgraph_core::{SimilarityError, StoreError};
use conceptgraph_snapshot::{SnapshotError, ValidationReport};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestoreError {
    /// The store-resident restore claim is held by another run.
    #[error("another restore already holds the claim (owner `{owner}`)")]
    AlreadyRunning { owner: String },

    #[error("creating checkpoint: {0}")]
    Checkpoint(#[source] Box<SnapshotError>),

    #[error("loading snapshot: {0}")]
    Load(#[source] Box<SnapshotError>),

    /// The document has validation errors and was never applied.
    #[error("document failed validation with {} error(s)", report.errors.len())]
    Validation { report: ValidationReport },

    /// Rollback itself failed; the store needs manual attention. Both the
    /// apply failure and the rollback failure ride along, kept distinct.
    #[error("rollback failed, manual intervention required (apply: {apply}; rollback: {rollback})")]
    RollbackFailed { apply: String, rollback: String },

    #[error("job queue: {0}")]
    Job(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

pub type RestoreResult<T> = Result<T, RestoreError>;
