//! Store and similarity error kinds.

use thiserror::Error;

/// Errors surfaced by [`crate::store::GraphStore`] implementations.
///
/// The two retryable variants abstract engine quirks rather than any one
/// backend: `SchemaRace` is the "first write of a new label/type creates
/// underlying storage" race some engines exhibit under concurrency, and
/// `TransientConflict` is a concurrent update colliding on the same key.
/// Callers retry both exactly once (see [`crate::store::retry_once`]).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable. Nothing was mutated.
    #[error("store unreachable: {0}")]
    Connectivity(String),

    /// Underlying storage for a first-seen label/type was created
    /// concurrently by another writer.
    #[error("storage for {kind} `{name}` already exists")]
    SchemaRace { kind: &'static str, name: String },

    /// Two writers collided on the same key.
    #[error("concurrent update on `{key}`")]
    TransientConflict { key: String },

    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },

    /// The serial-run claim is already held.
    #[error("claim `{key}` already held by `{owner}`")]
    ClaimHeld { key: String, owner: String },

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a single immediate retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::SchemaRace { .. } | StoreError::TransientConflict { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the similarity kernel. Preconditions are explicit so a bad
/// input fails loudly instead of propagating NaN into match scores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("zero-norm embedding")]
    ZeroNorm,

    #[error("empty embedding")]
    Empty,
}
