//! Restore layer: referential repair, semantic reconciliation, and the
//! checkpointed restore coordinator.
//!
//! Layering:
//!
//! - [`repair`] fixes the live store in place: re-derives lost grounding
//!   edges from surviving evidence, prunes relationships with wholly
//!   ungrounded endpoints, reports missing embeddings and cross-ontology
//!   bridges.
//! - [`reconcile`] handles the torn references an ontology-scoped restore
//!   creates, driving each to a terminal state via embedding similarity.
//! - [`checkpoint`] + [`coordinator`] wrap any destructive restore in a
//!   durable Full-scope checkpoint with rollback.

pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod reconcile;
pub mod repair;

pub use checkpoint::{CheckpointHandle, CheckpointManager};
pub use coordinator::{
    BlobRestoreCounts, ReconciliationReport, RestoreCoordinator, RestoreInput, RestoreOptions,
    RestoreOutcome, RestorePhase, RestoreReport,
};
pub use error::{RestoreError, RestoreResult};
pub use reconcile::{
    ExternalRef, LeftoverPrune, MatchTier, MatchedRef, ReconcilerOptions, ReconciliationOutcome,
    ReconciliationPlan, ReconciliationStats, SemanticReconciler, UnmatchedReason, UnmatchedRef,
    DEFAULT_SIMILARITY_THRESHOLD, HIGH_CONFIDENCE_THRESHOLD, PLACEHOLDER_TAG,
};
pub use repair::{
    CrossOntologyRelationship, DanglingRelationship, MissingEmbeddingReport, OrphanConcept,
    OrphanReport, PruneReport, ReferentialRepairer,
};
