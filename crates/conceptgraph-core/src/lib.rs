//! Conceptgraph core: entity model, store primitives, similarity kernel.
//!
//! The graph is a property graph of concepts, the sources they were
//! observed in, evidentiary instances tying the two together, and typed
//! concept-to-concept relationships — everything carrying embeddings.
//! This crate holds what every other layer shares:
//!
//! - the entity types and their wire shapes ([`model`])
//! - the [`store::GraphStore`] trait plus the bundled in-memory
//!   implementation ([`memory`])
//! - the strict cosine kernel ([`similarity`]) and the nearest-concept
//!   index ([`ann`])
//! - the outward-facing collaborator contracts: progress sinks
//!   ([`progress`]), job queues ([`jobs`]), blob stores ([`blob`])
//!
//! Snapshot movement lives in `conceptgraph-snapshot`; repair, semantic
//! reconciliation, and restore orchestration live in
//! `conceptgraph-restore`.

pub mod ann;
pub mod blob;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod model;
pub mod progress;
pub mod similarity;
pub mod store;

pub use ann::{ConceptIndex, ScoredConcept, ANN_THRESHOLD};
pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{SimilarityError, StoreError, StoreResult};
pub use jobs::{JobPatch, JobQueue, MemoryJobQueue};
pub use memory::MemoryGraphStore;
pub use model::{
    builtin_vocabulary, is_builtin_type, is_structural_type, is_valid_type_name, Concept,
    Instance, Relationship, RelationshipKey, Source, VocabularyEntry, BUILTIN_TYPES,
    STRUCTURAL_TYPES,
};
pub use progress::{JobProgressSink, NoopProgress, ProgressThrottle};
pub use store::{
    retry_once, store_counts, Applied, Claim, GraphStore, StoreCounts, WritePolicy,
    RESTORE_CLAIM_KEY,
};
