//! Store primitives the codec, repairer, and reconciler are written
//! against.
//!
//! The trait is intentionally narrow: keyed upserts, point lookups, full
//! scans (graph volumes here are small), grounding-edge maintenance, and
//! the claim row that serializes restore runs. Everything takes `&self` so
//! implementations can be shared across a worker pool.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    Concept, Instance, Relationship, RelationshipKey, Source, VocabularyEntry,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Upsert behavior when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    /// Keep the existing row untouched.
    Skip,
    /// Replace the existing row.
    Overwrite,
}

/// What a keyed upsert actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Skipped,
}

/// The store-resident lease row that keeps "one restore per store" true
/// across process restarts. Acquire/renew/release are atomic conditional
/// updates on the row, the moral equivalent of `SELECT … FOR UPDATE SKIP
/// LOCKED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub key: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Claim key used by the restore coordinator.
pub const RESTORE_CLAIM_KEY: &str = "restore";

/// Query/mutate primitives over the live graph.
pub trait GraphStore: Send + Sync {
    // ------------------------------------------------------------------
    // Concepts
    // ------------------------------------------------------------------
    fn upsert_concept(&self, concept: &Concept, policy: WritePolicy) -> StoreResult<Applied>;
    fn get_concept(&self, concept_id: &str) -> StoreResult<Option<Concept>>;
    fn concepts(&self) -> StoreResult<Vec<Concept>>;
    fn concept_count(&self) -> StoreResult<u64>;
    fn delete_concept(&self, concept_id: &str) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------
    fn upsert_source(&self, source: &Source, policy: WritePolicy) -> StoreResult<Applied>;
    fn get_source(&self, source_id: &str) -> StoreResult<Option<Source>>;
    fn sources(&self) -> StoreResult<Vec<Source>>;
    fn sources_in_ontology(&self, ontology: &str) -> StoreResult<Vec<Source>>;
    fn source_count(&self) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------
    fn upsert_instance(&self, instance: &Instance, policy: WritePolicy) -> StoreResult<Applied>;
    fn get_instance(&self, instance_id: &str) -> StoreResult<Option<Instance>>;
    fn delete_instance(&self, instance_id: &str) -> StoreResult<bool>;
    fn instances(&self) -> StoreResult<Vec<Instance>>;
    fn instances_of_concept(&self, concept_id: &str) -> StoreResult<Vec<Instance>>;
    fn instance_count(&self) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------
    fn upsert_relationship(
        &self,
        relationship: &Relationship,
        policy: WritePolicy,
    ) -> StoreResult<Applied>;
    fn get_relationship(&self, key: &RelationshipKey) -> StoreResult<Option<Relationship>>;
    fn delete_relationship(&self, key: &RelationshipKey) -> StoreResult<bool>;
    fn relationships(&self) -> StoreResult<Vec<Relationship>>;
    fn relationships_touching(&self, concept_id: &str) -> StoreResult<Vec<Relationship>>;
    fn relationship_count(&self) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Vocabulary (additive, independent namespace)
    // ------------------------------------------------------------------
    fn upsert_vocabulary_entry(
        &self,
        entry: &VocabularyEntry,
        policy: WritePolicy,
    ) -> StoreResult<Applied>;
    fn vocabulary(&self) -> StoreResult<Vec<VocabularyEntry>>;
    fn vocabulary_count(&self) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Grounding edges (concept "appears in" source)
    // ------------------------------------------------------------------
    fn link_concept_source(&self, concept_id: &str, source_id: &str) -> StoreResult<()>;
    fn grounding_sources_of(&self, concept_id: &str) -> StoreResult<Vec<String>>;
    fn is_grounded(&self, concept_id: &str) -> StoreResult<bool>;

    /// Ontologies a concept is grounded in, via its grounding edges.
    fn ontologies_of_concept(&self, concept_id: &str) -> StoreResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Bulk
    // ------------------------------------------------------------------

    /// Clear concepts, sources, instances, relationships, and grounding
    /// edges. Vocabulary and claim rows survive.
    fn clear_graph_data(&self) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------

    /// Acquire `key` for `owner`, failing with [`StoreError::ClaimHeld`]
    /// if a non-expired claim by another owner exists. Re-acquiring one's
    /// own claim renews it.
    fn acquire_claim(&self, key: &str, owner: &str, ttl: Duration) -> StoreResult<Claim>;

    /// Release `key` if held by `owner`. Releasing an unheld claim is a
    /// no-op.
    fn release_claim(&self, key: &str, owner: &str) -> StoreResult<()>;

    fn get_claim(&self, key: &str) -> StoreResult<Option<Claim>>;
}

/// Run `op`, retrying exactly once if it fails with a retryable
/// [`StoreError`] (lazy-storage-creation race, concurrent-update
/// conflict). Anything else propagates unchanged.
pub fn retry_once<T>(mut op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
    match op() {
        Err(e) if e.is_retryable() => {
            tracing::debug!(error = %e, "retrying transient store failure once");
            op()
        }
        other => other,
    }
}

/// Counts of the four graph sections plus vocabulary, as read from a live
/// store. Used for checkpoint bookkeeping and post-restore verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub concepts: u64,
    pub sources: u64,
    pub instances: u64,
    pub relationships: u64,
    pub vocabulary: u64,
}

pub fn store_counts(store: &dyn GraphStore) -> StoreResult<StoreCounts> {
    Ok(StoreCounts {
        concepts: store.concept_count()?,
        sources: store.source_count()?,
        instances: store.instance_count()?,
        relationships: store.relationship_count()?,
        vocabulary: store.vocabulary_count()?,
    })
}
