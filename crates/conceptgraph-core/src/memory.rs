//! In-memory [`GraphStore`] implementation.
//!
//! Concurrent maps per node kind, grounding edges as an adjacency set, and
//! a mutex-guarded claim table. Suitable for tests, the CLI's local mode,
//! and as the reference semantics for real backends.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    builtin_vocabulary, Concept, Instance, Relationship, RelationshipKey, Source,
    VocabularyEntry,
};
use crate::store::{Applied, Claim, GraphStore, WritePolicy};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
struct FaultPlan {
    /// Errors handed out, FIFO, one per relationship upsert attempt.
    relationship_faults: Mutex<VecDeque<StoreError>>,
    /// Remaining successful relationship writes before hard failure.
    /// Negative means the fuse is disarmed.
    relationship_fuse: AtomicI64,
}

pub struct MemoryGraphStore {
    concepts: DashMap<String, Concept>,
    sources: DashMap<String, Source>,
    instances: DashMap<String, Instance>,
    relationships: DashMap<RelationshipKey, Relationship>,
    vocabulary: DashMap<String, VocabularyEntry>,
    grounding: DashMap<String, BTreeSet<String>>,
    claims: Mutex<HashMap<String, Claim>>,
    faults: FaultPlan,
}

impl MemoryGraphStore {
    /// A fresh store, seeded with the builtin vocabulary.
    pub fn new() -> Self {
        let store = Self {
            concepts: DashMap::new(),
            sources: DashMap::new(),
            instances: DashMap::new(),
            relationships: DashMap::new(),
            vocabulary: DashMap::new(),
            grounding: DashMap::new(),
            claims: Mutex::new(HashMap::new()),
            faults: FaultPlan {
                relationship_fuse: AtomicI64::new(-1),
                ..FaultPlan::default()
            },
        };
        for entry in builtin_vocabulary() {
            store
                .vocabulary
                .insert(entry.relationship_type.clone(), entry);
        }
        store
    }

    // ------------------------------------------------------------------
    // Fault instrumentation (test support)
    // ------------------------------------------------------------------

    /// Queue an error to be returned by the next relationship upsert
    /// attempts, FIFO. Lets tests exercise the retry-once contract.
    pub fn push_relationship_fault(&self, error: StoreError) {
        self.faults.relationship_faults.lock().push_back(error);
    }

    /// Arm a single-shot fuse: after `n` more successful relationship
    /// writes, the next one fails with a connectivity error and the fuse
    /// disarms. Lets tests fail an apply partway through and still roll
    /// back cleanly.
    pub fn fail_relationship_writes_after(&self, n: u64) {
        self.faults
            .relationship_fuse
            .store(n as i64, Ordering::SeqCst);
    }

    fn take_relationship_fault(&self) -> Option<StoreError> {
        self.faults.relationship_faults.lock().pop_front()
    }

    fn burn_relationship_fuse(&self) -> StoreResult<()> {
        let fuse = &self.faults.relationship_fuse;
        loop {
            let current = fuse.load(Ordering::SeqCst);
            if current < 0 {
                return Ok(());
            }
            let (next, fire) = if current == 0 { (-1, true) } else { (current - 1, false) };
            if fuse
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return if fire {
                    Err(StoreError::Connectivity(
                        "injected relationship write failure".into(),
                    ))
                } else {
                    Ok(())
                };
            }
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert<K, V>(map: &DashMap<K, V>, key: K, value: V, policy: WritePolicy) -> Applied
where
    K: std::hash::Hash + Eq,
{
    match map.entry(key) {
        dashmap::mapref::entry::Entry::Occupied(mut slot) => match policy {
            WritePolicy::Skip => Applied::Skipped,
            WritePolicy::Overwrite => {
                slot.insert(value);
                Applied::Updated
            }
        },
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(value);
            Applied::Created
        }
    }
}

impl GraphStore for MemoryGraphStore {
    fn upsert_concept(&self, concept: &Concept, policy: WritePolicy) -> StoreResult<Applied> {
        Ok(upsert(
            &self.concepts,
            concept.concept_id.clone(),
            concept.clone(),
            policy,
        ))
    }

    fn get_concept(&self, concept_id: &str) -> StoreResult<Option<Concept>> {
        Ok(self.concepts.get(concept_id).map(|c| c.clone()))
    }

    fn concepts(&self) -> StoreResult<Vec<Concept>> {
        Ok(self.concepts.iter().map(|c| c.clone()).collect())
    }

    fn concept_count(&self) -> StoreResult<u64> {
        Ok(self.concepts.len() as u64)
    }

    fn delete_concept(&self, concept_id: &str) -> StoreResult<bool> {
        self.grounding.remove(concept_id);
        Ok(self.concepts.remove(concept_id).is_some())
    }

    fn upsert_source(&self, source: &Source, policy: WritePolicy) -> StoreResult<Applied> {
        Ok(upsert(
            &self.sources,
            source.source_id.clone(),
            source.clone(),
            policy,
        ))
    }

    fn get_source(&self, source_id: &str) -> StoreResult<Option<Source>> {
        Ok(self.sources.get(source_id).map(|s| s.clone()))
    }

    fn sources(&self) -> StoreResult<Vec<Source>> {
        Ok(self.sources.iter().map(|s| s.clone()).collect())
    }

    fn sources_in_ontology(&self, ontology: &str) -> StoreResult<Vec<Source>> {
        Ok(self
            .sources
            .iter()
            .filter(|s| s.document == ontology)
            .map(|s| s.clone())
            .collect())
    }

    fn source_count(&self) -> StoreResult<u64> {
        Ok(self.sources.len() as u64)
    }

    fn upsert_instance(&self, instance: &Instance, policy: WritePolicy) -> StoreResult<Applied> {
        Ok(upsert(
            &self.instances,
            instance.instance_id.clone(),
            instance.clone(),
            policy,
        ))
    }

    fn get_instance(&self, instance_id: &str) -> StoreResult<Option<Instance>> {
        Ok(self.instances.get(instance_id).map(|i| i.clone()))
    }

    fn delete_instance(&self, instance_id: &str) -> StoreResult<bool> {
        Ok(self.instances.remove(instance_id).is_some())
    }

    fn instances(&self) -> StoreResult<Vec<Instance>> {
        Ok(self.instances.iter().map(|i| i.clone()).collect())
    }

    fn instances_of_concept(&self, concept_id: &str) -> StoreResult<Vec<Instance>> {
        Ok(self
            .instances
            .iter()
            .filter(|i| i.concept_id == concept_id)
            .map(|i| i.clone())
            .collect())
    }

    fn instance_count(&self) -> StoreResult<u64> {
        Ok(self.instances.len() as u64)
    }

    fn upsert_relationship(
        &self,
        relationship: &Relationship,
        policy: WritePolicy,
    ) -> StoreResult<Applied> {
        if let Some(fault) = self.take_relationship_fault() {
            return Err(fault);
        }
        self.burn_relationship_fuse()?;
        Ok(upsert(
            &self.relationships,
            relationship.key(),
            relationship.clone(),
            policy,
        ))
    }

    fn get_relationship(&self, key: &RelationshipKey) -> StoreResult<Option<Relationship>> {
        Ok(self.relationships.get(key).map(|r| r.clone()))
    }

    fn delete_relationship(&self, key: &RelationshipKey) -> StoreResult<bool> {
        Ok(self.relationships.remove(key).is_some())
    }

    fn relationships(&self) -> StoreResult<Vec<Relationship>> {
        Ok(self.relationships.iter().map(|r| r.clone()).collect())
    }

    fn relationships_touching(&self, concept_id: &str) -> StoreResult<Vec<Relationship>> {
        Ok(self
            .relationships
            .iter()
            .filter(|r| r.from == concept_id || r.to == concept_id)
            .map(|r| r.clone())
            .collect())
    }

    fn relationship_count(&self) -> StoreResult<u64> {
        Ok(self.relationships.len() as u64)
    }

    fn upsert_vocabulary_entry(
        &self,
        entry: &VocabularyEntry,
        policy: WritePolicy,
    ) -> StoreResult<Applied> {
        Ok(upsert(
            &self.vocabulary,
            entry.relationship_type.clone(),
            entry.clone(),
            policy,
        ))
    }

    fn vocabulary(&self) -> StoreResult<Vec<VocabularyEntry>> {
        Ok(self.vocabulary.iter().map(|v| v.clone()).collect())
    }

    fn vocabulary_count(&self) -> StoreResult<u64> {
        Ok(self.vocabulary.len() as u64)
    }

    fn link_concept_source(&self, concept_id: &str, source_id: &str) -> StoreResult<()> {
        self.grounding
            .entry(concept_id.to_string())
            .or_default()
            .insert(source_id.to_string());
        Ok(())
    }

    fn grounding_sources_of(&self, concept_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .grounding
            .get(concept_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn is_grounded(&self, concept_id: &str) -> StoreResult<bool> {
        Ok(self
            .grounding
            .get(concept_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false))
    }

    fn ontologies_of_concept(&self, concept_id: &str) -> StoreResult<Vec<String>> {
        let mut ontologies = BTreeSet::new();
        for source_id in self.grounding_sources_of(concept_id)? {
            if let Some(source) = self.sources.get(&source_id) {
                ontologies.insert(source.document.clone());
            }
        }
        Ok(ontologies.into_iter().collect())
    }

    fn clear_graph_data(&self) -> StoreResult<()> {
        self.concepts.clear();
        self.sources.clear();
        self.instances.clear();
        self.relationships.clear();
        self.grounding.clear();
        Ok(())
    }

    fn acquire_claim(&self, key: &str, owner: &str, ttl: Duration) -> StoreResult<Claim> {
        let now = Utc::now();
        let mut claims = self.claims.lock();
        if let Some(existing) = claims.get(key) {
            if existing.owner != owner && !existing.is_expired_at(now) {
                return Err(StoreError::ClaimHeld {
                    key: key.to_string(),
                    owner: existing.owner.clone(),
                });
            }
        }
        let claim = Claim {
            key: key.to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        claims.insert(key.to_string(), claim.clone());
        Ok(claim)
    }

    fn release_claim(&self, key: &str, owner: &str) -> StoreResult<()> {
        let mut claims = self.claims.lock();
        if claims.get(key).map(|c| c.owner == owner).unwrap_or(false) {
            claims.remove(key);
        }
        Ok(())
    }

    fn get_claim(&self, key: &str) -> StoreResult<Option<Claim>> {
        Ok(self.claims.lock().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::retry_once;
    use serde_json::Map;

    fn concept(id: &str) -> Concept {
        Concept {
            concept_id: id.into(),
            label: id.into(),
            search_terms: vec![],
            embedding: vec![1.0, 0.0],
        }
    }

    fn source(id: &str, ontology: &str) -> Source {
        Source {
            source_id: id.into(),
            document: ontology.into(),
            file_path: format!("{ontology}/doc.md"),
            paragraph: 0,
            full_text: "text".into(),
            blob_key: None,
            content_type: None,
        }
    }

    fn relationship(from: &str, to: &str) -> Relationship {
        Relationship {
            from: from.into(),
            to: to.into(),
            rel_type: "CAUSES".into(),
            properties: Map::new(),
        }
    }

    #[test]
    fn skip_policy_keeps_existing_row() {
        let store = MemoryGraphStore::new();
        let mut c = concept("c1");
        assert_eq!(
            store.upsert_concept(&c, WritePolicy::Skip).unwrap(),
            Applied::Created
        );
        c.label = "renamed".into();
        assert_eq!(
            store.upsert_concept(&c, WritePolicy::Skip).unwrap(),
            Applied::Skipped
        );
        assert_eq!(store.get_concept("c1").unwrap().unwrap().label, "c1");
        assert_eq!(
            store.upsert_concept(&c, WritePolicy::Overwrite).unwrap(),
            Applied::Updated
        );
        assert_eq!(store.get_concept("c1").unwrap().unwrap().label, "renamed");
    }

    #[test]
    fn grounding_edges_track_ontologies() {
        let store = MemoryGraphStore::new();
        store.upsert_concept(&concept("c1"), WritePolicy::Skip).unwrap();
        store.upsert_source(&source("s1", "alpha"), WritePolicy::Skip).unwrap();
        store.upsert_source(&source("s2", "beta"), WritePolicy::Skip).unwrap();

        assert!(!store.is_grounded("c1").unwrap());
        store.link_concept_source("c1", "s1").unwrap();
        store.link_concept_source("c1", "s2").unwrap();
        store.link_concept_source("c1", "s1").unwrap(); // idempotent

        assert!(store.is_grounded("c1").unwrap());
        assert_eq!(store.grounding_sources_of("c1").unwrap().len(), 2);
        assert_eq!(
            store.ontologies_of_concept("c1").unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn clear_preserves_vocabulary_and_claims() {
        let store = MemoryGraphStore::new();
        store.upsert_concept(&concept("c1"), WritePolicy::Skip).unwrap();
        store.upsert_source(&source("s1", "alpha"), WritePolicy::Skip).unwrap();
        store
            .acquire_claim("restore", "me", Duration::minutes(5))
            .unwrap();
        let vocab_before = store.vocabulary_count().unwrap();
        assert!(vocab_before > 0);

        store.clear_graph_data().unwrap();

        assert_eq!(store.concept_count().unwrap(), 0);
        assert_eq!(store.source_count().unwrap(), 0);
        assert_eq!(store.vocabulary_count().unwrap(), vocab_before);
        assert!(store.get_claim("restore").unwrap().is_some());
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let store = MemoryGraphStore::new();
        store
            .acquire_claim("restore", "worker-a", Duration::minutes(5))
            .unwrap();

        let denied = store.acquire_claim("restore", "worker-b", Duration::minutes(5));
        assert!(matches!(denied, Err(StoreError::ClaimHeld { .. })));

        // Same owner renews.
        store
            .acquire_claim("restore", "worker-a", Duration::minutes(5))
            .unwrap();

        store.release_claim("restore", "worker-a").unwrap();
        store
            .acquire_claim("restore", "worker-b", Duration::minutes(5))
            .unwrap();
    }

    #[test]
    fn expired_claim_can_be_taken_over() {
        let store = MemoryGraphStore::new();
        store
            .acquire_claim("restore", "worker-a", Duration::minutes(-1))
            .unwrap();
        store
            .acquire_claim("restore", "worker-b", Duration::minutes(5))
            .unwrap();
        assert_eq!(store.get_claim("restore").unwrap().unwrap().owner, "worker-b");
    }

    #[test]
    fn queued_fault_then_retry_succeeds() {
        let store = MemoryGraphStore::new();
        store.push_relationship_fault(StoreError::SchemaRace {
            kind: "relationship type",
            name: "CAUSES".into(),
        });
        let rel = relationship("a", "b");
        let applied =
            retry_once(|| store.upsert_relationship(&rel, WritePolicy::Overwrite)).unwrap();
        assert_eq!(applied, Applied::Created);
        assert_eq!(store.relationship_count().unwrap(), 1);
    }

    #[test]
    fn fuse_fires_after_armed_count() {
        let store = MemoryGraphStore::new();
        store.fail_relationship_writes_after(2);
        assert!(store
            .upsert_relationship(&relationship("a", "b"), WritePolicy::Overwrite)
            .is_ok());
        assert!(store
            .upsert_relationship(&relationship("b", "c"), WritePolicy::Overwrite)
            .is_ok());
        let third = store.upsert_relationship(&relationship("c", "d"), WritePolicy::Overwrite);
        assert!(matches!(third, Err(StoreError::Connectivity(_))));
    }
}
