//! Referential repair over the live store.
//!
//! Unlike the validator, which judges a document before it is applied,
//! the repairer walks the store itself: concepts that lost their
//! grounding edges, relationships whose endpoints no longer ground
//! anywhere, embeddings that went missing. Repairs only ever re-derive
//! state from surviving evidence — a grounding edge is reconstructed from
//! instances, never invented.

use crate::error::RestoreResult;
use ahash::AHashSet;
use conceptgraph_core::model::RelationshipKey;
use conceptgraph_core::store::GraphStore;
use serde::Serialize;
use std::collections::BTreeSet;

/// A concept with no grounding edge. Repairable iff surviving instances
/// still tie it to sources that exist.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanConcept {
    pub concept_id: String,
    pub label: String,
    /// Sources re-derivable from instances (empty means unrepairable).
    pub evidence_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanReport {
    pub orphans: Vec<OrphanConcept>,
    pub repairable: usize,
    pub repaired: usize,
    pub dry_run: bool,
}

/// A relationship with at least one wholly ungrounded endpoint — the
/// endpoint concept either does not exist or has no grounding edge
/// anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct DanglingRelationship {
    pub key: RelationshipKey,
    pub from_ungrounded: bool,
    pub to_ungrounded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    /// Ontology filter the scan ran under, if any.
    pub ontology: Option<String>,
    pub candidates: Vec<DanglingRelationship>,
    pub deleted: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingEmbeddingReport {
    /// Concepts whose embedding is absent or unusable (zero norm).
    pub concepts: Vec<String>,
    /// Vocabulary entries without an embedding.
    pub vocabulary: Vec<String>,
}

impl MissingEmbeddingReport {
    pub fn is_clean(&self) -> bool {
        self.concepts.is_empty() && self.vocabulary.is_empty()
    }
}

/// A relationship whose endpoints ground in disjoint ontology sets.
/// Informational: cross-ontology edges are legitimate, this just surfaces
/// them.
#[derive(Debug, Clone, Serialize)]
pub struct CrossOntologyRelationship {
    pub key: RelationshipKey,
    pub from_ontologies: Vec<String>,
    pub to_ontologies: Vec<String>,
}

pub struct ReferentialRepairer<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> ReferentialRepairer<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Orphans
    // ------------------------------------------------------------------

    pub fn find_orphans(&self) -> RestoreResult<Vec<OrphanConcept>> {
        let mut orphans = Vec::new();
        for concept in self.store.concepts()? {
            if self.store.is_grounded(&concept.concept_id)? {
                continue;
            }
            let mut evidence = BTreeSet::new();
            for instance in self.store.instances_of_concept(&concept.concept_id)? {
                // Only sources that still exist count as evidence.
                if self.store.get_source(&instance.source_id)?.is_some() {
                    evidence.insert(instance.source_id);
                }
            }
            orphans.push(OrphanConcept {
                concept_id: concept.concept_id,
                label: concept.label,
                evidence_sources: evidence.into_iter().collect(),
            });
        }
        orphans.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        Ok(orphans)
    }

    /// Re-derive grounding edges for repairable orphans. With `dry_run`
    /// the store is left untouched and the report only counts.
    pub fn repair_orphans(&self, dry_run: bool) -> RestoreResult<OrphanReport> {
        let orphans = self.find_orphans()?;
        let repairable = orphans
            .iter()
            .filter(|o| !o.evidence_sources.is_empty())
            .count();

        let mut repaired = 0;
        if !dry_run {
            for orphan in &orphans {
                if orphan.evidence_sources.is_empty() {
                    continue;
                }
                for source_id in &orphan.evidence_sources {
                    self.store
                        .link_concept_source(&orphan.concept_id, source_id)?;
                }
                repaired += 1;
                tracing::info!(
                    concept_id = %orphan.concept_id,
                    sources = orphan.evidence_sources.len(),
                    "re-derived grounding edges"
                );
            }
        }

        Ok(OrphanReport {
            orphans,
            repairable,
            repaired,
            dry_run,
        })
    }

    // ------------------------------------------------------------------
    // Dangling relationships
    // ------------------------------------------------------------------

    fn endpoint_ungrounded(&self, concept_id: &str) -> RestoreResult<bool> {
        if self.store.get_concept(concept_id)?.is_none() {
            return Ok(true);
        }
        Ok(!self.store.is_grounded(concept_id)?)
    }

    /// Relationships with an ungrounded endpoint. When `ontology` is
    /// given, inclusion is gated by the **origin** endpoint's ontology
    /// membership only — the far endpoint's ontology is deliberately not
    /// consulted. (Asymmetric on purpose; see the prune docs.)
    pub fn find_dangling(
        &self,
        ontology: Option<&str>,
    ) -> RestoreResult<Vec<DanglingRelationship>> {
        let mut dangling = Vec::new();
        for relationship in self.store.relationships()? {
            if let Some(ontology) = ontology {
                let origin_ontologies = self.store.ontologies_of_concept(&relationship.from)?;
                if !origin_ontologies.iter().any(|o| o == ontology) {
                    continue;
                }
            }
            let from_ungrounded = self.endpoint_ungrounded(&relationship.from)?;
            let to_ungrounded = self.endpoint_ungrounded(&relationship.to)?;
            if from_ungrounded || to_ungrounded {
                dangling.push(DanglingRelationship {
                    key: relationship.key(),
                    from_ungrounded,
                    to_ungrounded,
                });
            }
        }
        dangling.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(dangling)
    }

    /// Delete dangling relationships (or just report them on `dry_run`).
    /// Deterministic: everything reported is deleted, nothing else is
    /// touched.
    pub fn prune(&self, ontology: Option<&str>, dry_run: bool) -> RestoreResult<PruneReport> {
        let candidates = self.find_dangling(ontology)?;

        let mut deleted = 0;
        if !dry_run {
            for candidate in &candidates {
                if self.store.delete_relationship(&candidate.key)? {
                    deleted += 1;
                }
            }
            tracing::info!(deleted, ontology = ?ontology, "pruned dangling relationships");
        }

        Ok(PruneReport {
            ontology: ontology.map(str::to_string),
            candidates,
            deleted,
            dry_run,
        })
    }

    // ------------------------------------------------------------------
    // Report-only scans
    // ------------------------------------------------------------------

    /// Embeddings that are absent or unusable. Regeneration is an
    /// external concern; this only reports.
    pub fn find_missing_embeddings(&self) -> RestoreResult<MissingEmbeddingReport> {
        let mut concepts = Vec::new();
        for concept in self.store.concepts()? {
            let e = &concept.embedding;
            if e.is_empty() || e.iter().all(|x| *x == 0.0) {
                concepts.push(concept.concept_id);
            }
        }
        concepts.sort_unstable();

        let mut vocabulary = Vec::new();
        for entry in self.store.vocabulary()? {
            if entry.embedding.is_none() {
                vocabulary.push(entry.relationship_type);
            }
        }
        vocabulary.sort_unstable();

        Ok(MissingEmbeddingReport {
            concepts,
            vocabulary,
        })
    }

    /// Relationships bridging disjoint ontology sets. Informational only
    /// — never grounds for pruning.
    pub fn find_cross_ontology(&self) -> RestoreResult<Vec<CrossOntologyRelationship>> {
        let mut bridges = Vec::new();
        for relationship in self.store.relationships()? {
            let from_ontologies = self.store.ontologies_of_concept(&relationship.from)?;
            let to_ontologies = self.store.ontologies_of_concept(&relationship.to)?;
            if from_ontologies.is_empty() || to_ontologies.is_empty() {
                continue; // ungrounded endpoints are the pruner's business
            }
            let from_set: AHashSet<&str> = from_ontologies.iter().map(String::as_str).collect();
            if to_ontologies.iter().any(|o| from_set.contains(o.as_str())) {
                continue;
            }
            bridges.push(CrossOntologyRelationship {
                key: relationship.key(),
                from_ontologies,
                to_ontologies,
            });
        }
        bridges.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(bridges)
    }
}
