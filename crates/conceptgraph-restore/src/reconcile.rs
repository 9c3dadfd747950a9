//! Semantic reconciliation of torn references.
//!
//! An ontology-scoped snapshot deliberately keeps relationships whose
//! origin is local even when the far endpoint is not. After such a
//! document is imported, those endpoints reference concepts the document
//! never carried. This module guarantees each of them ends in exactly one
//! terminal state:
//!
//! 1. **matched** — a semantically equivalent concept exists in the
//!    target store; every referencing edge is rewritten onto it;
//! 2. **placeholder** — no match, but the caller asked for minimal
//!    flagged stand-in concepts;
//! 3. **pruned** — whatever is still unmatched and unplaceholdered is
//!    deleted at the end of restore.
//!
//! Nothing is ever left silently dangling.
//!
//! Matching embeds each external reference (see the resolution ladder on
//! [`SemanticReconciler::plan`]) and takes the nearest store concept by
//! cosine similarity, accepting only scores at or above the caller's
//! threshold. A below-threshold best candidate is recorded, not accepted:
//! ambiguity is data, not an error.

use crate::error::RestoreResult;
use ahash::AHashMap;
use conceptgraph_core::ann::ConceptIndex;
use conceptgraph_core::model::{Concept, Relationship, RelationshipKey};
use conceptgraph_core::similarity::centroid;
use conceptgraph_core::store::{retry_once, GraphStore, WritePolicy};
use conceptgraph_core::SimilarityError;
use conceptgraph_snapshot::SnapshotDocument;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.95;

/// Search-terms tag carried by placeholder concepts.
pub const PLACEHOLDER_TAG: &str = "unresolved-external-reference";

/// Caller-supplied embedding for a reference label (an embedding service
/// lives outside this workspace).
pub type LabelEmbedder = Box<dyn Fn(&str) -> anyhow::Result<Vec<f32>> + Send + Sync>;

pub struct ReconcilerOptions {
    /// Minimum similarity to accept a match.
    pub threshold: f32,
    /// Similarity at or above which a match is tiered High.
    pub high_confidence: f32,
    pub label_embedder: Option<LabelEmbedder>,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            high_confidence: HIGH_CONFIDENCE_THRESHOLD,
            label_embedder: None,
        }
    }
}

/// A concept id referenced by the document but absent from its concept
/// list, with everything that references it.
#[derive(Debug, Clone, Serialize)]
pub struct ExternalRef {
    pub concept_id: String,
    /// Derivable label, when the exporter recorded one on a referencing
    /// relationship (`from_label`/`to_label` properties).
    pub label: Option<String>,
    pub relationships: Vec<RelationshipKey>,
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchTier {
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedRef {
    pub reference: ExternalRef,
    pub target_concept_id: String,
    pub similarity: f32,
    pub tier: MatchTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnmatchedReason {
    /// The target store holds no concepts at all.
    NoCandidates,
    /// A best candidate existed but scored below the threshold.
    BelowThreshold,
    /// No embedding was derivable for the reference.
    NoEmbedding,
    /// The derived embedding's dimension disagrees with the store's.
    DimensionMismatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedCandidate {
    pub concept_id: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedRef {
    pub reference: ExternalRef,
    pub reason: UnmatchedReason,
    /// The best candidate that was *not* accepted — recorded so an
    /// operator can lower the threshold deliberately, never silently.
    pub best_rejected: Option<RejectedCandidate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationStats {
    pub external_refs: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub high_confidence: u64,
    pub medium_confidence: u64,
    /// Nearest-neighbor queries actually issued. Zero when the store is
    /// empty or the document has no torn references.
    pub similarity_queries: u64,
}

/// The plan presented for operator approval or auto-apply.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationPlan {
    pub matched: Vec<MatchedRef>,
    pub unmatched: Vec<UnmatchedRef>,
    pub stats: ReconciliationStats,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.matched.is_empty() && self.unmatched.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub relationships_rewritten: u64,
    pub instances_rewritten: u64,
    pub placeholders_created: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeftoverPrune {
    pub relationships_pruned: u64,
    pub instances_pruned: u64,
}

pub struct SemanticReconciler<'a> {
    store: &'a dyn GraphStore,
    options: ReconcilerOptions,
}

impl<'a> SemanticReconciler<'a> {
    pub fn new(store: &'a dyn GraphStore, options: ReconcilerOptions) -> Self {
        Self { store, options }
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    /// Collect the document's external references: concept ids used by
    /// instances or relationship endpoints but absent from its concept
    /// list. Pure over the document; deterministic order.
    pub fn scan(document: &SnapshotDocument) -> Vec<ExternalRef> {
        let local: ahash::AHashSet<&str> = document
            .data
            .concepts
            .iter()
            .map(|c| c.concept_id.as_str())
            .collect();

        let mut refs: BTreeMap<String, ExternalRef> = BTreeMap::new();

        for instance in &document.data.instances {
            if let Some(r) = touch_external(&mut refs, &local, &instance.concept_id) {
                r.instances.push(instance.instance_id.clone());
            }
        }
        for relationship in &document.data.relationships {
            let key = relationship.key();
            if let Some(r) = touch_external(&mut refs, &local, &relationship.from) {
                r.relationships.push(key.clone());
                if r.label.is_none() {
                    r.label = property_label(relationship, "from_label");
                }
            }
            if let Some(r) = touch_external(&mut refs, &local, &relationship.to) {
                r.relationships.push(key);
                if r.label.is_none() {
                    r.label = property_label(relationship, "to_label");
                }
            }
        }

        refs.into_values().collect()
    }

    // ------------------------------------------------------------------
    // Plan
    // ------------------------------------------------------------------

    /// Build the reconciliation plan. Embeddings for each reference are
    /// derived by a fixed ladder:
    ///
    /// 1. the target store already holds the exact concept id — a shared
    ///    concept re-found after a scoped restore; direct match at 1.0,
    ///    no similarity query;
    /// 2. a caller-supplied label embedder plus a derivable label;
    /// 3. the centroid of in-document neighbor concept embeddings;
    /// 4. nothing derivable — unmatched.
    ///
    /// With zero external references the plan is a no-op; with an empty
    /// target store every reference is unmatched and no similarity is
    /// computed at all.
    pub fn plan(&self, document: &SnapshotDocument) -> RestoreResult<ReconciliationPlan> {
        let refs = Self::scan(document);
        let mut stats = ReconciliationStats {
            external_refs: refs.len() as u64,
            ..Default::default()
        };
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();

        if refs.is_empty() {
            return Ok(ReconciliationPlan {
                matched,
                unmatched,
                stats,
            });
        }

        // Candidates are the concepts that were already in the target
        // store before this document arrived. The document's own concepts
        // are excluded: by the time reconciliation runs they have been
        // imported, and a torn reference must never "match" one of its
        // own neighbors.
        let index = {
            let local: ahash::AHashSet<&str> = document
                .data
                .concepts
                .iter()
                .map(|c| c.concept_id.as_str())
                .collect();
            let mut candidates = self.store.concepts()?;
            candidates.retain(|c| !local.contains(c.concept_id.as_str()));
            if candidates.is_empty() {
                None
            } else {
                Some(ConceptIndex::build(&candidates))
            }
        };

        let doc_embeddings: AHashMap<&str, &[f32]> = document
            .data
            .concepts
            .iter()
            .map(|c| (c.concept_id.as_str(), c.embedding.as_slice()))
            .collect();

        for reference in refs {
            // Ladder rung 1: exact id already present in the store.
            if self.store.get_concept(&reference.concept_id)?.is_some() {
                stats.matched += 1;
                stats.high_confidence += 1;
                let target_concept_id = reference.concept_id.clone();
                matched.push(MatchedRef {
                    reference,
                    target_concept_id,
                    similarity: 1.0,
                    tier: MatchTier::High,
                });
                continue;
            }

            let Some(index) = index.as_ref() else {
                stats.unmatched += 1;
                unmatched.push(UnmatchedRef {
                    reference,
                    reason: UnmatchedReason::NoCandidates,
                    best_rejected: None,
                });
                continue;
            };

            let Some(embedding) = self.derive_embedding(&reference, &doc_embeddings) else {
                stats.unmatched += 1;
                unmatched.push(UnmatchedRef {
                    reference,
                    reason: UnmatchedReason::NoEmbedding,
                    best_rejected: None,
                });
                continue;
            };

            stats.similarity_queries += 1;
            match index.best_match(&embedding) {
                Ok(Some(best)) if best.similarity >= self.options.threshold => {
                    let tier = if best.similarity >= self.options.high_confidence {
                        stats.high_confidence += 1;
                        MatchTier::High
                    } else {
                        stats.medium_confidence += 1;
                        MatchTier::Medium
                    };
                    stats.matched += 1;
                    matched.push(MatchedRef {
                        reference,
                        target_concept_id: best.concept_id,
                        similarity: best.similarity,
                        tier,
                    });
                }
                Ok(Some(best)) => {
                    stats.unmatched += 1;
                    unmatched.push(UnmatchedRef {
                        reference,
                        reason: UnmatchedReason::BelowThreshold,
                        best_rejected: Some(RejectedCandidate {
                            concept_id: best.concept_id,
                            similarity: best.similarity,
                        }),
                    });
                }
                Ok(None) => {
                    stats.unmatched += 1;
                    unmatched.push(UnmatchedRef {
                        reference,
                        reason: UnmatchedReason::NoCandidates,
                        best_rejected: None,
                    });
                }
                Err(SimilarityError::DimensionMismatch { left, right }) => {
                    tracing::warn!(
                        concept_id = %reference.concept_id,
                        derived = left,
                        store = right,
                        "derived embedding dimension disagrees with store"
                    );
                    stats.unmatched += 1;
                    unmatched.push(UnmatchedRef {
                        reference,
                        reason: UnmatchedReason::DimensionMismatch,
                        best_rejected: None,
                    });
                }
                // A derived centroid can cancel out to zero norm; that
                // reference simply has no usable embedding.
                Err(SimilarityError::ZeroNorm) | Err(SimilarityError::Empty) => {
                    stats.unmatched += 1;
                    unmatched.push(UnmatchedRef {
                        reference,
                        reason: UnmatchedReason::NoEmbedding,
                        best_rejected: None,
                    });
                }
            }
        }

        tracing::info!(
            external_refs = stats.external_refs,
            matched = stats.matched,
            unmatched = stats.unmatched,
            "reconciliation plan built"
        );
        Ok(ReconciliationPlan {
            matched,
            unmatched,
            stats,
        })
    }

    /// Ladder rungs 2 and 3 (rung 1 short-circuits in `plan`).
    fn derive_embedding(
        &self,
        reference: &ExternalRef,
        doc_embeddings: &AHashMap<&str, &[f32]>,
    ) -> Option<Vec<f32>> {
        if let (Some(embedder), Some(label)) =
            (self.options.label_embedder.as_ref(), reference.label.as_deref())
        {
            match embedder(label) {
                Ok(embedding) if !embedding.is_empty() => return Some(embedding),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(label, error = %e, "label embedder failed, falling back");
                }
            }
        }

        let mut neighbors: Vec<&[f32]> = Vec::new();
        for key in &reference.relationships {
            for endpoint in [key.from.as_str(), key.to.as_str()] {
                if endpoint == reference.concept_id {
                    continue;
                }
                if let Some(embedding) = doc_embeddings.get(endpoint).copied() {
                    if !embedding.is_empty() && embedding.iter().any(|x| *x != 0.0) {
                        neighbors.push(embedding);
                    }
                }
            }
        }
        centroid(neighbors).ok()
    }

    // ------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------

    /// Execute a plan: rewrite every referencing relationship and
    /// instance of each matched reference onto its target (idempotent
    /// upserts, type and direction preserved), and optionally create
    /// placeholder concepts for the unmatched. Leftover pruning is a
    /// separate, final step ([`Self::prune_leftovers`]).
    pub fn apply(
        &self,
        plan: &ReconciliationPlan,
        create_placeholders: bool,
    ) -> RestoreResult<ReconciliationOutcome> {
        let mut outcome = ReconciliationOutcome::default();
        // A relationship may carry two external endpoints; rewriting one
        // changes its key, so later rewrites chase the alias chain.
        let mut moved: AHashMap<RelationshipKey, RelationshipKey> = AHashMap::new();

        for m in &plan.matched {
            if m.reference.concept_id == m.target_concept_id {
                // Direct id match: references already resolve.
                continue;
            }
            for original_key in &m.reference.relationships {
                let key = resolve_alias(&moved, original_key);
                let Some(current) = self.store.get_relationship(&key)? else {
                    continue;
                };
                let mut rewritten = current.clone();
                if rewritten.from == m.reference.concept_id {
                    rewritten.from = m.target_concept_id.clone();
                }
                if rewritten.to == m.reference.concept_id {
                    rewritten.to = m.target_concept_id.clone();
                }
                retry_once(|| {
                    self.store
                        .upsert_relationship(&rewritten, WritePolicy::Overwrite)
                })?;
                let new_key = rewritten.key();
                if new_key != key {
                    self.store.delete_relationship(&key)?;
                    moved.insert(key, new_key);
                }
                outcome.relationships_rewritten += 1;
            }
            for instance_id in &m.reference.instances {
                let Some(mut instance) = self.store.get_instance(instance_id)? else {
                    continue;
                };
                instance.concept_id = m.target_concept_id.clone();
                retry_once(|| self.store.upsert_instance(&instance, WritePolicy::Overwrite))?;
                retry_once(|| {
                    self.store
                        .link_concept_source(&m.target_concept_id, &instance.source_id)
                })?;
                outcome.instances_rewritten += 1;
            }
        }

        if create_placeholders {
            for u in &plan.unmatched {
                let placeholder = Concept {
                    concept_id: u.reference.concept_id.clone(),
                    label: u
                        .reference
                        .label
                        .clone()
                        .unwrap_or_else(|| u.reference.concept_id.clone()),
                    search_terms: vec![PLACEHOLDER_TAG.to_string()],
                    // Left empty on purpose: placeholders surface in the
                    // missing-embedding report until a real embedding is
                    // generated for them.
                    embedding: Vec::new(),
                };
                // Skip, never Overwrite: a real concept upserted since
                // planning must win.
                retry_once(|| self.store.upsert_concept(&placeholder, WritePolicy::Skip))?;
                outcome.placeholders_created += 1;
            }
        }

        Ok(outcome)
    }

    /// Final sweep: delete everything still referencing an external id
    /// that neither matched nor received a placeholder. Works off the
    /// store, not the recorded keys, so earlier rewrites cannot hide a
    /// leftover.
    pub fn prune_leftovers(&self, unmatched: &[UnmatchedRef]) -> RestoreResult<LeftoverPrune> {
        let mut pruned = LeftoverPrune::default();
        for u in unmatched {
            // A concept with this id now exists (placeholder, or written
            // concurrently): the references resolve, nothing to prune.
            if self.store.get_concept(&u.reference.concept_id)?.is_some() {
                continue;
            }
            for relationship in self.store.relationships_touching(&u.reference.concept_id)? {
                if self.store.delete_relationship(&relationship.key())? {
                    pruned.relationships_pruned += 1;
                }
            }
            for instance in self.store.instances_of_concept(&u.reference.concept_id)? {
                if self.store.delete_instance(&instance.instance_id)? {
                    pruned.instances_pruned += 1;
                }
            }
        }
        if pruned.relationships_pruned > 0 || pruned.instances_pruned > 0 {
            tracing::info!(
                relationships = pruned.relationships_pruned,
                instances = pruned.instances_pruned,
                "pruned unreconciled external references"
            );
        }
        Ok(pruned)
    }
}

fn touch_external<'m>(
    refs: &'m mut BTreeMap<String, ExternalRef>,
    local: &ahash::AHashSet<&str>,
    id: &str,
) -> Option<&'m mut ExternalRef> {
    if local.contains(id) {
        return None;
    }
    Some(refs.entry(id.to_string()).or_insert_with(|| ExternalRef {
        concept_id: id.to_string(),
        label: None,
        relationships: Vec::new(),
        instances: Vec::new(),
    }))
}

fn property_label(relationship: &Relationship, key: &str) -> Option<String> {
    relationship
        .properties
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn resolve_alias(
    moved: &AHashMap<RelationshipKey, RelationshipKey>,
    key: &RelationshipKey,
) -> RelationshipKey {
    let mut current = key.clone();
    while let Some(next) = moved.get(&current) {
        current = next.clone();
    }
    current
}
