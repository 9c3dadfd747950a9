//! Export/import between a live store and the portable document.
//!
//! Export is a read-only scan; import applies sections in dependency
//! order (concepts → sources → vocabulary → instances → relationships).
//! Concepts and sources go in sequentially; instances and relationships
//! run on a small bounded pool because every write is an idempotent keyed
//! upsert, so no cross-item ordering is required. Transient store races
//! (lazy type creation, same-key conflicts) are retried exactly once.

use crate::document::{
    ScopeKind, SnapshotData, SnapshotDocument, SnapshotScope, SNAPSHOT_VERSION,
};
use crate::error::{SnapshotError, SnapshotResult};
use ahash::AHashSet;
use chrono::Utc;
use conceptgraph_core::progress::{JobProgressSink, ProgressThrottle};
use conceptgraph_core::store::{retry_once, Applied, GraphStore, WritePolicy};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default width of the instance/relationship worker pool.
pub const DEFAULT_WORKER_WIDTH: usize = 2;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub policy: WritePolicy,
    pub worker_width: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            policy: WritePolicy::Skip,
            worker_width: DEFAULT_WORKER_WIDTH,
        }
    }
}

impl ImportOptions {
    pub fn overwrite() -> Self {
        Self {
            policy: WritePolicy::Overwrite,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl SectionCounts {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Created => self.created += 1,
            Applied::Updated => self.updated += 1,
            Applied::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped
    }
}

/// Per-section outcome of an import, machine-readable for scripted
/// follow-up.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportSummary {
    pub concepts: SectionCounts,
    pub sources: SectionCounts,
    pub vocabulary: SectionCounts,
    pub instances: SectionCounts,
    pub relationships: SectionCounts,
    pub grounding_edges: u64,
}

#[derive(Default)]
struct AtomicSection {
    created: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
}

impl AtomicSection {
    fn record(&self, applied: Applied) {
        let slot = match applied {
            Applied::Created => &self.created,
            Applied::Updated => &self.updated,
            Applied::Skipped => &self.skipped,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SectionCounts {
        SectionCounts {
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

pub struct SnapshotCodec<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> SnapshotCodec<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Read the requested scope into a portable document. Sections are
    /// sorted by id so identical graphs export identical documents.
    pub fn export(&self, scope: &SnapshotScope) -> SnapshotResult<SnapshotDocument> {
        let mut data = match scope {
            SnapshotScope::Full => SnapshotData {
                concepts: self.store.concepts()?,
                sources: self.store.sources()?,
                instances: self.store.instances()?,
                relationships: self.store.relationships()?,
                vocabulary: Some(self.store.vocabulary()?),
            },
            SnapshotScope::Ontology(name) => self.export_ontology(name)?,
        };

        data.concepts.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        data.sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        data.instances
            .sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        data.relationships.sort_by_key(|r| r.key());
        if let Some(vocabulary) = data.vocabulary.as_mut() {
            vocabulary.sort_by(|a, b| a.relationship_type.cmp(&b.relationship_type));
        }

        let mut document = SnapshotDocument {
            version: SNAPSHOT_VERSION.to_string(),
            scope: match scope {
                SnapshotScope::Full => ScopeKind::Full,
                SnapshotScope::Ontology(_) => ScopeKind::Ontology,
            },
            ontology: scope.ontology().map(str::to_string),
            timestamp: Utc::now(),
            schema_version: Some(1),
            statistics: Default::default(),
            data,
        };
        document.statistics = document.actual_statistics();

        tracing::info!(
            scope = %scope,
            concepts = document.statistics.concepts,
            relationships = document.statistics.relationships,
            "exported snapshot"
        );
        Ok(document)
    }

    /// Ontology scoping: the ontology's sources and instances, concepts
    /// grounded in those sources, and every relationship whose **origin**
    /// concept is local — even when the far endpoint is not. The
    /// resulting torn references are the reconciler's raw material.
    fn export_ontology(&self, ontology: &str) -> SnapshotResult<SnapshotData> {
        let sources = self.store.sources_in_ontology(ontology)?;
        let source_ids: AHashSet<&str> = sources.iter().map(|s| s.source_id.as_str()).collect();

        let mut concepts = Vec::new();
        for concept in self.store.concepts()? {
            let grounded_here = self
                .store
                .grounding_sources_of(&concept.concept_id)?
                .iter()
                .any(|sid| source_ids.contains(sid.as_str()));
            if grounded_here {
                concepts.push(concept);
            }
        }
        let concept_ids: AHashSet<&str> =
            concepts.iter().map(|c| c.concept_id.as_str()).collect();

        let instances = self
            .store
            .instances()?
            .into_iter()
            .filter(|i| source_ids.contains(i.source_id.as_str()))
            .collect();

        let relationships = self
            .store
            .relationships()?
            .into_iter()
            .filter(|r| concept_ids.contains(r.from.as_str()))
            .collect();

        Ok(SnapshotData {
            concepts,
            sources,
            instances,
            relationships,
            vocabulary: Some(self.store.vocabulary()?),
        })
    }

    // ------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------

    /// Apply a document to the store. Fails before any mutation if the
    /// document's shape is unusable; aborts on the first apply error with
    /// no attempt to unwind (that is the restore coordinator's job).
    pub fn import(
        &self,
        document: &SnapshotDocument,
        options: &ImportOptions,
        progress: &dyn JobProgressSink,
    ) -> SnapshotResult<ImportSummary> {
        if !document.version_supported() {
            return Err(SnapshotError::UnsupportedVersion(document.version.clone()));
        }
        document.effective_scope()?;

        let policy = options.policy;
        let mut summary = ImportSummary::default();

        // Concepts, sources, and vocabulary go in sequentially: small
        // volumes, and everything after depends on them.
        let concepts = &document.data.concepts;
        let throttle = ProgressThrottle::new(progress, "concepts", concepts.len() as u64);
        for (i, concept) in concepts.iter().enumerate() {
            let applied = retry_once(|| self.store.upsert_concept(concept, policy))?;
            summary.concepts.record(applied);
            throttle.tick(i as u64 + 1);
        }

        let sources = &document.data.sources;
        let throttle = ProgressThrottle::new(progress, "sources", sources.len() as u64);
        for (i, source) in sources.iter().enumerate() {
            let applied = retry_once(|| self.store.upsert_source(source, policy))?;
            summary.sources.record(applied);
            throttle.tick(i as u64 + 1);
        }

        if let Some(vocabulary) = &document.data.vocabulary {
            let throttle = ProgressThrottle::new(progress, "vocabulary", vocabulary.len() as u64);
            for (i, entry) in vocabulary.iter().enumerate() {
                let applied = retry_once(|| self.store.upsert_vocabulary_entry(entry, policy))?;
                summary.vocabulary.record(applied);
                throttle.tick(i as u64 + 1);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.worker_width.max(1))
            .build()
            .map_err(|e| SnapshotError::Pool(e.to_string()))?;

        // Instances: upsert plus grounding-edge derivation, both keyed
        // and idempotent, so pool ordering is immaterial.
        let instances = &document.data.instances;
        let counts = AtomicSection::default();
        let edges = AtomicU64::new(0);
        let done = AtomicU64::new(0);
        let throttle = ProgressThrottle::new(progress, "instances", instances.len() as u64);
        pool.install(|| {
            instances.par_iter().try_for_each(|instance| {
                let applied = retry_once(|| self.store.upsert_instance(instance, policy))?;
                retry_once(|| {
                    self.store
                        .link_concept_source(&instance.concept_id, &instance.source_id)
                })?;
                counts.record(applied);
                edges.fetch_add(1, Ordering::Relaxed);
                throttle.tick(done.fetch_add(1, Ordering::Relaxed) + 1);
                Ok::<(), SnapshotError>(())
            })
        })?;
        summary.instances = counts.snapshot();
        summary.grounding_edges = edges.load(Ordering::Relaxed);

        let relationships = &document.data.relationships;
        let counts = AtomicSection::default();
        let done = AtomicU64::new(0);
        let throttle =
            ProgressThrottle::new(progress, "relationships", relationships.len() as u64);
        pool.install(|| {
            relationships.par_iter().try_for_each(|relationship| {
                let applied =
                    retry_once(|| self.store.upsert_relationship(relationship, policy))?;
                counts.record(applied);
                throttle.tick(done.fetch_add(1, Ordering::Relaxed) + 1);
                Ok::<(), SnapshotError>(())
            })
        })?;
        summary.relationships = counts.snapshot();

        tracing::info!(
            concepts = summary.concepts.total(),
            relationships = summary.relationships.total(),
            "imported snapshot"
        );
        Ok(summary)
    }
}
