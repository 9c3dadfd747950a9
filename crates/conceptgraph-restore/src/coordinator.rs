//! Restore orchestration.
//!
//! One run moves through a fixed phase sequence:
//!
//! ```text
//! CreatingCheckpoint → LoadingSnapshot → Validating
//!     → (ClearingStore, Full only) → Applying
//!     → (RestoringBlobs, archive inputs)
//!     → (ReconcilingExternalRefs, Ontology only, if requested)
//!     → Verifying → Committed | RolledBack
//! ```
//!
//! The checkpoint is unconditional: even an ontology-scoped restore
//! upserts shared concepts and can therefore affect other ontologies.
//! Validation runs strictly before ClearingStore so a bad document aborts
//! with zero mutation. Any failure after clearing begins re-imports the
//! checkpoint in Overwrite mode *without* clearing first — an additive
//! re-merge is safer than a second destructive clear that could itself
//! fail midway. The checkpoint file survives a rollback for forensic
//! inspection; commit is the only path that deletes it.
//!
//! Exactly one run per store is enforced through the store-resident claim
//! row, so the invariant holds across process restarts. There is no
//! mid-flight cancellation: callers wanting out let the run finish and
//! then restore the checkpoint — deliberately the same code path as
//! rollback.

use crate::checkpoint::{CheckpointHandle, CheckpointManager};
use crate::error::{RestoreError, RestoreResult};
use crate::reconcile::{
    LeftoverPrune, ReconcilerOptions, ReconciliationOutcome, ReconciliationStats,
    SemanticReconciler,
};
use chrono::Duration;
use conceptgraph_core::blob::BlobStore;
use conceptgraph_core::jobs::{JobPatch, JobQueue};
use conceptgraph_core::progress::{JobProgressSink, NoopProgress};
use conceptgraph_core::store::{
    store_counts, GraphStore, StoreCounts, WritePolicy, RESTORE_CLAIM_KEY,
};
use conceptgraph_core::StoreError;
use conceptgraph_snapshot::{
    extract, ExtractedArchive, ImportOptions, ImportSummary, IntegrityValidator, SnapshotCodec,
    SnapshotDocument, SnapshotScope, ValidationReport, DEFAULT_WORKER_WIDTH,
};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    CreatingCheckpoint,
    LoadingSnapshot,
    Validating,
    ClearingStore,
    Applying,
    RestoringBlobs,
    ReconcilingExternalRefs,
    Verifying,
    Committed,
    RolledBack,
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RestorePhase::CreatingCheckpoint => "creating_checkpoint",
            RestorePhase::LoadingSnapshot => "loading_snapshot",
            RestorePhase::Validating => "validating",
            RestorePhase::ClearingStore => "clearing_store",
            RestorePhase::Applying => "applying",
            RestorePhase::RestoringBlobs => "restoring_blobs",
            RestorePhase::ReconcilingExternalRefs => "reconciling_external_refs",
            RestorePhase::Verifying => "verifying",
            RestorePhase::Committed => "committed",
            RestorePhase::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Where the snapshot comes from.
pub enum RestoreInput {
    /// A bare document file.
    Document(PathBuf),
    /// An archive container (document + blob payloads).
    Archive(PathBuf),
    /// An already-parsed document.
    Parsed(SnapshotDocument),
}

pub struct RestoreOptions {
    pub policy: WritePolicy,
    pub worker_width: usize,
    /// Run semantic reconciliation after an ontology-scoped apply.
    pub reconcile: bool,
    pub reconcile_threshold: f32,
    /// Create flagged placeholder concepts for unmatched references
    /// instead of leaving them to the final prune.
    pub create_placeholders: bool,
    pub checkpoint_dir: PathBuf,
    /// Claim owner id; generated per run when unset.
    pub claim_owner: Option<String>,
    pub claim_ttl_minutes: i64,
}

impl RestoreOptions {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy: WritePolicy::Overwrite,
            worker_width: DEFAULT_WORKER_WIDTH,
            reconcile: false,
            reconcile_threshold: crate::reconcile::DEFAULT_SIMILARITY_THRESHOLD,
            create_placeholders: false,
            checkpoint_dir: checkpoint_dir.into(),
            claim_owner: None,
            claim_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlobRestoreCounts {
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub stats: ReconciliationStats,
    pub outcome: ReconciliationOutcome,
    pub leftovers: LeftoverPrune,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Committed,
    RolledBack { apply_error: String },
}

/// Terminal result of a run, counts included, machine-readable.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub outcome: RestoreOutcome,
    pub scope: String,
    pub checkpoint_path: String,
    /// Store counts at checkpoint time (the rollback target).
    pub checkpoint_counts: StoreCounts,
    pub validation: ValidationReport,
    pub import: Option<ImportSummary>,
    pub blobs: Option<BlobRestoreCounts>,
    pub reconciliation: Option<ReconciliationReport>,
    pub verified_counts: Option<StoreCounts>,
    /// Rollback re-merges the checkpoint without clearing first, so
    /// entities created by the failed apply before its failure point can
    /// survive as orphaned leftovers (run the repairer to find them).
    pub rolled_back_additively: bool,
}

/// Releases the restore claim on every exit path.
struct ClaimGuard<'a> {
    store: &'a dyn GraphStore,
    owner: String,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_claim(RESTORE_CLAIM_KEY, &self.owner) {
            tracing::warn!(error = %e, "failed to release restore claim");
        }
    }
}

static NOOP_PROGRESS: NoopProgress = NoopProgress;

pub struct RestoreCoordinator<'a> {
    store: &'a dyn GraphStore,
    options: RestoreOptions,
    blob_store: Option<&'a dyn BlobStore>,
    progress: &'a dyn JobProgressSink,
    job_queue: Option<&'a dyn JobQueue>,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(store: &'a dyn GraphStore, options: RestoreOptions) -> Self {
        Self {
            store,
            options,
            blob_store: None,
            progress: &NOOP_PROGRESS,
            job_queue: None,
        }
    }

    pub fn with_blob_store(mut self, blob_store: &'a dyn BlobStore) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn JobProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_job_queue(mut self, job_queue: &'a dyn JobQueue) -> Self {
        self.job_queue = Some(job_queue);
        self
    }

    /// Run one restore to a terminal state. `Ok` covers both Committed
    /// and RolledBack (the report says which); `Err` covers everything
    /// that aborted before mutation, plus the fatal rollback-failed case.
    pub fn run(&self, input: RestoreInput) -> RestoreResult<RestoreReport> {
        let owner = self
            .options
            .claim_owner
            .clone()
            .unwrap_or_else(|| format!("restore-{}", Uuid::new_v4().simple()));
        match self.store.acquire_claim(
            RESTORE_CLAIM_KEY,
            &owner,
            Duration::minutes(self.options.claim_ttl_minutes),
        ) {
            Ok(_) => {}
            Err(StoreError::ClaimHeld { owner, .. }) => {
                return Err(RestoreError::AlreadyRunning { owner });
            }
            Err(e) => return Err(e.into()),
        }
        let _claim = ClaimGuard {
            store: self.store,
            owner,
        };

        let job_id = match self.job_queue {
            Some(queue) => Some(
                queue
                    .enqueue("graph_restore", serde_json::json!({}))
                    .map_err(|e| RestoreError::Job(e.to_string()))?,
            ),
            None => None,
        };

        let result = self.run_inner(input, job_id.as_deref());
        if let (Some(queue), Some(id)) = (self.job_queue, job_id.as_deref()) {
            let message = match &result {
                Ok(report) => match &report.outcome {
                    RestoreOutcome::Committed => "committed".to_string(),
                    RestoreOutcome::RolledBack { .. } => "rolled_back".to_string(),
                },
                Err(e) => format!("failed: {e}"),
            };
            if let Err(e) = queue.update(
                id,
                JobPatch {
                    message: Some(message),
                    ..JobPatch::default()
                },
            ) {
                tracing::warn!(error = %e, "final job update failed");
            }
        }
        result
    }

    fn run_inner(
        &self,
        input: RestoreInput,
        job: Option<&str>,
    ) -> RestoreResult<RestoreReport> {
        self.note_phase(RestorePhase::CreatingCheckpoint, job);
        let manager = CheckpointManager::new(&self.options.checkpoint_dir);
        let checkpoint = manager
            .create(self.store)
            .map_err(|e| RestoreError::Checkpoint(Box::new(e)))?;

        self.note_phase(RestorePhase::LoadingSnapshot, job);
        let (document, extracted) = match input {
            RestoreInput::Parsed(document) => (document, None),
            RestoreInput::Document(path) => (
                SnapshotDocument::load(&path).map_err(|e| RestoreError::Load(Box::new(e)))?,
                None,
            ),
            RestoreInput::Archive(path) => {
                let extracted = extract(&path).map_err(|e| RestoreError::Load(Box::new(e)))?;
                (extracted.document.clone(), Some(extracted))
            }
        };
        let scope = document
            .effective_scope()
            .map_err(|e| RestoreError::Load(Box::new(e)))?;

        self.note_phase(RestorePhase::Validating, job);
        let validation = IntegrityValidator::validate(&document);
        if !validation.valid {
            cleanup_extraction(extracted);
            tracing::error!(
                errors = validation.errors.len(),
                checkpoint = %checkpoint.path().display(),
                "validation failed; nothing was applied"
            );
            return Err(RestoreError::Validation { report: validation });
        }
        for warning in &validation.warnings {
            tracing::warn!(warning = %warning, "validation warning");
        }

        // Destructive section. Everything in here is covered by the
        // checkpoint: first failure triggers rollback.
        let import_options = ImportOptions {
            policy: self.options.policy,
            worker_width: self.options.worker_width,
        };
        let destructive = || -> Result<(ImportSummary, Option<ReconciliationReport>), String> {
            if scope.is_full() {
                self.note_phase(RestorePhase::ClearingStore, job);
                // Vocabulary is an additive namespace and survives the
                // clear; so does the claim row.
                self.store.clear_graph_data().map_err(|e| e.to_string())?;
            }

            self.note_phase(RestorePhase::Applying, job);
            let summary = SnapshotCodec::new(self.store)
                .import(&document, &import_options, self.progress)
                .map_err(|e| e.to_string())?;

            let reconciliation = match &scope {
                SnapshotScope::Ontology(_) if self.options.reconcile => {
                    self.note_phase(RestorePhase::ReconcilingExternalRefs, job);
                    let reconciler = SemanticReconciler::new(
                        self.store,
                        ReconcilerOptions {
                            threshold: self.options.reconcile_threshold,
                            ..ReconcilerOptions::default()
                        },
                    );
                    let plan = reconciler.plan(&document).map_err(|e| e.to_string())?;
                    let outcome = reconciler
                        .apply(&plan, self.options.create_placeholders)
                        .map_err(|e| e.to_string())?;
                    // Whatever stayed unmatched and unplaceholdered is
                    // pruned, unconditionally: no silent dangling edges.
                    let leftovers = reconciler
                        .prune_leftovers(&plan.unmatched)
                        .map_err(|e| e.to_string())?;
                    Some(ReconciliationReport {
                        stats: plan.stats,
                        outcome,
                        leftovers,
                    })
                }
                _ => None,
            };
            Ok((summary, reconciliation))
        };

        let (import, reconciliation) = match destructive() {
            Ok(result) => result,
            Err(apply_error) => {
                return self.rollback(checkpoint, apply_error, extracted, validation, &scope, job);
            }
        };

        // Blob payloads are an independent best-effort side effect, not
        // covered by rollback.
        let blobs = extracted.as_ref().map(|archive| {
            self.note_phase(RestorePhase::RestoringBlobs, job);
            self.restore_blobs(archive)
        });

        self.note_phase(RestorePhase::Verifying, job);
        let verified = store_counts(self.store)?;
        if scope.is_full() {
            let expected = document.actual_statistics();
            if verified.concepts != expected.concepts
                || verified.sources != expected.sources
                || verified.instances != expected.instances
            {
                tracing::warn!(
                    ?verified,
                    ?expected,
                    "post-restore counts disagree with the document"
                );
            }
        }

        self.note_phase(RestorePhase::Committed, job);
        let checkpoint_path = checkpoint.path().display().to_string();
        let checkpoint_counts = checkpoint.counts();
        if let Err(e) = checkpoint.delete() {
            tracing::warn!(error = %e, "committed, but deleting the checkpoint failed");
        }
        cleanup_extraction(extracted);

        Ok(RestoreReport {
            outcome: RestoreOutcome::Committed,
            scope: scope.to_string(),
            checkpoint_path,
            checkpoint_counts,
            validation,
            import: Some(import),
            blobs,
            reconciliation,
            verified_counts: Some(verified),
            rolled_back_additively: false,
        })
    }

    fn rollback(
        &self,
        checkpoint: CheckpointHandle,
        apply_error: String,
        extracted: Option<ExtractedArchive>,
        validation: ValidationReport,
        scope: &SnapshotScope,
        job: Option<&str>,
    ) -> RestoreResult<RestoreReport> {
        tracing::error!(error = %apply_error, "apply failed, rolling back to checkpoint");
        cleanup_extraction(extracted);

        let rollback_result = checkpoint.load().and_then(|document| {
            // Deliberately no clear before the re-import: the additive
            // re-merge cannot make things worse, a second destructive
            // clear could.
            SnapshotCodec::new(self.store)
                .import(
                    &document,
                    &ImportOptions {
                        policy: WritePolicy::Overwrite,
                        worker_width: self.options.worker_width,
                    },
                    self.progress,
                )
                .map(|_| ())
        });

        match rollback_result {
            Ok(()) => {
                self.note_phase(RestorePhase::RolledBack, job);
                tracing::warn!(
                    checkpoint = %checkpoint.path().display(),
                    "rolled back; checkpoint retained for forensic inspection"
                );
                Ok(RestoreReport {
                    outcome: RestoreOutcome::RolledBack { apply_error },
                    scope: scope.to_string(),
                    checkpoint_path: checkpoint.path().display().to_string(),
                    checkpoint_counts: checkpoint.counts(),
                    validation,
                    import: None,
                    blobs: None,
                    reconciliation: None,
                    verified_counts: Some(store_counts(self.store)?),
                    rolled_back_additively: true,
                })
            }
            Err(rollback_error) => Err(RestoreError::RollbackFailed {
                apply: apply_error,
                rollback: rollback_error.to_string(),
            }),
        }
    }

    fn restore_blobs(&self, archive: &ExtractedArchive) -> BlobRestoreCounts {
        let mut counts = BlobRestoreCounts::default();
        let Some(blob_store) = self.blob_store else {
            counts.skipped = archive.blobs.len() as u64;
            return counts;
        };
        for (key, payload_path) in &archive.blobs {
            let outcome: anyhow::Result<bool> = (|| {
                if blob_store.contains(key)? {
                    return Ok(false);
                }
                let bytes = std::fs::read(payload_path)?;
                blob_store.put(key, &bytes)?;
                Ok(true)
            })();
            match outcome {
                Ok(true) => counts.uploaded += 1,
                Ok(false) => counts.skipped += 1,
                Err(e) => {
                    tracing::warn!(blob_key = %key, error = %e, "blob restore failed");
                    counts.failed += 1;
                }
            }
        }
        counts
    }

    fn note_phase(&self, phase: RestorePhase, job: Option<&str>) {
        tracing::info!(phase = %phase, "restore phase");
        if let (Some(queue), Some(id)) = (self.job_queue, job) {
            if let Err(e) = queue.update(id, JobPatch::phase(phase.to_string())) {
                tracing::warn!(error = %e, "job phase update failed");
            }
        }
    }
}

fn cleanup_extraction(extracted: Option<ExtractedArchive>) {
    if let Some(archive) = extracted {
        archive.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conceptgraph_core::model::{Concept, Instance, Relationship, Source};
    use conceptgraph_core::{MemoryBlobStore, MemoryGraphStore, MemoryJobQueue};
    use conceptgraph_snapshot::{pack, SnapshotCodec as Codec, SnapshotScope};
    use serde_json::Map;
    use tempfile::tempdir;

    fn concept(id: &str, embedding: Vec<f32>) -> Concept {
        Concept {
            concept_id: id.into(),
            label: format!("label {id}"),
            search_terms: vec![],
            embedding,
        }
    }

    fn source(id: &str, ontology: &str, blob_key: Option<&str>) -> Source {
        Source {
            source_id: id.into(),
            document: ontology.into(),
            file_path: "f.md".into(),
            paragraph: 0,
            full_text: "t".into(),
            blob_key: blob_key.map(str::to_string),
            content_type: None,
        }
    }

    fn instance(id: &str, concept: &str, source: &str) -> Instance {
        Instance {
            instance_id: id.into(),
            quote: "q".into(),
            concept_id: concept.into(),
            source_id: source.into(),
        }
    }

    fn relationship(from: &str, to: &str, rel_type: &str) -> Relationship {
        Relationship {
            from: from.into(),
            to: to.into(),
            rel_type: rel_type.into(),
            properties: Map::new(),
        }
    }

    /// Scenario store: 3 concepts, 2 sources, 4 instances, 5 relationships.
    fn seeded_store() -> MemoryGraphStore {
        let store = MemoryGraphStore::new();
        for (id, e) in [("c1", vec![1.0, 0.0]), ("c2", vec![0.0, 1.0]), ("c3", vec![0.7, 0.7])] {
            store.upsert_concept(&concept(id, e), WritePolicy::Skip).unwrap();
        }
        for s in [source("s1", "alpha", None), source("s2", "alpha", None)] {
            store.upsert_source(&s, WritePolicy::Skip).unwrap();
        }
        for (id, c, s) in [
            ("i1", "c1", "s1"),
            ("i2", "c2", "s1"),
            ("i3", "c3", "s2"),
            ("i4", "c1", "s2"),
        ] {
            store.upsert_instance(&instance(id, c, s), WritePolicy::Skip).unwrap();
            store.link_concept_source(c, s).unwrap();
        }
        for (f, t, ty) in [
            ("c1", "c2", "CAUSES"),
            ("c2", "c3", "CAUSES"),
            ("c3", "c1", "PRECEDES"),
            ("c1", "c3", "RELATED_TO"),
            ("c2", "c1", "CONTRADICTS"),
        ] {
            store.upsert_relationship(&relationship(f, t, ty), WritePolicy::Skip).unwrap();
        }
        store
    }

    #[test]
    fn full_restore_into_empty_store_commits_exact_counts() {
        let seeded = seeded_store();
        let document = Codec::new(&seeded).export(&SnapshotScope::Full).unwrap();
        assert_eq!(document.statistics.concepts, 3);
        assert_eq!(document.statistics.sources, 2);
        assert_eq!(document.statistics.instances, 4);
        assert_eq!(document.statistics.relationships, 5);

        let target = MemoryGraphStore::new();
        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&target, RestoreOptions::new(dir.path().join("checkpoints")));
        let report = coordinator.run(RestoreInput::Parsed(document)).unwrap();

        assert!(matches!(report.outcome, RestoreOutcome::Committed));
        let verified = report.verified_counts.unwrap();
        assert_eq!(verified.concepts, 3);
        assert_eq!(verified.sources, 2);
        assert_eq!(verified.instances, 4);
        assert_eq!(verified.relationships, 5);
        // Commit is the only checkpoint-deleting path, and it ran.
        assert!(!std::path::Path::new(&report.checkpoint_path).exists());
    }

    #[test]
    fn full_restore_clears_graph_but_preserves_vocabulary() {
        let seeded = seeded_store();
        let document = Codec::new(&seeded).export(&SnapshotScope::Full).unwrap();

        let target = MemoryGraphStore::new();
        target
            .upsert_concept(&concept("stale", vec![0.1, 0.2]), WritePolicy::Skip)
            .unwrap();
        let vocab_before = target.vocabulary_count().unwrap();

        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&target, RestoreOptions::new(dir.path().join("checkpoints")));
        coordinator.run(RestoreInput::Parsed(document)).unwrap();

        assert!(target.get_concept("stale").unwrap().is_none());
        assert_eq!(target.vocabulary_count().unwrap(), vocab_before);
    }

    #[test]
    fn mid_apply_failure_rolls_back_to_checkpoint_counts() {
        let store = seeded_store();
        let pre_restore = store_counts(&store).unwrap();
        let document = Codec::new(&store).export(&SnapshotScope::Full).unwrap();

        // Fail partway through the relationship stage of the apply; the
        // rollback import must not be affected (single-shot fuse).
        store.fail_relationship_writes_after(2);

        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&store, RestoreOptions::new(dir.path().join("checkpoints")));
        let report = coordinator.run(RestoreInput::Parsed(document)).unwrap();

        let RestoreOutcome::RolledBack { apply_error } = &report.outcome else {
            panic!("expected rollback, got {:?}", report.outcome);
        };
        assert!(apply_error.contains("injected"));
        assert!(report.rolled_back_additively);
        assert_eq!(report.verified_counts.unwrap(), pre_restore);
        // Retained for forensics.
        assert!(std::path::Path::new(&report.checkpoint_path).exists());
    }

    #[test]
    fn rollback_failure_is_a_distinct_fatal_error() {
        let store = seeded_store();
        let document = Codec::new(&store).export(&SnapshotScope::Full).unwrap();

        // First fault kills the apply, second kills the rollback import.
        // Width 1 keeps fault consumption ordered across the two imports.
        store.push_relationship_fault(StoreError::Connectivity("apply down".into()));
        store.push_relationship_fault(StoreError::Connectivity("rollback down".into()));

        let dir = tempdir().unwrap();
        let mut options = RestoreOptions::new(dir.path().join("checkpoints"));
        options.worker_width = 1;
        let coordinator = RestoreCoordinator::new(&store, options);
        let err = coordinator.run(RestoreInput::Parsed(document)).unwrap_err();
        let RestoreError::RollbackFailed { apply, rollback } = err else {
            panic!("expected RollbackFailed, got {err}");
        };
        assert!(apply.contains("apply down"));
        assert!(rollback.contains("rollback down"));
    }

    #[test]
    fn validation_failure_aborts_before_any_mutation() {
        let seeded = seeded_store();
        let mut document = Codec::new(&seeded).export(&SnapshotScope::Full).unwrap();
        // Break referential integrity: an endpoint that resolves nowhere.
        document
            .data
            .relationships
            .push(relationship("c1", "nowhere", "CAUSES"));

        let target = seeded_store();
        let before = store_counts(&target).unwrap();
        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&target, RestoreOptions::new(dir.path().join("checkpoints")));
        let err = coordinator.run(RestoreInput::Parsed(document)).unwrap_err();

        assert!(matches!(err, RestoreError::Validation { .. }));
        assert_eq!(store_counts(&target).unwrap(), before);
    }

    #[test]
    fn second_run_is_rejected_while_claim_is_held() {
        let store = MemoryGraphStore::new();
        store
            .acquire_claim(RESTORE_CLAIM_KEY, "someone-else", Duration::minutes(5))
            .unwrap();

        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&store, RestoreOptions::new(dir.path().join("checkpoints")));
        let document = Codec::new(&MemoryGraphStore::new())
            .export(&SnapshotScope::Full)
            .unwrap();
        let err = coordinator.run(RestoreInput::Parsed(document)).unwrap_err();
        assert!(matches!(err, RestoreError::AlreadyRunning { .. }));
    }

    #[test]
    fn claim_is_released_after_a_run() {
        let store = MemoryGraphStore::new();
        let document = Codec::new(&seeded_store()).export(&SnapshotScope::Full).unwrap();
        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&store, RestoreOptions::new(dir.path().join("checkpoints")));
        coordinator.run(RestoreInput::Parsed(document)).unwrap();
        assert!(store.get_claim(RESTORE_CLAIM_KEY).unwrap().is_none());
    }

    #[test]
    fn archive_restore_uploads_blobs_best_effort() {
        let store = MemoryGraphStore::new();
        store
            .upsert_concept(&concept("c1", vec![1.0, 0.0]), WritePolicy::Skip)
            .unwrap();
        store
            .upsert_source(&source("s1", "alpha", Some("docs/a")), WritePolicy::Skip)
            .unwrap();
        store
            .upsert_instance(&instance("i1", "c1", "s1"), WritePolicy::Skip)
            .unwrap();
        store.link_concept_source("c1", "s1").unwrap();

        let source_blobs = MemoryBlobStore::new();
        source_blobs.put("docs/a", b"payload").unwrap();
        let document = Codec::new(&store).export(&SnapshotScope::Full).unwrap();

        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("snapshot.tar.gz");
        pack(&document, &source_blobs, &archive_path).unwrap();

        let target = MemoryGraphStore::new();
        let target_blobs = MemoryBlobStore::new();
        let coordinator =
            RestoreCoordinator::new(&target, RestoreOptions::new(dir.path().join("checkpoints")))
                .with_blob_store(&target_blobs);
        let report = coordinator.run(RestoreInput::Archive(archive_path)).unwrap();

        let blob_counts = report.blobs.unwrap();
        assert_eq!(blob_counts.uploaded, 1);
        assert_eq!(blob_counts.failed, 0);
        assert_eq!(target_blobs.get("docs/a").unwrap().unwrap(), b"payload");
    }

    #[test]
    fn ontology_restore_reconciles_and_prunes_to_zero_dangling() {
        // Ontology alpha with one relationship pointing into beta.
        let origin = MemoryGraphStore::new();
        origin
            .upsert_concept(&concept("a1", vec![1.0, 0.0]), WritePolicy::Skip)
            .unwrap();
        origin
            .upsert_concept(&concept("b1", vec![0.0, 1.0]), WritePolicy::Skip)
            .unwrap();
        origin
            .upsert_source(&source("sa", "alpha", None), WritePolicy::Skip)
            .unwrap();
        origin
            .upsert_source(&source("sb", "beta", None), WritePolicy::Skip)
            .unwrap();
        for (i, c, s) in [("ia", "a1", "sa"), ("ib", "b1", "sb")] {
            origin.upsert_instance(&instance(i, c, s), WritePolicy::Skip).unwrap();
            origin.link_concept_source(c, s).unwrap();
        }
        origin
            .upsert_relationship(&relationship("a1", "b1", "CAUSES"), WritePolicy::Skip)
            .unwrap();

        let document = Codec::new(&origin)
            .export(&SnapshotScope::Ontology("alpha".into()))
            .unwrap();

        let dir = tempdir().unwrap();
        let mut options = RestoreOptions::new(dir.path().join("checkpoints"));
        options.reconcile = true;

        // Case 1: target store already holds beta's concept. The torn
        // edge is matched (exact id, similarity 1.0) and survives.
        let target = MemoryGraphStore::new();
        target
            .upsert_concept(&concept("b1", vec![0.0, 1.0]), WritePolicy::Skip)
            .unwrap();
        target
            .upsert_source(&source("sb", "beta", None), WritePolicy::Skip)
            .unwrap();
        target.upsert_instance(&instance("ib", "b1", "sb"), WritePolicy::Skip).unwrap();
        target.link_concept_source("b1", "sb").unwrap();

        let coordinator = RestoreCoordinator::new(&target, options);
        let report = coordinator
            .run(RestoreInput::Parsed(document.clone()))
            .unwrap();
        let reconciliation = report.reconciliation.unwrap();
        assert_eq!(reconciliation.stats.matched, 1);
        assert_eq!(reconciliation.leftovers, LeftoverPrune::default());
        assert!(target
            .get_relationship(&relationship("a1", "b1", "CAUSES").key())
            .unwrap()
            .is_some());

        // Case 2: empty target store. No match is possible, so the final
        // prune removes the torn edge: zero dangling relationships.
        let empty_target = MemoryGraphStore::new();
        let dir2 = tempdir().unwrap();
        let mut options = RestoreOptions::new(dir2.path().join("checkpoints"));
        options.reconcile = true;
        let coordinator = RestoreCoordinator::new(&empty_target, options);
        let report = coordinator.run(RestoreInput::Parsed(document)).unwrap();
        let reconciliation = report.reconciliation.unwrap();
        assert_eq!(reconciliation.stats.matched, 0);
        assert_eq!(reconciliation.stats.similarity_queries, 0);
        assert_eq!(reconciliation.leftovers.relationships_pruned, 1);
        assert!(empty_target
            .get_relationship(&relationship("a1", "b1", "CAUSES").key())
            .unwrap()
            .is_none());
        let repairer = crate::repair::ReferentialRepairer::new(&empty_target);
        assert!(repairer.find_dangling(None).unwrap().is_empty());
    }

    #[test]
    fn job_queue_sees_phase_progression() {
        let store = MemoryGraphStore::new();
        let document = Codec::new(&seeded_store()).export(&SnapshotScope::Full).unwrap();
        let queue = MemoryJobQueue::new();

        let dir = tempdir().unwrap();
        let coordinator =
            RestoreCoordinator::new(&store, RestoreOptions::new(dir.path().join("checkpoints")))
                .with_job_queue(&queue);
        coordinator.run(RestoreInput::Parsed(document)).unwrap();

        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        let phases = queue.recorded_phases(&enqueued[0].0);
        assert_eq!(phases.first().map(String::as_str), Some("creating_checkpoint"));
        assert!(phases.iter().any(|p| p == "applying"));
        assert_eq!(phases.last().map(String::as_str), Some("committed"));
    }
}
