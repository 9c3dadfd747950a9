//! Integration tests for the complete Conceptgraph pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Store → SnapshotCodec → document → store (round trips)
//! - IntegrityValidator on exported documents
//! - RestoreCoordinator: checkpoint → validate → apply → reconcile →
//!   commit/rollback
//!
//! Run with: cargo test --test integration_tests

use tempfile::tempdir;

use conceptgraph_core::model::{Concept, Instance, Relationship, Source};
use conceptgraph_core::store::{store_counts, GraphStore, WritePolicy};
use conceptgraph_core::{MemoryGraphStore, NoopProgress};
use conceptgraph_restore::{
    ReferentialRepairer, RestoreCoordinator, RestoreInput, RestoreOptions, RestoreOutcome,
};
use conceptgraph_snapshot::{
    ImportOptions, IntegrityValidator, SnapshotCodec, SnapshotDocument, SnapshotScope,
};

fn concept(id: &str, embedding: Vec<f32>) -> Concept {
    Concept {
        concept_id: id.into(),
        label: format!("label {id}"),
        search_terms: vec![id.to_string()],
        embedding,
    }
}

fn source(id: &str, ontology: &str) -> Source {
    Source {
        source_id: id.into(),
        document: ontology.into(),
        file_path: format!("{ontology}/notes.md"),
        paragraph: 1,
        full_text: "full text".into(),
        blob_key: None,
        content_type: Some("text/markdown".into()),
    }
}

fn instance(id: &str, concept: &str, source: &str) -> Instance {
    Instance {
        instance_id: id.into(),
        quote: "a quoted span".into(),
        concept_id: concept.into(),
        source_id: source.into(),
    }
}

fn relationship(from: &str, to: &str, rel_type: &str) -> Relationship {
    Relationship {
        from: from.into(),
        to: to.into(),
        rel_type: rel_type.into(),
        properties: serde_json::Map::new(),
    }
}

fn grounded(store: &MemoryGraphStore, i: Instance) {
    store
        .upsert_instance(&i, WritePolicy::Skip)
        .expect("instance upsert");
    store
        .link_concept_source(&i.concept_id, &i.source_id)
        .expect("grounding edge");
}

/// Scenario A fixture: 3 concepts, 2 sources, 4 instances, 5 relationships.
fn scenario_a_store() -> MemoryGraphStore {
    let store = MemoryGraphStore::new();
    for (id, e) in [
        ("alloy", vec![0.9, 0.1, 0.0]),
        ("heat-treatment", vec![0.1, 0.9, 0.0]),
        ("fatigue", vec![0.0, 0.2, 0.9]),
    ] {
        store.upsert_concept(&concept(id, e), WritePolicy::Skip).unwrap();
    }
    for s in [source("s1", "metallurgy"), source("s2", "metallurgy")] {
        store.upsert_source(&s, WritePolicy::Skip).unwrap();
    }
    grounded(&store, instance("i1", "alloy", "s1"));
    grounded(&store, instance("i2", "heat-treatment", "s1"));
    grounded(&store, instance("i3", "fatigue", "s2"));
    grounded(&store, instance("i4", "alloy", "s2"));
    for (f, t, ty) in [
        ("alloy", "heat-treatment", "CAUSES"),
        ("heat-treatment", "fatigue", "CAUSES"),
        ("fatigue", "alloy", "PRECEDES"),
        ("alloy", "fatigue", "RELATED_TO"),
        ("heat-treatment", "alloy", "CONTRADICTS"),
    ] {
        store
            .upsert_relationship(&relationship(f, t, ty), WritePolicy::Skip)
            .unwrap();
    }
    store
}

// ============================================================================
// Scenario A: full backup and restore
// ============================================================================

#[test]
fn test_scenario_a_full_backup_statistics_match() {
    let store = scenario_a_store();
    let document = SnapshotCodec::new(&store)
        .export(&SnapshotScope::Full)
        .expect("export");

    assert_eq!(document.statistics.concepts, 3);
    assert_eq!(document.statistics.sources, 2);
    assert_eq!(document.statistics.instances, 4);
    assert_eq!(document.statistics.relationships, 5);
    assert_eq!(document.statistics, document.actual_statistics());

    let report = IntegrityValidator::validate(&document);
    assert!(report.valid, "errors: {:?}", report.errors);
    assert_eq!(report.external_dependency_count, 0);
}

#[test]
fn test_scenario_a_restore_into_empty_store_reproduces_counts() {
    let store = scenario_a_store();
    let document = SnapshotCodec::new(&store)
        .export(&SnapshotScope::Full)
        .expect("export");

    let target = MemoryGraphStore::new();
    let dir = tempdir().unwrap();
    let coordinator =
        RestoreCoordinator::new(&target, RestoreOptions::new(dir.path().join("checkpoints")));
    let report = coordinator
        .run(RestoreInput::Parsed(document))
        .expect("restore");

    assert!(matches!(report.outcome, RestoreOutcome::Committed));
    let counts = report.verified_counts.unwrap();
    assert_eq!(counts.concepts, 3);
    assert_eq!(counts.sources, 2);
    assert_eq!(counts.instances, 4);
    assert_eq!(counts.relationships, 5);

    // Embeddings ride through bit-exact.
    let original = store.get_concept("alloy").unwrap().unwrap();
    let restored = target.get_concept("alloy").unwrap().unwrap();
    assert_eq!(original.embedding, restored.embedding);
}

#[test]
fn test_full_document_survives_disk_round_trip() {
    let store = scenario_a_store();
    let document = SnapshotCodec::new(&store)
        .export(&SnapshotScope::Full)
        .expect("export");

    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    document.save(&path).expect("save");

    let loaded = SnapshotDocument::load(&path).expect("load");
    assert_eq!(loaded.actual_statistics(), document.actual_statistics());
    assert_eq!(
        loaded.data.concepts[0].embedding,
        document.data.concepts[0].embedding
    );
}

#[test]
fn test_import_twice_with_overwrite_is_idempotent() {
    let store = scenario_a_store();
    let document = SnapshotCodec::new(&store)
        .export(&SnapshotScope::Full)
        .expect("export");

    let target = MemoryGraphStore::new();
    let codec = SnapshotCodec::new(&target);
    codec
        .import(&document, &ImportOptions::overwrite(), &NoopProgress)
        .expect("first import");
    let once = store_counts(&target).unwrap();
    codec
        .import(&document, &ImportOptions::overwrite(), &NoopProgress)
        .expect("second import");
    assert_eq!(store_counts(&target).unwrap(), once);
}

// ============================================================================
// Scenario B: ontology-scoped backup with a torn reference
// ============================================================================

/// Two ontologies: "alpha" holds a1, "beta" holds b1, and one
/// relationship points from a1 into beta.
fn scenario_b_store() -> MemoryGraphStore {
    let store = MemoryGraphStore::new();
    store
        .upsert_concept(&concept("a1", vec![1.0, 0.0]), WritePolicy::Skip)
        .unwrap();
    store
        .upsert_concept(&concept("b1", vec![0.0, 1.0]), WritePolicy::Skip)
        .unwrap();
    store.upsert_source(&source("sa", "alpha"), WritePolicy::Skip).unwrap();
    store.upsert_source(&source("sb", "beta"), WritePolicy::Skip).unwrap();
    grounded(&store, instance("ia", "a1", "sa"));
    grounded(&store, instance("ib", "b1", "sb"));
    store
        .upsert_relationship(&relationship("a1", "b1", "CAUSES"), WritePolicy::Skip)
        .unwrap();
    store
}

#[test]
fn test_scenario_b_validator_reports_one_external_dependency() {
    let store = scenario_b_store();
    let document = SnapshotCodec::new(&store)
        .export(&SnapshotScope::Ontology("alpha".into()))
        .expect("export");

    // The torn relationship rides along because its origin is local.
    assert_eq!(document.data.concepts.len(), 1);
    assert_eq!(document.data.relationships.len(), 1);

    let report = IntegrityValidator::validate(&document);
    assert!(report.valid);
    assert_eq!(report.external_dependency_count, 1);
}

#[test]
fn test_scenario_b_restore_into_store_holding_target_rewrites() {
    let origin = scenario_b_store();
    let document = SnapshotCodec::new(&origin)
        .export(&SnapshotScope::Ontology("alpha".into()))
        .expect("export");

    // Target already knows beta's concept.
    let target = MemoryGraphStore::new();
    target
        .upsert_concept(&concept("b1", vec![0.0, 1.0]), WritePolicy::Skip)
        .unwrap();
    target.upsert_source(&source("sb", "beta"), WritePolicy::Skip).unwrap();
    grounded(&target, instance("ib", "b1", "sb"));

    let dir = tempdir().unwrap();
    let mut options = RestoreOptions::new(dir.path().join("checkpoints"));
    options.reconcile = true;
    let report = RestoreCoordinator::new(&target, options)
        .run(RestoreInput::Parsed(document))
        .expect("restore");

    let reconciliation = report.reconciliation.expect("reconciliation ran");
    assert_eq!(reconciliation.stats.external_refs, 1);
    assert_eq!(reconciliation.stats.matched, 1);
    assert!(target
        .get_relationship(&relationship("a1", "b1", "CAUSES").key())
        .unwrap()
        .is_some());
}

#[test]
fn test_scenario_b_restore_into_empty_store_prunes_torn_edge() {
    let origin = scenario_b_store();
    let document = SnapshotCodec::new(&origin)
        .export(&SnapshotScope::Ontology("alpha".into()))
        .expect("export");

    let target = MemoryGraphStore::new();
    let dir = tempdir().unwrap();
    let mut options = RestoreOptions::new(dir.path().join("checkpoints"));
    options.reconcile = true;
    let report = RestoreCoordinator::new(&target, options)
        .run(RestoreInput::Parsed(document))
        .expect("restore");

    let reconciliation = report.reconciliation.expect("reconciliation ran");
    assert_eq!(reconciliation.stats.matched, 0);
    assert_eq!(reconciliation.stats.similarity_queries, 0);
    assert_eq!(reconciliation.leftovers.relationships_pruned, 1);

    // Zero dangling edges remain.
    let repairer = ReferentialRepairer::new(&target);
    assert!(repairer.find_dangling(None).unwrap().is_empty());
}

// ============================================================================
// Rollback safety across the full pipeline
// ============================================================================

#[test]
fn test_mid_import_failure_restores_checkpoint_counts() {
    let store = scenario_a_store();
    let before = store_counts(&store).unwrap();
    let document = SnapshotCodec::new(&store)
        .export(&SnapshotScope::Full)
        .expect("export");

    store.fail_relationship_writes_after(2);

    let dir = tempdir().unwrap();
    let coordinator =
        RestoreCoordinator::new(&store, RestoreOptions::new(dir.path().join("checkpoints")));
    let report = coordinator
        .run(RestoreInput::Parsed(document))
        .expect("rollback is a terminal report, not an error");

    assert!(matches!(report.outcome, RestoreOutcome::RolledBack { .. }));
    assert_eq!(store_counts(&store).unwrap(), before);
    assert!(std::path::Path::new(&report.checkpoint_path).exists());
}
