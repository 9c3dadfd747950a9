//! Checkpoints: the rollback net under every destructive restore.
//!
//! A checkpoint is a Full-scope snapshot document written durably before
//! any mutation. It is deleted on commit, re-imported on rollback, and
//! never mutated in place. After a rollback the file is deliberately left
//! behind for forensic inspection.

use chrono::Utc;
use conceptgraph_core::store::{store_counts, GraphStore, StoreCounts};
use conceptgraph_snapshot::{SnapshotCodec, SnapshotDocument, SnapshotResult, SnapshotScope};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Export the whole store and persist it under a fresh checkpoint
    /// file name.
    pub fn create(&self, store: &dyn GraphStore) -> SnapshotResult<CheckpointHandle> {
        let counts = store_counts(store)?;
        let document = SnapshotCodec::new(store).export(&SnapshotScope::Full)?;

        let run_id = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "checkpoint-{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S"),
            &run_id[..8]
        );
        let path = self.dir.join(file_name);
        document.save(&path)?;

        tracing::info!(
            path = %path.display(),
            concepts = counts.concepts,
            relationships = counts.relationships,
            "checkpoint written"
        );
        Ok(CheckpointHandle { path, counts })
    }
}

/// A durably written checkpoint. The handle never mutates the file; it
/// can re-load it (rollback) or delete it (commit).
#[derive(Debug, Clone)]
pub struct CheckpointHandle {
    path: PathBuf,
    counts: StoreCounts,
}

impl CheckpointHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store counts at checkpoint time.
    pub fn counts(&self) -> StoreCounts {
        self.counts
    }

    pub fn load(&self) -> SnapshotResult<SnapshotDocument> {
        SnapshotDocument::load(&self.path)
    }

    /// Remove the checkpoint file. Only the commit path calls this.
    pub fn delete(self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}
