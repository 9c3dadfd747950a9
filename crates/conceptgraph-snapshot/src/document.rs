//! The portable snapshot document.
//!
//! JSON on the wire, shaped exactly as the store entities in
//! `conceptgraph_core::model` so export → import is lossless, embeddings
//! included. Parsing is strict: a missing required field or a
//! wrongly-typed value fails the whole load, before anything can touch a
//! store.

use crate::error::{SnapshotError, SnapshotResult};
use chrono::{DateTime, Utc};
use conceptgraph_core::model::{Concept, Instance, Relationship, Source, VocabularyEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version written by this codec.
pub const SNAPSHOT_VERSION: &str = "1.1";

/// Versions this codec will read.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["1.0", "1.1"];

/// What a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotScope {
    Full,
    Ontology(String),
}

impl SnapshotScope {
    pub fn is_full(&self) -> bool {
        matches!(self, SnapshotScope::Full)
    }

    pub fn ontology(&self) -> Option<&str> {
        match self {
            SnapshotScope::Full => None,
            SnapshotScope::Ontology(name) => Some(name),
        }
    }
}

impl std::fmt::Display for SnapshotScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotScope::Full => write!(f, "full"),
            SnapshotScope::Ontology(name) => write!(f, "ontology:{name}"),
        }
    }
}

/// Wire form of the scope discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Full,
    Ontology,
}

/// Counts the exporter claims for each section. Soft: a mismatch against
/// the actual lists is a validator warning, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    pub concepts: u64,
    pub sources: u64,
    pub instances: u64,
    pub relationships: u64,
    pub vocabulary: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub concepts: Vec<Concept>,
    pub sources: Vec<Source>,
    pub instances: Vec<Instance>,
    pub relationships: Vec<Relationship>,
    /// Absent in legacy documents; those are validated against the
    /// builtin type set instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<Vec<VocabularyEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub version: String,
    pub scope: ScopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub statistics: SnapshotStatistics,
    pub data: SnapshotData,
}

impl SnapshotDocument {
    /// The effective scope, rejecting an ontology-kind document that
    /// forgot to name its ontology.
    pub fn effective_scope(&self) -> SnapshotResult<SnapshotScope> {
        match (self.scope, self.ontology.as_deref()) {
            (ScopeKind::Full, _) => Ok(SnapshotScope::Full),
            (ScopeKind::Ontology, Some(name)) if !name.is_empty() => {
                Ok(SnapshotScope::Ontology(name.to_string()))
            }
            (ScopeKind::Ontology, _) => Err(SnapshotError::Format(
                "ontology-scoped document names no ontology".into(),
            )),
        }
    }

    pub fn version_supported(&self) -> bool {
        SUPPORTED_VERSIONS.contains(&self.version.as_str())
    }

    /// Counts of what the document actually carries.
    pub fn actual_statistics(&self) -> SnapshotStatistics {
        SnapshotStatistics {
            concepts: self.data.concepts.len() as u64,
            sources: self.data.sources.len() as u64,
            instances: self.data.instances.len() as u64,
            relationships: self.data.relationships.len() as u64,
            vocabulary: self
                .data
                .vocabulary
                .as_ref()
                .map(|v| v.len() as u64)
                .unwrap_or(0),
        }
    }

    pub fn from_json_str(text: &str) -> SnapshotResult<Self> {
        let doc: SnapshotDocument =
            serde_json::from_str(text).map_err(|e| SnapshotError::Format(e.to_string()))?;
        if !doc.version_supported() {
            return Err(SnapshotError::UnsupportedVersion(doc.version));
        }
        Ok(doc)
    }

    pub fn to_json_string(&self) -> SnapshotResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Format(e.to_string()))
    }

    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save(&self, path: &Path) -> SnapshotResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
