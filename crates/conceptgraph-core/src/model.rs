//! Graph entity types shared by every layer.
//!
//! These are the wire shapes: field names match the portable snapshot
//! format byte for byte, so the same structs serve both the live store and
//! the JSON document. Embeddings are plain `Vec<f32>`; `serde_json` prints
//! floats with the shortest round-trippable representation, which is what
//! keeps export → import lossless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A concept node. `embedding` dimensionality is constant across a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub concept_id: String,
    pub label: String,
    pub search_terms: Vec<String>,
    pub embedding: Vec<f32>,
}

/// A source paragraph. `document` is the ontology the source belongs to.
///
/// Sources are never treated as external references: even an
/// ontology-scoped snapshot carries every source it mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub document: String,
    pub file_path: String,
    pub paragraph: u32,
    pub full_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// An evidentiary instance tying a concept to the source passage that
/// mentions it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub quote: String,
    pub concept_id: String,
    pub source_id: String,
}

/// A typed, directed relationship between two concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Relationship {
    pub fn key(&self) -> RelationshipKey {
        RelationshipKey {
            from: self.from.clone(),
            to: self.to.clone(),
            rel_type: self.rel_type.clone(),
        }
    }
}

/// Identity of a relationship: upserts are keyed on (from, type, to).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub from: String,
    pub to: String,
    pub rel_type: String,
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.rel_type, self.to)
    }
}

/// An entry in the open relationship-type vocabulary.
///
/// The vocabulary is an additive namespace independent of the concept
/// graph: restores never clear it, imports only ever add to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub relationship_type: String,
    pub description: String,
    pub category: String,
    pub is_builtin: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ============================================================================
// Builtin vocabulary
// ============================================================================

/// Structural relationship types the system itself emits. These are always
/// legitimate and never draw vocabulary warnings.
pub const STRUCTURAL_TYPES: [&str; 3] = ["INSTANCE_OF", "APPEARS_IN", "RELATED_TO"];

/// Builtin relationship types seeded into every store. Legacy documents
/// that carry no vocabulary section are validated against this set.
pub const BUILTIN_TYPES: [(&str, &str, &str); 8] = [
    ("INSTANCE_OF", "Evidence instance of a concept", "structural"),
    ("APPEARS_IN", "Concept appears in a source", "structural"),
    ("RELATED_TO", "Unspecified association", "structural"),
    ("IS_A", "Taxonomic specialization", "taxonomy"),
    ("PART_OF", "Mereological containment", "taxonomy"),
    ("CAUSES", "Causal influence", "causal"),
    ("PRECEDES", "Temporal ordering", "temporal"),
    ("CONTRADICTS", "Asserted incompatibility", "epistemic"),
];

pub fn is_structural_type(rel_type: &str) -> bool {
    STRUCTURAL_TYPES.contains(&rel_type)
}

pub fn is_builtin_type(rel_type: &str) -> bool {
    BUILTIN_TYPES.iter().any(|(name, _, _)| *name == rel_type)
}

/// The builtin vocabulary as full entries (used to seed fresh stores).
pub fn builtin_vocabulary() -> Vec<VocabularyEntry> {
    BUILTIN_TYPES
        .iter()
        .map(|(name, description, category)| VocabularyEntry {
            relationship_type: (*name).to_string(),
            description: (*description).to_string(),
            category: (*category).to_string(),
            is_builtin: true,
            synonyms: Vec::new(),
            usage_count: 0,
            embedding: None,
        })
        .collect()
}

/// Relationship type identifiers are upper-case with underscores, the way
/// they appear on the wire (`CAUSES`, `PART_OF`).
pub fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_serializes_type_field() {
        let rel = Relationship {
            from: "c1".into(),
            to: "c2".into(),
            rel_type: "CAUSES".into(),
            properties: Map::new(),
        };
        let json = serde_json::to_value(&rel).unwrap();
        assert_eq!(json["type"], "CAUSES");
        assert!(json.get("rel_type").is_none());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let json = serde_json::json!({
            "concept_id": "c1",
            "label": "thing"
            // no search_terms, no embedding
        });
        assert!(serde_json::from_value::<Concept>(json).is_err());
    }

    #[test]
    fn embedding_round_trips_exactly() {
        let concept = Concept {
            concept_id: "c1".into(),
            label: "thing".into(),
            search_terms: vec!["thing".into()],
            embedding: vec![0.1, -0.25, 1.0e-7, f32::MIN_POSITIVE, 0.333_333_34],
        };
        let text = serde_json::to_string(&concept).unwrap();
        let back: Concept = serde_json::from_str(&text).unwrap();
        assert_eq!(back.embedding, concept.embedding);
    }

    #[test]
    fn structural_types_are_builtin() {
        for t in STRUCTURAL_TYPES {
            assert!(is_builtin_type(t));
        }
        assert!(!is_builtin_type("SYNTHESIZES"));
    }

    #[test]
    fn type_name_validation() {
        assert!(is_valid_type_name("CAUSES"));
        assert!(is_valid_type_name("PART_OF_2"));
        assert!(!is_valid_type_name("causes"));
        assert!(!is_valid_type_name(""));
        assert!(!is_valid_type_name("HAS SPACE"));
    }
}
