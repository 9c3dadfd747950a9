//! Pre-apply integrity validation.
//!
//! All findings are collected into one report so an operator sees every
//! problem at once. Errors block a restore; warnings ride along. The
//! split that matters: in a Full-scope document every reference must
//! resolve locally, while an ontology-scoped document is allowed
//! unresolved *concept* references — those are the torn edges the
//! reconciler exists for, counted here as external dependencies.

use crate::document::{SnapshotDocument, SnapshotScope, SUPPORTED_VERSIONS};
use ahash::{AHashMap, AHashSet};
use conceptgraph_core::model::{is_builtin_type, is_structural_type, is_valid_type_name};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    /// Distinct concept ids referenced but not carried by the document.
    /// Only ever non-zero for ontology-scoped documents.
    pub external_dependency_count: usize,
    pub valid: bool,
}

impl ValidationReport {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn note(&mut self, message: impl Into<String>) {
        self.info.push(message.into());
    }
}

pub struct IntegrityValidator;

impl IntegrityValidator {
    pub fn validate(document: &SnapshotDocument) -> ValidationReport {
        let mut report = ValidationReport::default();

        // 1. Top-level shape: version and scope coherence. (Field
        // presence and list typing are enforced structurally at parse
        // time; re-check what can still be wrong.)
        if !SUPPORTED_VERSIONS.contains(&document.version.as_str()) {
            report.error(format!("unsupported version `{}`", document.version));
        }
        let scope = match document.effective_scope() {
            Ok(scope) => scope,
            Err(e) => {
                report.error(e.to_string());
                SnapshotScope::Full
            }
        };

        // 2. Section presence.
        if document.data.vocabulary.is_none() {
            report.note("no vocabulary section; validating types against the builtin set");
        }

        Self::check_duplicates(document, &mut report);
        Self::check_references(document, &scope, &mut report);
        Self::check_statistics(document, &mut report);
        Self::check_vocabulary(document, &mut report);

        report.valid = report.errors.is_empty();
        report
    }

    fn check_duplicates(document: &SnapshotDocument, report: &mut ValidationReport) {
        let sections: [(&str, Vec<&str>); 3] = [
            (
                "concept",
                document.data.concepts.iter().map(|c| c.concept_id.as_str()).collect(),
            ),
            (
                "source",
                document.data.sources.iter().map(|s| s.source_id.as_str()).collect(),
            ),
            (
                "instance",
                document.data.instances.iter().map(|i| i.instance_id.as_str()).collect(),
            ),
        ];
        for (kind, ids) in sections {
            let mut seen = AHashSet::new();
            for id in ids {
                if !seen.insert(id) {
                    report.warning(format!("duplicate {kind} id `{id}`"));
                }
            }
        }

        let mut seen = AHashSet::new();
        for relationship in &document.data.relationships {
            let key = relationship.key();
            if !seen.insert(key.clone()) {
                report.warning(format!("duplicate relationship {key}"));
            }
        }
    }

    /// Check 3: referential integrity. Sources are never external, so an
    /// unresolved source reference is an error under any scope.
    fn check_references(
        document: &SnapshotDocument,
        scope: &SnapshotScope,
        report: &mut ValidationReport,
    ) {
        let concept_ids: AHashSet<&str> = document
            .data
            .concepts
            .iter()
            .map(|c| c.concept_id.as_str())
            .collect();
        let source_ids: AHashSet<&str> = document
            .data
            .sources
            .iter()
            .map(|s| s.source_id.as_str())
            .collect();

        let record_concept_ref = |id: &str, context: &str, report: &mut ValidationReport,
                                      external: &mut AHashSet<String>| {
            if concept_ids.contains(id) {
                return;
            }
            match scope {
                SnapshotScope::Full => {
                    report.error(format!("{context} references unknown concept `{id}`"));
                }
                SnapshotScope::Ontology(_) => {
                    if external.insert(id.to_string()) {
                        report.warning(format!(
                            "{context} references concept `{id}` outside this ontology (external dependency)"
                        ));
                    }
                }
            }
        };

        let mut external: AHashSet<String> = AHashSet::new();
        for instance in &document.data.instances {
            let context = format!("instance `{}`", instance.instance_id);
            record_concept_ref(&instance.concept_id, &context, report, &mut external);
            if !source_ids.contains(instance.source_id.as_str()) {
                report.error(format!(
                    "{context} references unknown source `{}`",
                    instance.source_id
                ));
            }
        }

        for relationship in &document.data.relationships {
            let context = format!("relationship {}", relationship.key());
            record_concept_ref(&relationship.from, &context, report, &mut external);
            record_concept_ref(&relationship.to, &context, report, &mut external);
        }

        report.external_dependency_count = external.len();
    }

    /// Check 4: claimed statistics against actual list lengths (soft).
    fn check_statistics(document: &SnapshotDocument, report: &mut ValidationReport) {
        let actual = document.actual_statistics();
        let claimed = document.statistics;
        let pairs = [
            ("concepts", claimed.concepts, actual.concepts),
            ("sources", claimed.sources, actual.sources),
            ("instances", claimed.instances, actual.instances),
            ("relationships", claimed.relationships, actual.relationships),
            ("vocabulary", claimed.vocabulary, actual.vocabulary),
        ];
        for (section, claimed, actual) in pairs {
            if claimed != actual {
                report.warning(format!(
                    "statistics claim {claimed} {section}, document carries {actual}"
                ));
            }
        }
    }

    /// Check 5: relationship types against the vocabulary the document
    /// ships (or the builtin set for legacy documents). Structural types
    /// are always legitimate.
    fn check_vocabulary(document: &SnapshotDocument, report: &mut ValidationReport) {
        let known: Option<AHashSet<&str>> = document
            .data
            .vocabulary
            .as_ref()
            .map(|entries| entries.iter().map(|e| e.relationship_type.as_str()).collect());

        let mut usage: AHashMap<&str, u64> = AHashMap::new();
        for relationship in &document.data.relationships {
            *usage.entry(relationship.rel_type.as_str()).or_default() += 1;
        }

        let mut unknown: Vec<&str> = usage
            .keys()
            .copied()
            .filter(|t| !is_structural_type(t))
            .filter(|t| match &known {
                Some(set) => !set.contains(t),
                None => !is_builtin_type(t),
            })
            .collect();
        unknown.sort_unstable();
        for rel_type in unknown {
            report.warning(format!(
                "relationship type `{rel_type}` is not in the vocabulary ({} use(s))",
                usage[rel_type]
            ));
        }

        for rel_type in usage.keys() {
            if !is_valid_type_name(rel_type) {
                report.warning(format!(
                    "relationship type `{rel_type}` is not an upper-case identifier"
                ));
            }
        }
    }
}
