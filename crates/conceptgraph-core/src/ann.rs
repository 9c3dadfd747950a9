//! Nearest-concept lookup over store embeddings.
//!
//! Two strategies behind one type: exhaustive cosine scan for ordinary
//! stores, and an HNSW index (L2 over unit vectors, exact cosine rescoring
//! of the candidate set) once a store is large enough that a scan per torn
//! reference would hurt. Selection is by concept count at build time.

use crate::error::SimilarityError;
use crate::model::Concept;
use crate::similarity::{cosine, normalized};
use hnsw_rs::prelude::{DistL2, Hnsw};

/// Store size at which lookups switch from exhaustive scan to HNSW.
pub const ANN_THRESHOLD: usize = 2048;

/// A concept id with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredConcept {
    pub concept_id: String,
    pub similarity: f32,
}

struct IndexedVectors {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dim: usize,
}

enum Strategy {
    BruteForce,
    Ann(Hnsw<'static, f32, DistL2>),
}

pub struct ConceptIndex {
    points: IndexedVectors,
    strategy: Strategy,
}

impl ConceptIndex {
    /// Index `concepts`, choosing the strategy by size. Concepts whose
    /// embedding dimension disagrees with the first usable one, or whose
    /// embedding has zero norm, are skipped with a warning: they can never
    /// be matched and must not poison the index.
    pub fn build(concepts: &[Concept]) -> Self {
        let points = collect_points(concepts);
        if points.ids.len() >= ANN_THRESHOLD {
            Self::build_ann_from(points)
        } else {
            Self {
                points,
                strategy: Strategy::BruteForce,
            }
        }
    }

    /// Force the HNSW strategy regardless of size (exercised directly by
    /// tests; `build` is the production entry point).
    pub fn build_ann(concepts: &[Concept]) -> Self {
        Self::build_ann_from(collect_points(concepts))
    }

    fn build_ann_from(points: IndexedVectors) -> Self {
        let nb_elem = points.ids.len().max(1);
        let m: usize = 16;
        let ef_construction: usize = 200;
        let max_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);

        let hnsw = Hnsw::<f32, DistL2>::new(m, nb_elem, max_layer, ef_construction, DistL2 {});
        for (i, v) in points.vectors.iter().enumerate() {
            // Unit vectors make L2 ordering agree with cosine ordering.
            if let Ok(unit) = normalized(v) {
                hnsw.insert((&unit[..], i));
            }
        }
        Self {
            points,
            strategy: Strategy::Ann(hnsw),
        }
    }

    pub fn len(&self) -> usize {
        self.points.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        (!self.points.ids.is_empty()).then_some(self.points.dim)
    }

    /// The best-scoring concept for `query`, or `None` on an empty index.
    /// Ties break toward the lexicographically smaller id so results are
    /// deterministic.
    pub fn best_match(&self, query: &[f32]) -> Result<Option<ScoredConcept>, SimilarityError> {
        if self.points.ids.is_empty() {
            return Ok(None);
        }
        if query.len() != self.points.dim {
            return Err(SimilarityError::DimensionMismatch {
                left: query.len(),
                right: self.points.dim,
            });
        }

        let candidates: Vec<usize> = match &self.strategy {
            Strategy::BruteForce => (0..self.points.ids.len()).collect(),
            Strategy::Ann(hnsw) => {
                let unit = normalized(query)?;
                let k = 16.min(self.points.ids.len());
                let ef_search = 64;
                hnsw.search(&unit, k, ef_search)
                    .into_iter()
                    .map(|n| n.d_id)
                    .filter(|idx| *idx < self.points.ids.len())
                    .collect()
            }
        };

        let mut best: Option<ScoredConcept> = None;
        for idx in candidates {
            // Exact scoring on the original vectors, even for ANN hits.
            let similarity = cosine(query, &self.points.vectors[idx])?;
            let id = &self.points.ids[idx];
            let better = match &best {
                None => true,
                Some(current) => {
                    similarity > current.similarity
                        || (similarity == current.similarity && *id < current.concept_id)
                }
            };
            if better {
                best = Some(ScoredConcept {
                    concept_id: id.clone(),
                    similarity,
                });
            }
        }
        Ok(best)
    }
}

fn collect_points(concepts: &[Concept]) -> IndexedVectors {
    let mut ids = Vec::new();
    let mut vectors = Vec::new();
    let mut dim = 0usize;

    for concept in concepts {
        let v = &concept.embedding;
        if v.is_empty() || v.iter().all(|x| *x == 0.0) {
            tracing::warn!(concept_id = %concept.concept_id, "skipping unusable embedding");
            continue;
        }
        if dim == 0 {
            dim = v.len();
        } else if v.len() != dim {
            tracing::warn!(
                concept_id = %concept.concept_id,
                expected = dim,
                actual = v.len(),
                "skipping embedding with mismatched dimension"
            );
            continue;
        }
        ids.push(concept.concept_id.clone());
        vectors.push(v.clone());
    }

    IndexedVectors { ids, vectors, dim }
}
