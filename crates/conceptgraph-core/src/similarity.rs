//! Cosine similarity kernel.
//!
//! Small and deliberately strict: equal dimensionality and non-zero norms
//! are preconditions, violations return [`SimilarityError`] instead of a
//! silent NaN. All scores are raw cosine in [-1.0, 1.0].

use crate::error::SimilarityError;

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn check_pair(a: &[f32], b: &[f32]) -> Result<(), SimilarityError> {
    if a.is_empty() || b.is_empty() {
        return Err(SimilarityError::Empty);
    }
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Cosine similarity of two equal-dimension, non-zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    check_pair(a, b)?;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(SimilarityError::ZeroNorm);
    }

    // Clamp: accumulated rounding can push |cos| a hair past 1.
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Scale a vector to unit norm.
pub fn normalized(v: &[f32]) -> Result<Vec<f32>, SimilarityError> {
    if v.is_empty() {
        return Err(SimilarityError::Empty);
    }
    let n = norm(v);
    if n == 0.0 {
        return Err(SimilarityError::ZeroNorm);
    }
    Ok(v.iter().map(|x| x / n).collect())
}

/// Element-wise mean of equal-dimension vectors.
///
/// Used to derive an embedding for a torn reference from its in-document
/// neighborhood when nothing better is available.
pub fn centroid<'a, I>(vectors: I) -> Result<Vec<f32>, SimilarityError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next().ok_or(SimilarityError::Empty)?;
    if first.is_empty() {
        return Err(SimilarityError::Empty);
    }

    let mut acc: Vec<f32> = first.to_vec();
    let mut count = 1usize;
    for v in iter {
        if v.len() != acc.len() {
            return Err(SimilarityError::DimensionMismatch {
                left: acc.len(),
                right: v.len(),
            });
        }
        for (slot, x) in acc.iter_mut().zip(v.iter()) {
            *slot += x;
        }
        count += 1;
    }

    let inv = 1.0 / count as f32;
    for slot in acc.iter_mut() {
        *slot *= inv;
    }
    Ok(acc)
}
