//! Similarity — cosine over numeric vectors, Jaccard over token sets.

use crate::error::{EngramError, Result};
use std::collections::HashSet;

/// Cosine similarity between two vectors. Returns `0.0` when either norm is
/// zero. Fails with [`EngramError::DimensionMismatch`] when the lengths
/// differ. Inputs may be signed; the result is in `[-1, 1]`, typically
/// `[0, 1]` for normalized embeddings.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EngramError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a * norm_b))
}

/// Jaccard similarity over two token slices, `|A ∩ B| / |A ∪ B|`. `1.0` when
/// both sides are empty, `0.0` when exactly one side is empty.
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;
    intersection / union
}
