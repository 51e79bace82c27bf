//! Vector operations for retrieval.

use crate::{Error, Result};

pub type Vector = Vec<f32>;

pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::validation(format!(
            "Vector dimensions must match: {} != {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn normalize_vector(v: &[f32]) -> Vector {
    let mag = magnitude(v);
    if mag == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

/// Cosine similarity in `[-1, 1]`; zero when either side is the zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (mag_a * mag_b))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityResult {
    pub index: usize,
    pub score: f32,
}

/// Indices of the `top_k` candidates most similar to `query`, best first.
///
/// Candidates whose dimensions differ from the query are skipped. Ties keep
/// candidate order.
pub fn top_k_cosine(query: &[f32], candidates: &[&[f32]], top_k: usize) -> Vec<SimilarityResult> {
    let mut scores: Vec<SimilarityResult> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, c)| {
            cosine_similarity(query, c)
                .ok()
                .map(|score| SimilarityResult { index, score })
        })
        .collect();
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scores.truncate(top_k);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_dot_product_basic() {
        // 1*4 + 2*5 + 3*6
        assert!(approx_eq(dot_product(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap(), 32.0));
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(dot_product(&[1.0, 2.0], &[1.0, 2.0, 3.0]).is_err());
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]).unwrap(), 1.0));
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).unwrap(), 0.0));
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap(), -1.0));
        assert!(approx_eq(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0));
    }

    #[test]
    fn test_normalize() {
        let n = normalize_vector(&[3.0, 4.0]);
        assert!(approx_eq(n[0], 0.6) && approx_eq(n[1], 0.8));
        assert_eq!(normalize_vector(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_top_k_orders_and_skips_mismatched() {
        let q = [1.0, 0.0];
        let a = [0.0, 1.0];
        let b = [1.0, 0.1];
        let bad = [1.0, 0.0, 0.0];
        let c = [1.0, 1.0];
        let candidates: Vec<&[f32]> = vec![&a[..], &b[..], &bad[..], &c[..]];
        let top = top_k_cosine(&q, &candidates, 2);
        assert_eq!(top.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 3]);
    }
}
