//! Vector math shared by the update policy and the neighbor index.

use crate::error::{EmbeddingError, Result};

fn same_length(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        })
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine of the angle between two vectors, clamped to `[-1, 1]`.
///
/// A zero vector has no direction; its similarity to anything is 0, so it
/// always counts as drifted under the update policy.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    same_length(a, b)?;

    let (norm_a, norm_b) = (norm(a), norm(b));
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// `1 - cosine_similarity`, in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

/// L2 distance.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    same_length(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_rescaled_vector_is_a_restatement() {
        let stored = [0.2, 0.4, 0.6];
        let rescaled = [1.0, 2.0, 3.0];
        assert!(close(cosine_similarity(&stored, &rescaled).unwrap(), 1.0));
        assert!(close(cosine_distance(&stored, &rescaled).unwrap(), 0.0));
    }

    #[test]
    fn test_cosine_range() {
        let x = [1.0, 0.0];
        assert!(close(cosine_similarity(&x, &[0.0, 3.0]).unwrap(), 0.0));
        assert!(close(cosine_similarity(&x, &[-2.0, 0.0]).unwrap(), -1.0));
        assert!(close(cosine_distance(&x, &[-2.0, 0.0]).unwrap(), 2.0));
    }

    #[test]
    fn test_zero_vector_has_zero_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.5, 0.5]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_reports_both_dimensions() {
        let err = cosine_similarity(&[1.0; 4], &[1.0; 8]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 8
            }
        ));
        assert!(euclidean_distance(&[1.0; 4], &[1.0; 8]).is_err());
    }

    #[test]
    fn test_euclidean_distance_is_symmetric() {
        let a = [1.0, 2.0];
        let b = [4.0, 6.0];
        assert!(close(euclidean_distance(&a, &b).unwrap(), 5.0));
        assert!(close(euclidean_distance(&b, &a).unwrap(), 5.0));
    }
}
