//! Similarity metrics over fixed-dimension vectors.
//!
//! Every function here is pure, deterministic, and stateless: same inputs
//! always produce the same outputs, no suspension points, no shared state.
//! Zero vectors always yield a similarity of `0.0`, never `NaN`.

use crate::error::{AppError, VectorStoreError};

fn check_shape(a: &[f32], b: &[f32]) -> Result<(), AppError> {
    if a.is_empty() || b.is_empty() {
        return Err(VectorStoreError::ShapeError("empty vector".into()).into());
    }
    if a.len() != b.len() {
        return Err(VectorStoreError::ShapeError(format!(
            "length mismatch: {} vs {}",
            a.len(),
            b.len()
        ))
        .into());
    }
    Ok(())
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot_raw(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Dot product of two vectors of equal length.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    check_shape(a, b)?;
    Ok(dot_raw(a, b))
}

/// Cosine similarity in `[-1, 1]`. Zero vectors yield `0.0`, never `NaN`.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    check_shape(a, b)?;
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    let sim = dot_raw(a, b) / (na * nb);
    Ok(sim.clamp(-1.0, 1.0))
}

/// `1 - cosine(a, b)`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    Ok(1.0 - cosine(a, b)?)
}

/// Euclidean (L2) distance.
pub fn l2(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    check_shape(a, b)?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

/// Manhattan (L1) distance.
pub fn manhattan(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    check_shape(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum())
}

/// Dot product of the L2-normalized inputs. Equivalent to [`cosine`] but
/// useful when the caller already holds normalized vectors and wants to
/// avoid recomputing norms.
pub fn normalized_dot_product(a: &[f32], b: &[f32]) -> Result<f32, AppError> {
    cosine(a, b)
}

/// Cosine similarity of `query` against every row of `matrix`.
pub fn cosine_batch(query: &[f32], matrix: &[Vec<f32>]) -> Result<Vec<f32>, AppError> {
    matrix.iter().map(|row| cosine(query, row)).collect()
}

/// Returns `(index, score)` pairs with `score >= threshold`, sorted by score
/// descending, truncated to `k`. Ties are broken by smaller index first.
pub fn top_k(
    query: &[f32],
    matrix: &[Vec<f32>],
    k: usize,
    threshold: f32,
) -> Result<Vec<(usize, f32)>, AppError> {
    let scores = cosine_batch(query, matrix)?;
    let mut candidates: Vec<(usize, f32)> = scores
        .into_iter()
        .enumerate()
        .filter(|(_, score)| *score >= threshold)
        .collect();

    candidates.sort_by(|(idx_a, score_a), (idx_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(idx_a.cmp(idx_b))
    });

    candidates.truncate(k);
    Ok(candidates)
}

/// Pairwise cosine similarity matrix. The diagonal is `1.0` for non-zero
/// rows; zero-vector rows/columns are zeroed.
pub fn similarity_matrix(matrix: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, AppError> {
    let n = matrix.len();
    let mut out = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in i..n {
            let score = if i == j {
                if norm(&matrix[i]) == 0.0 {
                    0.0
                } else {
                    1.0
                }
            } else {
                cosine(&matrix[i], &matrix[j])?
            };
            out[i][j] = score;
            out[j][i] = score;
        }
    }
    Ok(out)
}

/// Mean pairwise distance across `matrix`. Returns `0.0` for fewer than two
/// vectors.
pub fn diversity(matrix: &[Vec<f32>]) -> Result<f32, AppError> {
    if matrix.len() < 2 {
        return Ok(0.0);
    }
    let sim = similarity_matrix(matrix)?;
    let n = sim.len();
    let mut total = 0.0f32;
    let mut count = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += 1.0 - sim[i][j];
            count += 1;
        }
    }
    Ok(if count == 0 { 0.0 } else { total / count as f32 })
}

/// Mean-pool a set of embeddings into one vector, optionally re-normalizing
/// to unit L2 length afterward. Used by the chunk-averaging embedding
/// fallback (see the provider orchestrator).
pub fn mean_pool(vectors: &[Vec<f32>], renormalize: bool) -> Result<Vec<f32>, AppError> {
    let first = vectors
        .first()
        .ok_or_else(|| AppError::from(VectorStoreError::ShapeError("no vectors to pool".into())))?;
    let dim = first.len();
    for v in vectors {
        if v.len() != dim {
            return Err(VectorStoreError::ShapeError("mismatched dimensions in pool".into()).into());
        }
    }

    let mut pooled = vec![0.0f32; dim];
    for v in vectors {
        for (acc, x) in pooled.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let count = vectors.len() as f32;
    for acc in pooled.iter_mut() {
        *acc /= count;
    }

    if renormalize {
        let n = norm(&pooled);
        if n > 0.0 {
            for acc in pooled.iter_mut() {
                *acc /= n;
            }
        }
    }

    Ok(pooled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_unit_vectors_is_one() {
        let u = vec![1.0, 0.0, 0.0];
        assert!((cosine(&u, &u).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_opposite_vectors_is_negative_one() {
        let u = vec![1.0, 0.0, 0.0];
        let neg_u = vec![-1.0, 0.0, 0.0];
        assert!((cosine(&u, &neg_u).unwrap() - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_yields_zero_never_nan() {
        let zero = vec![0.0, 0.0, 0.0];
        let other = vec![1.0, 2.0, 3.0];
        let score = cosine(&zero, &other).unwrap();
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());
    }

    #[test]
    fn mismatched_length_is_shape_error() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(matches!(
            cosine(&a, &b),
            Err(AppError::VectorStore(VectorStoreError::ShapeError(_)))
        ));
    }

    #[test]
    fn empty_vector_is_shape_error() {
        let a: Vec<f32> = vec![];
        let b = vec![1.0];
        assert!(cosine(&a, &b).is_err());
    }

    #[test]
    fn top_k_returns_exactly_k_sorted_descending_no_duplicates() {
        let query = vec![1.0, 0.0];
        let matrix = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.9, 0.1],
            vec![-1.0, 0.0],
        ];
        let result = top_k(&query, &matrix, 2, 0.0).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result[0].1 >= result[1].1);
        let indices: std::collections::HashSet<_> = result.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices.len(), 2);
    }

    #[test]
    fn top_k_ties_broken_by_smaller_index() {
        let query = vec![1.0, 0.0];
        let matrix = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
        let result = top_k(&query, &matrix, 2, 0.0).unwrap();
        assert_eq!(result[0].0, 0);
        assert_eq!(result[1].0, 1);
    }

    #[test]
    fn top_k_filters_by_threshold_before_truncating() {
        let query = vec![1.0, 0.0];
        let matrix = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let result = top_k(&query, &matrix, 5, 0.5).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, 0);
    }

    #[test]
    fn diversity_of_fewer_than_two_vectors_is_zero() {
        assert_eq!(diversity(&[vec![1.0, 0.0]]).unwrap(), 0.0);
        assert_eq!(diversity(&[]).unwrap(), 0.0);
    }

    #[test]
    fn diversity_of_orthogonal_vectors_is_one() {
        let matrix = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!((diversity(&matrix).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mean_pool_renormalizes_to_unit_length() {
        let vectors = vec![vec![2.0, 0.0], vec![0.0, 2.0]];
        let pooled = mean_pool(&vectors, true).unwrap();
        let n = norm(&pooled);
        assert!((n - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mean_pool_mismatched_dims_is_error() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        assert!(mean_pool(&vectors, false).is_err());
    }
}
