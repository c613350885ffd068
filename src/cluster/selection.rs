//! Cluster count evaluation (elbow and silhouette)

use std::ops::Range;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::cluster::assignment::DistanceMatrix;
use crate::cluster::kmeans::{nearest_distances, KMeans, KMeansFit, KMeansOptions};
use crate::cluster::silhouette::{silhouette_score, validate_distances};
use crate::error::{AnalysisError, Result};

/// Inertia and silhouette per candidate cluster count, as parallel sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvaluation {
    pub k_values: Vec<usize>,
    pub inertia: Vec<f64>,
    pub silhouette: Vec<f64>,
}

impl ClusterEvaluation {
    pub fn len(&self) -> usize {
        self.k_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k_values.is_empty()
    }

    /// `(k, inertia, silhouette)` rows
    pub fn rows(&self) -> impl Iterator<Item = (usize, f64, f64)> + '_ {
        self.k_values
            .iter()
            .zip(&self.inertia)
            .zip(&self.silhouette)
            .map(|((&k, &inertia), &silhouette)| (k, inertia, silhouette))
    }
}

/// Warm-start centers: the previous centers plus the points farthest from them
fn extend_centers(data: &Array2<f64>, previous: &Array2<f64>, k: usize) -> Array2<f64> {
    let mut centers = previous.clone();
    while centers.nrows() < k {
        let distances = nearest_distances(data, &centers);
        let (farthest, _) = distances
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &d)| if d > best.1 { (i, d) } else { best });
        // push_row only fails on a column mismatch, which cannot happen here
        if centers.push_row(data.row(farthest)).is_err() {
            break;
        }
    }
    centers
}

/// Fit K-Means for every k in `k_range` and record inertia and silhouette.
///
/// Each row of the matrix is treated as a feature vector for K-Means, while the
/// silhouette uses the matrix itself as precomputed distances. After the first
/// k, a warm start from the previous centers competes with the fresh seeded
/// fits, so inertia never increases with k. Nothing is selected automatically.
pub fn evaluate_clustering(
    distances: &DistanceMatrix,
    k_range: Range<usize>,
    seed: u64,
    options: &KMeansOptions,
) -> Result<ClusterEvaluation> {
    let data = distances.values();
    validate_distances(data)?;

    let n = data.nrows();
    if k_range.is_empty() {
        return Err(AnalysisError::invalid_input("cluster count range is empty"));
    }
    if k_range.start < 2 {
        return Err(AnalysisError::invalid_input(
            "silhouette needs at least 2 clusters",
        ));
    }
    let k_max = k_range.end - 1;
    if k_max >= n {
        return Err(AnalysisError::insufficient_data(k_max + 1, n));
    }

    log::info!(
        "Evaluating K-Means for k in {}..{} over {} counties",
        k_range.start,
        k_range.end,
        n
    );

    let mut evaluation = ClusterEvaluation {
        k_values: Vec::with_capacity(k_range.len()),
        inertia: Vec::with_capacity(k_range.len()),
        silhouette: Vec::with_capacity(k_range.len()),
    };
    let mut previous: Option<KMeansFit> = None;

    for k in k_range {
        let kmeans = KMeans::new(k, seed).with_options(*options);
        let mut fit = kmeans.fit(data)?;

        if let Some(prev) = &previous {
            let warm = kmeans.fit_from(data, extend_centers(data, &prev.centroids, k))?;
            if warm.inertia < fit.inertia {
                fit = warm;
            }
        }

        let score = silhouette_score(data, &fit.labels)?;
        log::debug!("k={} inertia={:.6} silhouette={:.6}", k, fit.inertia, score);

        evaluation.k_values.push(k);
        evaluation.inertia.push(fit.inertia);
        evaluation.silhouette.push(score);
        previous = Some(fit);
    }

    Ok(evaluation)
}

/// Largest k whose silhouette is defined for this matrix (one less than its rows)
pub fn max_cluster_count(distances: &DistanceMatrix) -> usize {
    distances.values().len_of(Axis(0)).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn grid_distances(n: usize) -> DistanceMatrix {
        // Points on a line at irregular spacing
        let positions: Vec<f64> = (0..n).map(|i| (i as f64).powf(1.3)).collect();
        let max = positions[n - 1];
        let values = Array2::from_shape_fn((n, n), |(i, j)| (positions[i] - positions[j]).abs() / max);
        let ids = (0..n).map(|i| format!("{:05}", i)).collect();
        DistanceMatrix::new(ids, values).unwrap()
    }

    #[test]
    fn test_inertia_is_non_increasing() {
        let distances = grid_distances(12);
        let eval = evaluate_clustering(&distances, 2..10, 42, &KMeansOptions::default()).unwrap();
        assert_eq!(eval.k_values, (2..10).collect::<Vec<_>>());
        assert_eq!(eval.inertia.len(), 8);
        assert!(eval.inertia.windows(2).all(|w| w[1] <= w[0]));
        assert!(eval.silhouette.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_k_exceeding_rows_fails() {
        let distances = grid_distances(5);
        let err = evaluate_clustering(&distances, 2..10, 42, &KMeansOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }

    #[test]
    fn test_reproducible_with_seed() {
        let distances = grid_distances(10);
        let a = evaluate_clustering(&distances, 2..6, 3, &KMeansOptions::default()).unwrap();
        let b = evaluate_clustering(&distances, 2..6, 3, &KMeansOptions::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(max_cluster_count(&distances), 9);
    }
}
