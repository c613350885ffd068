//! Silhouette score over a precomputed distance matrix

use ndarray::Array2;

use crate::error::{AnalysisError, Result};

/// Check that a matrix can serve as precomputed pairwise distances.
pub fn validate_distances(distances: &Array2<f64>) -> Result<()> {
    let n = distances.nrows();
    if n == 0 {
        return Err(AnalysisError::invalid_input("distance matrix is empty"));
    }
    if distances.ncols() != n {
        return Err(AnalysisError::invalid_input(format!(
            "distance matrix must be square, got {}x{}",
            n,
            distances.ncols()
        )));
    }
    if let Some(i) = (0..n).find(|&i| distances[[i, i]] != 0.0) {
        return Err(AnalysisError::invalid_input(format!(
            "distance matrix has a non-zero diagonal at row {i}"
        )));
    }
    if distances.iter().any(|d| !d.is_finite() || *d < 0.0) {
        return Err(AnalysisError::invalid_input(
            "distance matrix must be finite and non-negative",
        ));
    }
    Ok(())
}

/// Mean silhouette coefficient using `distances` as the pairwise metric.
///
/// For each row, `a` is the mean distance to the other members of its cluster
/// and `b` the smallest mean distance to another cluster; its coefficient is
/// `(b - a) / max(a, b)`, or 0 for members of singleton clusters. Requires
/// between 2 and n - 1 distinct labels.
pub fn silhouette_score(distances: &Array2<f64>, labels: &[usize]) -> Result<f64> {
    validate_distances(distances)?;
    let n = distances.nrows();
    if labels.len() != n {
        return Err(AnalysisError::invalid_input(format!(
            "{} labels for {} rows",
            labels.len(),
            n
        )));
    }

    let n_clusters = labels.iter().max().map_or(0, |&m| m + 1);
    let mut sizes = vec![0usize; n_clusters];
    for &label in labels {
        sizes[label] += 1;
    }
    let distinct = sizes.iter().filter(|&&s| s > 0).count();
    if distinct < 2 {
        return Err(AnalysisError::insufficient_data(2, distinct));
    }
    if distinct > n - 1 {
        return Err(AnalysisError::insufficient_data(distinct + 1, n));
    }

    let mut total = 0.0;
    let mut cluster_sums = vec![0.0; n_clusters];
    for i in 0..n {
        cluster_sums.iter_mut().for_each(|s| *s = 0.0);
        for j in 0..n {
            cluster_sums[labels[j]] += distances[[i, j]];
        }

        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        let a = cluster_sums[own] / (sizes[own] - 1) as f64;
        let b = (0..n_clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| cluster_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    Ok(total / n as f64)
}
