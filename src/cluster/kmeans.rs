//! K-means clustering.
//!
//! Lloyd's algorithm with k-means++ initialization, minimizing the
//! within-cluster sum of squares (inertia):
//!
//! ```text
//! WCSS = Σₖ Σᵢ∈Cₖ ||xᵢ - μₖ||²
//! ```
//!
//! Every fit is driven by an explicit seed; identical data, options and seed
//! always reproduce identical labels.

use ndarray::{Array2, ArrayView1, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ClusteringConfig;
use crate::error::{AnalysisError, Result};

/// Iteration controls shared by every K-Means fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansOptions {
    /// Maximum Lloyd iterations per initialization.
    pub max_iter: usize,
    /// Convergence tolerance, relative to the mean feature variance.
    pub tol: f64,
    /// Number of k-means++ initializations.
    pub n_init: usize,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
        }
    }
}

impl From<&ClusteringConfig> for KMeansOptions {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            max_iter: config.max_iter,
            tol: config.tol,
            n_init: config.n_init,
        }
    }
}

/// Result of a K-Means fit.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Cluster label per row.
    pub labels: Vec<usize>,
    /// Cluster centers, one row per cluster.
    pub centroids: Array2<f64>,
    /// Sum of squared distances from each row to its nearest center.
    pub inertia: f64,
    /// Lloyd iterations used by the winning initialization.
    pub iterations: usize,
}

/// K-means clustering algorithm.
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    seed: u64,
    options: KMeansOptions,
}

impl KMeans {
    /// Create a new K-means clusterer with an explicit seed.
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            seed,
            options: KMeansOptions::default(),
        }
    }

    /// Replace the iteration controls.
    pub fn with_options(mut self, options: KMeansOptions) -> Self {
        self.options = options;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn validate(&self, data: &Array2<f64>) -> Result<()> {
        let n = data.nrows();
        if n == 0 || data.ncols() == 0 {
            return Err(AnalysisError::invalid_input("cannot cluster an empty matrix"));
        }
        if self.k == 0 {
            return Err(AnalysisError::invalid_input("cluster count must be at least 1"));
        }
        if self.k > n {
            return Err(AnalysisError::insufficient_data(self.k, n));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::invalid_input("matrix contains non-finite values"));
        }
        Ok(())
    }

    /// Fit from `n_init` seeded k-means++ initializations, keeping the lowest inertia.
    pub fn fit(&self, data: &Array2<f64>) -> Result<KMeansFit> {
        self.validate(data)?;

        let tol = self.absolute_tol(data);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<KMeansFit> = None;

        for _ in 0..self.options.n_init.max(1) {
            let centroids = init_centroids(data, self.k, &mut rng);
            let fit = self.lloyd(data, centroids, tol);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }

        best.ok_or_else(|| AnalysisError::invalid_input("no initialization was run"))
    }

    /// Fit from the given initial centers (one Lloyd run).
    pub fn fit_from(&self, data: &Array2<f64>, centroids: Array2<f64>) -> Result<KMeansFit> {
        self.validate(data)?;
        if centroids.nrows() != self.k || centroids.ncols() != data.ncols() {
            return Err(AnalysisError::invalid_input(format!(
                "initial centers are {}x{}, expected {}x{}",
                centroids.nrows(),
                centroids.ncols(),
                self.k,
                data.ncols()
            )));
        }
        let tol = self.absolute_tol(data);
        Ok(self.lloyd(data, centroids, tol))
    }

    /// Tolerance scaled by the mean per-column variance of the data
    fn absolute_tol(&self, data: &Array2<f64>) -> f64 {
        let variances = data.var_axis(Axis(0), 0.0);
        variances.mean().unwrap_or(0.0) * self.options.tol
    }

    fn lloyd(&self, data: &Array2<f64>, mut centroids: Array2<f64>, tol: f64) -> KMeansFit {
        let n = data.nrows();
        let d = data.ncols();
        let mut labels = vec![0usize; n];
        let mut iterations = 0;

        for _ in 0..self.options.max_iter {
            iterations += 1;
            assign_nearest(data, &centroids, &mut labels);

            // Update step; empty clusters keep their previous center
            let mut sums = Array2::<f64>::zeros((self.k, d));
            let mut counts = vec![0usize; self.k];
            for (i, &label) in labels.iter().enumerate() {
                let mut sum = sums.row_mut(label);
                sum += &data.row(i);
                counts[label] += 1;
            }

            let mut shift = 0.0;
            for c in 0..self.k {
                if counts[c] == 0 {
                    continue;
                }
                let mean = sums.row(c).mapv(|v| v / counts[c] as f64);
                shift += squared_distance(&mean.view(), &centroids.row(c));
                centroids.row_mut(c).assign(&mean);
            }

            if shift <= tol {
                break;
            }
        }

        let inertia = assign_nearest(data, &centroids, &mut labels);

        KMeansFit {
            labels,
            centroids,
            inertia,
            iterations,
        }
    }
}

/// Squared Euclidean distance.
pub(crate) fn squared_distance(a: &ArrayView1<'_, f64>, b: &ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Label each row with its nearest center (lowest index on ties); returns the inertia.
fn assign_nearest(data: &Array2<f64>, centroids: &Array2<f64>, labels: &mut [usize]) -> f64 {
    let distances: Vec<f64> = labels
        .par_iter_mut()
        .enumerate()
        .map(|(i, label)| {
            let point = data.row(i);
            let mut best_cluster = 0;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
                let dist = squared_distance(&point, &centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = c;
                }
            }
            *label = best_cluster;
            best_dist
        })
        .collect();

    distances.iter().sum()
}

/// Squared distance from each row to its nearest center
pub(crate) fn nearest_distances(data: &Array2<f64>, centroids: &Array2<f64>) -> Vec<f64> {
    data.axis_iter(Axis(0))
        .map(|point| {
            centroids
                .axis_iter(Axis(0))
                .map(|c| squared_distance(&point, &c))
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}

/// Initialize centroids using the k-means++ algorithm.
fn init_centroids(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));

    // First centroid: random point
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    // Remaining centroids: sample proportional to squared distance
    for i in 1..k {
        let distances = nearest_distances(data, &centroids.slice(ndarray::s![..i, ..]).to_owned());
        let total: f64 = distances.iter().sum();
        if total == 0.0 {
            let idx = rng.random_range(0..n);
            centroids.row_mut(i).assign(&data.row(idx));
            continue;
        }

        let threshold = rng.random::<f64>() * total;
        let mut cumsum = 0.0;
        let mut selected = n - 1;
        for (j, &d) in distances.iter().enumerate() {
            cumsum += d;
            if cumsum >= threshold && d > 0.0 {
                selected = j;
                break;
            }
        }

        centroids.row_mut(i).assign(&data.row(selected));
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.2],
            [0.2, 0.1],
            [10.0, 10.0],
            [10.1, 9.9],
            [9.8, 10.2],
        ]
    }

    #[test]
    fn test_two_blobs_are_separated() {
        let fit = KMeans::new(2, 42).fit(&blobs()).unwrap();
        assert_eq!(fit.labels[0], fit.labels[1]);
        assert_eq!(fit.labels[1], fit.labels[2]);
        assert_eq!(fit.labels[3], fit.labels[4]);
        assert_eq!(fit.labels[4], fit.labels[5]);
        assert_ne!(fit.labels[0], fit.labels[3]);
        assert!(fit.inertia < 1.0);
    }

    #[test]
    fn test_same_seed_same_labels() {
        let data = blobs();
        let a = KMeans::new(3, 7).fit(&data).unwrap();
        let b = KMeans::new(3, 7).fit(&data).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn test_k_larger_than_rows_is_insufficient() {
        let err = KMeans::new(7, 42).fit(&blobs()).unwrap_err();
        assert_eq!(err, AnalysisError::insufficient_data(7, 6));
    }

    #[test]
    fn test_k_equal_rows_has_zero_inertia() {
        let fit = KMeans::new(6, 42).fit(&blobs()).unwrap();
        assert!(fit.inertia.abs() < 1e-12);
    }

    #[test]
    fn test_fit_from_never_increases_inertia() {
        let data = blobs();
        let init = array![[0.0, 0.0], [0.2, 0.1]];
        let start: f64 = nearest_distances(&data, &init).iter().sum();
        let fit = KMeans::new(2, 0).fit_from(&data, init).unwrap();
        assert!(fit.inertia <= start);
    }
}
