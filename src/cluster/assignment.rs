//! Similarity-based cluster assignment and per-cluster characterization

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::cluster::kmeans::{KMeans, KMeansOptions};
use crate::cluster::silhouette::validate_distances;
use crate::cluster::{Cluster, FeatureMean};
use crate::data::CountyTable;
use crate::error::{AnalysisError, Result};
use crate::similarity::SimilarityMatrix;

/// Square distance matrix in [0, 1] with a zero diagonal
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    values: Array2<f64>,
}

impl DistanceMatrix {
    /// Wrap precomputed distances, checking shape and diagonal
    pub fn new(ids: Vec<String>, values: Array2<f64>) -> Result<Self> {
        validate_distances(&values)?;
        if ids.len() != values.nrows() {
            return Err(AnalysisError::invalid_input(format!(
                "{} identifiers for a {}x{} distance matrix",
                ids.len(),
                values.nrows(),
                values.ncols()
            )));
        }
        Ok(Self { ids, values })
    }

    /// `1 - minmax(similarity)` with the diagonal forced to zero.
    ///
    /// Min and max are taken over the whole matrix. A constant matrix normalizes
    /// to all zeros, so every off-diagonal distance becomes 1.
    pub fn from_similarity(similarity: &SimilarityMatrix) -> Result<Self> {
        let values = similarity.values();
        if values.is_empty() {
            return Err(AnalysisError::invalid_input("similarity matrix is empty"));
        }

        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        if range == 0.0 {
            log::warn!("Similarity matrix is constant ({}), all distances set to 1", min);
        }

        let mut distances = values.mapv(|v| {
            let normalized = if range > 0.0 { (v - min) / range } else { 0.0 };
            1.0 - normalized
        });
        distances.diag_mut().fill(0.0);

        Self::new(similarity.ids().to_vec(), distances)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// County identifier to cluster label, fixed once created
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    ids: Vec<String>,
    labels: Vec<usize>,
    k: usize,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ClusterAssignment {
    pub fn new(ids: Vec<String>, labels: Vec<usize>, k: usize) -> Result<Self> {
        if ids.len() != labels.len() {
            return Err(AnalysisError::invalid_input(format!(
                "{} labels for {} counties",
                labels.len(),
                ids.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= k) {
            return Err(AnalysisError::invalid_input(format!(
                "label {bad} is outside [0, {k})"
            )));
        }
        let mut index = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            index.entry(id.clone()).or_insert(i);
        }
        Ok(Self { ids, labels, k, index })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Label of a county; the first entry wins if an identifier repeats
    pub fn label_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|&i| self.labels[i])
    }

    /// Counties assigned to `label`, in assignment order
    pub fn members(&self, label: usize) -> Vec<&str> {
        self.iter()
            .filter(|&(_, l)| l == label)
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of counties per label
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.ids.iter().map(String::as_str).zip(self.labels.iter().copied())
    }
}

/// Per-cluster feature means plus the count of table rows that matched no county
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCharacterization {
    pub features: Vec<String>,
    pub clusters: Vec<Cluster>,
    pub unmatched: usize,
}

/// Partition counties into `k` groups from their similarity matrix.
pub fn assign_clusters(
    similarity: &SimilarityMatrix,
    k: usize,
    seed: u64,
    options: &KMeansOptions,
) -> Result<ClusterAssignment> {
    let distances = DistanceMatrix::from_similarity(similarity)?;
    assign_from_distances(&distances, k, seed, options)
}

/// K-Means over the distance rows, each row used as a feature vector
pub fn assign_from_distances(
    distances: &DistanceMatrix,
    k: usize,
    seed: u64,
    options: &KMeansOptions,
) -> Result<ClusterAssignment> {
    log::info!("Assigning {} counties to {} clusters (seed {})", distances.len(), k, seed);

    let fit = KMeans::new(k, seed)
        .with_options(*options)
        .fit(distances.values())?;
    log::debug!(
        "K-Means finished after {} iterations, inertia {:.6}",
        fit.iterations,
        fit.inertia
    );

    ClusterAssignment::new(distances.ids().to_vec(), fit.labels, k)
}

/// Mean of each requested column per cluster, joining table rows on county identifier.
///
/// Rows whose county has no assignment are skipped and counted; missing cells
/// are ignored in the means. Only clusters with at least one matched table row
/// are reported.
pub fn characterize_clusters(
    table: &CountyTable,
    assignment: &ClusterAssignment,
    features: &[&str],
) -> Result<ClusterCharacterization> {
    table.require_columns(features)?;
    let columns: Vec<&[Option<f64>]> = features
        .iter()
        .map(|f| table.column(f))
        .collect::<Result<_>>()?;

    let k = assignment.k();

    let mut sums = vec![vec![0.0; features.len()]; k];
    let mut counts = vec![vec![0usize; features.len()]; k];
    let mut rows = vec![0usize; k];
    let mut unmatched = 0;

    for (row, key) in table.keys().iter().enumerate() {
        let Some(label) = assignment.label_of(&key.geoid()) else {
            unmatched += 1;
            continue;
        };
        rows[label] += 1;
        for (f, column) in columns.iter().enumerate() {
            if let Some(value) = column[row] {
                sums[label][f] += value;
                counts[label][f] += 1;
            }
        }
    }

    if unmatched > 0 {
        log::debug!("{} table rows had no cluster assignment", unmatched);
    }

    let sizes = assignment.sizes();
    let clusters = (0..k)
        .filter(|&c| sizes[c] > 0 && rows[c] > 0)
        .map(|c| Cluster {
            id: c,
            members: assignment.members(c).into_iter().map(str::to_string).collect(),
            size: sizes[c],
            rows: rows[c],
            means: features
                .iter()
                .enumerate()
                .map(|(f, name)| FeatureMean {
                    feature: name.to_string(),
                    mean: (counts[c][f] > 0).then(|| sums[c][f] / counts[c][f] as f64),
                })
                .collect(),
        })
        .collect();

    Ok(ClusterCharacterization {
        features: features.iter().map(|f| f.to_string()).collect(),
        clusters,
        unmatched,
    })
}
