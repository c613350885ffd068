//! Cluster analysis module

pub mod assignment;
pub mod kmeans;
pub mod selection;
pub mod silhouette;

use serde::{Deserialize, Serialize};

pub use assignment::{assign_clusters, characterize_clusters, ClusterAssignment, DistanceMatrix};
pub use kmeans::{KMeans, KMeansFit, KMeansOptions};
pub use selection::{evaluate_clustering, ClusterEvaluation};

/// A cluster of counties and its characteristic feature means
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster label in [0, k)
    pub id: usize,

    /// County identifiers assigned to this cluster
    pub members: Vec<String>,

    /// Number of assigned counties
    pub size: usize,

    /// Number of table rows that joined onto this cluster
    pub rows: usize,

    /// Mean of each requested feature over the joined rows, in request order
    pub means: Vec<FeatureMean>,
}

/// Mean of one feature within a cluster (`None` when every joined value is missing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMean {
    pub feature: String,
    pub mean: Option<f64>,
}

impl Cluster {
    /// Mean of a feature by name
    pub fn mean(&self, feature: &str) -> Option<f64> {
        self.means
            .iter()
            .find(|m| m.feature == feature)
            .and_then(|m| m.mean)
    }
}
