//! Pairwise county similarity over standardized features

use std::collections::HashMap;

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::FeatureMatrix;
use crate::error::{AnalysisError, Result};

/// Square, symmetric similarity matrix keyed on both axes by county identifier
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    values: Array2<f64>,
}

/// One entry of the flattened similarity matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPair {
    pub first: String,
    pub second: String,
    pub similarity: f64,
}

impl SimilarityMatrix {
    /// Wrap a precomputed square matrix
    pub fn new(ids: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != values.ncols() || values.nrows() != ids.len() {
            return Err(AnalysisError::invalid_input(format!(
                "similarity matrix is {}x{} for {} identifiers",
                values.nrows(),
                values.ncols(),
                ids.len()
            )));
        }
        let index: HashMap<String, usize> = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
        if index.len() != ids.len() {
            return Err(AnalysisError::invalid_input("duplicate county identifiers"));
        }
        Ok(Self { ids, index, values })
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

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Similarity between two counties by identifier
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.values[[self.index_of(a)?, self.index_of(b)?]])
    }

    /// The `n` most similar pairs of distinct counties.
    ///
    /// The matrix is flattened column by column, self pairs are dropped and the
    /// rest is stably sorted by descending similarity. Both orientations of a
    /// pair are listed.
    pub fn top_pairs(&self, n: usize) -> Vec<SimilarPair> {
        let size = self.len();
        let mut pairs: Vec<(usize, usize, f64)> = Vec::with_capacity(size * size.saturating_sub(1));
        for j in 0..size {
            for i in 0..size {
                if self.ids[i] != self.ids[j] {
                    pairs.push((j, i, self.values[[i, j]]));
                }
            }
        }

        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        pairs
            .into_iter()
            .take(n)
            .map(|(first, second, similarity)| SimilarPair {
                first: self.ids[first].clone(),
                second: self.ids[second].clone(),
                similarity,
            })
            .collect()
    }
}

/// Standardize each column to zero mean and unit population variance.
///
/// Fails on an empty matrix or any zero-variance column.
pub fn standardize(features: &FeatureMatrix) -> Result<Array2<f64>> {
    let values = features.values();
    if values.nrows() == 0 || values.ncols() == 0 {
        return Err(AnalysisError::invalid_input("feature matrix is empty"));
    }

    let means = values
        .mean_axis(Axis(0))
        .ok_or_else(|| AnalysisError::invalid_input("feature matrix is empty"))?;
    let stds = values.std_axis(Axis(0), 0.0);

    if let Some(col) = stds.iter().position(|&s| s == 0.0 || !s.is_finite()) {
        return Err(AnalysisError::invalid_input(format!(
            "column '{}' has zero variance",
            features.columns()[col]
        )));
    }

    Ok((values - &means) / &stds)
}

/// Cosine similarity between every pair of rows.
///
/// Rows with zero norm are similar to nothing (0 everywhere). The result is
/// exactly symmetric with a diagonal of 1 for every non-zero row.
pub fn cosine_similarity(rows: &Array2<f64>) -> Array2<f64> {
    let n = rows.nrows();
    let norms: Vec<f64> = rows
        .axis_iter(Axis(0))
        .map(|row| row.dot(&row).sqrt())
        .collect();

    // Upper triangle in parallel, then mirrored
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i..n)
                .map(|j| {
                    if norms[i] == 0.0 || norms[j] == 0.0 {
                        0.0
                    } else if i == j {
                        1.0
                    } else {
                        let dot = rows.row(i).dot(&rows.row(j));
                        (dot / (norms[i] * norms[j])).clamp(-1.0, 1.0)
                    }
                })
                .collect()
        })
        .collect();

    let mut similarity = Array2::zeros((n, n));
    for (i, row) in upper.into_iter().enumerate() {
        for (offset, value) in row.into_iter().enumerate() {
            let j = i + offset;
            similarity[[i, j]] = value;
            similarity[[j, i]] = value;
        }
    }
    similarity
}

/// Standardize the features and compute the county similarity matrix
pub fn county_similarity(features: &FeatureMatrix) -> Result<SimilarityMatrix> {
    log::info!(
        "Computing cosine similarity for {} counties over {} features",
        features.nrows(),
        features.ncols()
    );

    let scaled = standardize(features)?;
    let similarity = cosine_similarity(&scaled);

    SimilarityMatrix::new(features.geoids(), similarity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CountyKey;

    fn features() -> FeatureMatrix {
        FeatureMatrix::from_rows(
            vec![
                CountyKey::new(1, 1),
                CountyKey::new(1, 3),
                CountyKey::new(6, 37),
                CountyKey::new(48, 201),
            ],
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![
                vec![1.0, 2.0, 0.5],
                vec![1.1, 2.1, 0.4],
                vec![9.0, 0.5, 3.0],
                vec![4.0, 7.0, 1.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_standardize_zero_mean_unit_variance() {
        let scaled = standardize(&features()).unwrap();
        for col in scaled.axis_iter(Axis(1)) {
            assert!(col.mean().unwrap().abs() < 1e-12);
            assert!((col.std(0.0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_variance_column_is_rejected() {
        let features = FeatureMatrix::from_rows(
            vec![CountyKey::new(1, 1), CountyKey::new(1, 3)],
            vec!["x".to_string(), "flat".to_string()],
            vec![vec![1.0, 5.0], vec![2.0, 5.0]],
        )
        .unwrap();
        let err = county_similarity(&features).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(msg) if msg.contains("flat")));
    }

    #[test]
    fn test_similarity_is_square_symmetric_with_maximal_diagonal() {
        let sim = county_similarity(&features()).unwrap();
        let values = sim.values();
        assert_eq!(values.dim(), (4, 4));
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(values[[i, j]], values[[j, i]]);
                assert!(values[[i, i]] >= values[[i, j]]);
            }
        }
        assert_eq!(sim.ids(), &["01001", "01003", "06037", "48201"]);
    }

    #[test]
    fn test_top_pairs_skip_self_and_sorted() {
        let sim = county_similarity(&features()).unwrap();
        let pairs = sim.top_pairs(100);
        assert_eq!(pairs.len(), 12);
        assert!(pairs.iter().all(|p| p.first != p.second));
        assert!(pairs.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        // The two near-identical counties lead, in column-major order
        assert_eq!(pairs[0].first, "01001");
        assert_eq!(pairs[0].second, "01003");
        assert_eq!(pairs[1].first, "01003");
        assert_eq!(pairs[1].second, "01001");
    }

    #[test]
    fn test_top_pairs_ties_keep_enumeration_order() {
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let values = Array2::from_shape_vec(
            (3, 3),
            vec![1.0, 0.5, 0.5, 0.5, 1.0, 0.5, 0.5, 0.5, 1.0],
        )
        .unwrap();
        let sim = SimilarityMatrix::new(ids, values).unwrap();
        let pairs: Vec<(String, String)> = sim
            .top_pairs(3)
            .into_iter()
            .map(|p| (p.first, p.second))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "b".to_string()),
                ("a".to_string(), "c".to_string()),
                ("b".to_string(), "a".to_string()),
            ]
        );
    }
}
