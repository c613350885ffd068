//! Attach a per-year metric to adjacency edges

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::CountyTable;
use crate::error::Result;
use crate::graph::AdjacencyPair;
use crate::types::CountyKey;

/// Adjacency row with the metric value at both ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedEdge {
    pub year: i32,
    pub county: CountyKey,
    pub neighbor: CountyKey,
    pub county_value: f64,
    pub neighbor_value: f64,
}

/// Weighted adjacency for one metric and year
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedNetwork {
    pub metric: String,
    pub year: i32,
    pub edges: Vec<WeightedEdge>,
    /// Adjacency rows excluded because either side had no metric value
    pub dropped: usize,
}

impl WeightedNetwork {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Mean of `metric` per county over the rows of `year`, ignoring missing cells
pub fn metric_by_county(table: &CountyTable, metric: &str, year: i32) -> Result<HashMap<CountyKey, f64>> {
    let values = table.column(metric)?;
    let years = table.require_years("network weighting")?;

    let mut sums: HashMap<CountyKey, (f64, usize)> = HashMap::new();
    for (row, key) in table.keys().iter().enumerate() {
        if years[row] != year {
            continue;
        }
        if let Some(value) = values[row] {
            let entry = sums.entry(*key).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    Ok(sums
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect())
}

/// Join the metric onto both ends of every adjacency row.
///
/// Rows where either county lacks a value for `year` are dropped and counted.
/// Edge order follows the adjacency list.
pub fn weight_network(
    adjacency: &[AdjacencyPair],
    table: &CountyTable,
    metric: &str,
    year: i32,
) -> Result<WeightedNetwork> {
    let values = metric_by_county(table, metric, year)?;
    if values.is_empty() {
        log::warn!("No '{}' values for {}; the weighted network is empty", metric, year);
    }

    let mut edges = Vec::with_capacity(adjacency.len());
    let mut dropped = 0;
    for pair in adjacency {
        match (values.get(&pair.county), values.get(&pair.neighbor)) {
            (Some(&county_value), Some(&neighbor_value)) => edges.push(WeightedEdge {
                year,
                county: pair.county,
                neighbor: pair.neighbor,
                county_value,
                neighbor_value,
            }),
            _ => dropped += 1,
        }
    }

    log::info!(
        "Weighted {} adjacency rows with '{}' for {} ({} dropped)",
        edges.len(),
        metric,
        year,
        dropped
    );

    Ok(WeightedNetwork {
        metric: metric.to_string(),
        year,
        edges,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;

    fn pair(a: CountyKey, b: CountyKey) -> AdjacencyPair {
        AdjacencyPair { county: a, neighbor: b }
    }

    fn metric_table() -> CountyTable {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);
        CountyTable::new(vec![a, a, b, b, c])
            .with_years(vec![2022, 2022, 2022, 2021, 2022])
            .unwrap()
            .with_column("m", vec![Some(1.0), Some(3.0), Some(5.0), Some(100.0), None])
            .unwrap()
    }

    #[test]
    fn test_weights_use_yearly_mean_and_drop_missing() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);
        let adjacency = vec![pair(a, b), pair(b, a), pair(b, c), pair(c, b)];

        let network = weight_network(&adjacency, &metric_table(), "m", 2022).unwrap();
        assert_eq!(network.dropped, 2);
        assert_eq!(network.edges.len(), 2);
        assert_eq!(network.edges[0].county, a);
        assert_eq!(network.edges[0].county_value, 2.0);
        assert_eq!(network.edges[0].neighbor_value, 5.0);
        assert_eq!(network.edges[1].county_value, 5.0);
    }

    #[test]
    fn test_missing_metric_column_is_invalid() {
        let err = weight_network(&[], &metric_table(), "nope", 2022).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn test_table_without_years_is_invalid() {
        let table = CountyTable::new(vec![CountyKey::new(1, 1)])
            .with_column("m", vec![Some(1.0)])
            .unwrap();
        assert!(matches!(
            weight_network(&[], &table, "m", 2022),
            Err(AnalysisError::InvalidInput(_))
        ));
    }
}
