//! End-to-end analysis runs: clustering, spatial network and statistics

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cluster::assignment::{assign_from_distances, ClusterCharacterization};
use crate::cluster::selection::max_cluster_count;
use crate::cluster::{characterize_clusters, evaluate_clustering, ClusterAssignment, ClusterEvaluation, DistanceMatrix, KMeansOptions};
use crate::config::{AnalysisConfig, ClusteringConfig, NetworkConfig};
use crate::data::features::{
    add_demographic_percentages, add_gender_percentages, at_risk_flags, join_columns, per_area, pivot_features,
};
use crate::data::{load, shapes, CountyTable, FeatureMatrix};
use crate::error::Result;
use crate::graph::{
    degree_centrality, pagerank, weight_network, AdjacencyGraphBuilder, CountyAdjacency, CountyPolygon, DegreeScore,
    PageRankResult, WeightedNetwork,
};
use crate::similarity::{county_similarity, SimilarPair, SimilarityMatrix};
use crate::stats::{
    age_group_correlations, at_risk_t_test, grouped_values, linear_regression, one_way_anova, rank_correlations,
    temporal_change_correlation, AgeGroupCorrelation, AnovaResult, FeatureCorrelation, Regression, TTestResult,
    TemporalCorrelation, POPULATION_COLUMN,
};
use crate::{storage, viz};

/// Everything produced by the similarity and clustering stage
#[derive(Debug, Clone)]
pub struct ClusteringReport {
    pub similarity: SimilarityMatrix,
    pub top_pairs: Vec<SimilarPair>,
    pub evaluation: ClusterEvaluation,
    pub assignment: ClusterAssignment,
    pub characterization: ClusterCharacterization,
}

/// Everything produced by the spatial network stage
#[derive(Debug, Clone)]
pub struct NetworkReport {
    pub adjacency: CountyAdjacency,
    pub network: WeightedNetwork,
    pub pagerank: PageRankResult,
    pub degrees: Vec<DegreeScore>,
}

/// Welch t-test of one feature between at-risk and other counties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTest {
    pub feature: String,
    pub test: TTestResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub target: String,
    pub correlations: Vec<FeatureCorrelation>,
    pub at_risk_tests: Vec<FeatureTest>,
    pub cluster_anova: Option<AnovaResult>,
    pub temporal: Option<TemporalCorrelation>,
    pub regression: Option<Regression>,
    pub age_groups: Vec<AgeGroupCorrelation>,
}

/// Statistics that cannot be computed on this data are skipped, not fatal
fn optional<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Skipping {}: {}", what, e);
            None
        }
    }
}

/// Similarity, cluster count evaluation, final assignment and cluster means.
///
/// The evaluated range is capped at `n - 1` clusters so the silhouette stays
/// defined for small inputs.
pub fn run_clustering(
    features: &FeatureMatrix,
    table: &CountyTable,
    summary_features: &[&str],
    config: &ClusteringConfig,
) -> Result<ClusteringReport> {
    table.require_columns(summary_features)?;

    let similarity = county_similarity(features)?;
    let top_pairs = similarity.top_pairs(config.top_pairs);
    let distances = DistanceMatrix::from_similarity(&similarity)?;
    let options = KMeansOptions::from(config);

    let k_end = config.k_range.end.min(max_cluster_count(&distances) + 1);
    if k_end < config.k_range.end {
        log::warn!(
            "Cluster range {:?} capped at k < {} for {} counties",
            config.k_range,
            k_end,
            distances.len()
        );
    }
    let evaluation = evaluate_clustering(&distances, config.k_range.start..k_end, config.seed, &options)?;

    let assignment = assign_from_distances(&distances, config.n_clusters, config.seed, &options)?;
    let characterization = characterize_clusters(table, &assignment, summary_features)?;

    Ok(ClusteringReport {
        similarity,
        top_pairs,
        evaluation,
        assignment,
        characterization,
    })
}

/// Adjacency, weighting, PageRank and degree centrality
pub fn run_network(polygons: &[CountyPolygon], table: &CountyTable, config: &NetworkConfig) -> Result<NetworkReport> {
    let adjacency = AdjacencyGraphBuilder::new()
        .with_spatial_index(config.use_spatial_index)
        .build(polygons)?;
    let network = weight_network(&adjacency.pairs, table, &config.metric, config.year)?;
    let pagerank = pagerank(&network, &config.pagerank)?;
    let degrees = degree_centrality(&adjacency.graph);

    if let Some(top) = &pagerank.top {
        log::info!("Highest PageRank: {} ({:.6})", top.county, top.score);
    }

    Ok(NetworkReport {
        adjacency,
        network,
        pagerank,
        degrees,
    })
}

/// Correlations, at-risk comparisons, cluster ANOVA and change analysis for one target
pub fn run_statistics(
    table: &CountyTable,
    target: &str,
    features: &[&str],
    config: &AnalysisConfig,
    assignment: Option<&ClusterAssignment>,
) -> Result<StatisticsReport> {
    table.require_columns(features)?;
    table.column(target)?;

    let totals = table.total_rows()?;
    let correlations = rank_correlations(&totals, target, features)?;

    let flags = at_risk_flags(&totals, target, config.at_risk_threshold)?;
    let at_risk_tests = features
        .iter()
        .filter_map(|&feature| {
            optional(
                &format!("t-test of {feature}"),
                at_risk_t_test(&totals, &flags, feature),
            )
            .map(|test| FeatureTest {
                feature: feature.to_string(),
                test,
            })
        })
        .collect();

    let cluster_anova = assignment.and_then(|assignment| {
        let labels: Vec<Option<usize>> = totals
            .keys()
            .iter()
            .map(|key| assignment.label_of(&key.geoid()))
            .collect();
        let values: Vec<Option<f64>> = totals
            .column(target)
            .ok()?
            .iter()
            .zip(&labels)
            .map(|(v, l)| l.and(*v))
            .collect();
        let groups: Vec<Vec<f64>> = grouped_values(&labels, &values)
            .into_iter()
            .filter(|(label, _)| label.is_some())
            .map(|(_, values)| values)
            .collect();
        optional("cluster ANOVA", one_way_anova(&groups))
    });

    let (temporal, regression) = match (config.years.first(), config.years.last()) {
        (Some(&start), Some(&end)) if start < end && totals.has_column(POPULATION_COLUMN) => {
            let temporal = optional(
                "temporal change correlation",
                temporal_change_correlation(&totals, POPULATION_COLUMN, target, start, end),
            );
            let regression = temporal.as_ref().and_then(|t| {
                optional(
                    "change regression",
                    linear_regression(&t.population_changes(), &t.target_changes()),
                )
            });
            (temporal, regression)
        }
        _ => (None, None),
    };

    let age_groups = match (config.years.first(), config.years.last()) {
        (Some(&start), Some(&end)) if table.has_age_groups() && table.has_column(POPULATION_COLUMN) => {
            optional(
                "age group correlations",
                age_group_correlations(table, target, start, end),
            )
            .unwrap_or_default()
        }
        _ => Vec::new(),
    };

    Ok(StatisticsReport {
        target: target.to_string(),
        correlations,
        at_risk_tests,
        cluster_anova,
        temporal,
        regression,
        age_groups,
    })
}

/// Load population, establishment and area tables and merge them by county and year.
///
/// Adds the demographic percentage columns and the `/Area` rate of every
/// establishment column.
pub fn load_analysis_table(config: &AnalysisConfig) -> anyhow::Result<CountyTable> {
    let paths = &config.paths;

    let mut population = load::load_population(&paths.population)?;
    add_demographic_percentages(&mut population)?;
    add_gender_percentages(&mut population)?;

    let grocery = load::load_grocery(&paths.grocery_directory, &config.years)?;
    let is_dbf = paths
        .county_area
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("dbf"));
    let area = if is_dbf {
        shapes::load_county_area(&paths.county_area)?
    } else {
        load::read_county_table(&paths.county_area, &["ALAND"])?
    };

    let mut grocery = join_columns(&grocery, &area, &["ALAND"])?;
    let economic: Vec<String> = grocery
        .column_names()
        .iter()
        .filter(|name| name.as_str() != "ALAND")
        .cloned()
        .collect();
    let economic: Vec<&str> = economic.iter().map(String::as_str).collect();
    per_area(&mut grocery, &economic, "ALAND")?;

    let grocery_columns: Vec<String> = grocery.column_names().to_vec();
    let grocery_columns: Vec<&str> = grocery_columns.iter().map(String::as_str).collect();
    let table = join_columns(&population, &grocery, &grocery_columns)?;

    log::info!(
        "Analysis table has {} rows and {} columns",
        table.len(),
        table.column_names().len()
    );
    Ok(table)
}

/// Summary of a full run, as written to `summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub counties_clustered: usize,
    pub clusters: usize,
    pub adjacent_pairs: usize,
    pub weighted_edges: usize,
    pub dropped_edges: usize,
    pub top_pagerank: Option<String>,
}

/// Run every stage from the configured inputs and write results and charts.
pub fn run(config: &AnalysisConfig) -> anyhow::Result<RunSummary> {
    if let Err(e) = config.runtime.init_thread_pool() {
        log::warn!("Keeping the existing thread pool: {:#}", e);
    }

    log::info!("Starting county analysis");
    let table = load_analysis_table(config)?;

    let mut columns: Vec<&str> = config.demographic_features.iter().map(String::as_str).collect();
    columns.extend(config.target_metrics.iter().map(String::as_str));

    let features = pivot_features(&table, &columns)?;
    let clustering = run_clustering(&features, &table.total_rows()?, &columns, &config.clustering)
        .context("Clustering stage failed")?;

    let polygons = shapes::load_county_polygons(&config.paths.county_shapefile)?;
    let network = run_network(&polygons, &table.total_rows()?, &config.network).context("Network stage failed")?;

    let demographics: Vec<&str> = config.demographic_features.iter().map(String::as_str).collect();
    let statistics = config
        .target_metrics
        .iter()
        .map(|target| run_statistics(&table, target, &demographics, config, Some(&clustering.assignment)))
        .collect::<Result<Vec<_>>>()
        .context("Statistics stage failed")?;

    let results_dir: &Path = &config.paths.results;
    storage::save_clustering_results(&clustering, results_dir)?;
    storage::save_network_results(&network, results_dir)?;
    storage::save_statistics_results(&statistics, results_dir)?;
    viz::generate_visualizations(&clustering, &network, &statistics, &config.plot, &config.paths.visualizations)?;

    let summary = RunSummary {
        counties_clustered: clustering.assignment.len(),
        clusters: clustering.characterization.clusters.len(),
        adjacent_pairs: network.adjacency.pairs.len() / 2,
        weighted_edges: network.network.len(),
        dropped_edges: network.network.dropped,
        top_pagerank: network.pagerank.top.map(|t| t.county.geoid()),
    };
    storage::save_run_summary(&summary, results_dir)?;

    log::info!("Analysis complete. Results saved to {}", results_dir.display());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CountyKey;

    fn table() -> CountyTable {
        let keys: Vec<CountyKey> = (1..=6).map(|c| CountyKey::new(1, c)).collect();
        CountyTable::new(keys)
            .with_column("density", vec![Some(0.0005), Some(0.0002), Some(0.0008), Some(0.01), Some(0.02), Some(0.03)])
            .unwrap()
            .with_column("share", vec![Some(10.0), Some(12.0), Some(11.0), Some(40.0), Some(42.0), Some(39.0)])
            .unwrap()
    }

    #[test]
    fn test_run_clustering_caps_k_range() {
        let keys: Vec<CountyKey> = (1..=6).map(|c| CountyKey::new(1, c)).collect();
        let features = FeatureMatrix::from_rows(
            keys,
            vec!["a".into(), "b".into()],
            vec![
                vec![0.0, 0.1],
                vec![0.2, 0.0],
                vec![0.1, 0.2],
                vec![10.0, 10.1],
                vec![10.2, 9.9],
                vec![9.9, 10.0],
            ],
        )
        .unwrap();

        let config = ClusteringConfig {
            n_clusters: 2,
            ..ClusteringConfig::default()
        };
        let report = run_clustering(&features, &table(), &["share"], &config).unwrap();
        assert_eq!(report.evaluation.k_values, vec![2, 3, 4, 5]);
        assert_eq!(report.characterization.clusters.len(), 2);
        assert_eq!(report.characterization.unmatched, 0);
        assert_eq!(report.top_pairs.len(), 30);
    }

    #[test]
    fn test_statistics_split_by_risk_and_cluster() {
        let assignment = ClusterAssignment::new(
            (1..=6).map(|c| CountyKey::new(1, c).geoid()).collect(),
            vec![0, 0, 0, 1, 1, 1],
            2,
        )
        .unwrap();
        let config = AnalysisConfig::default();

        let report = run_statistics(&table(), "density", &["share"], &config, Some(&assignment)).unwrap();
        assert_eq!(report.correlations.len(), 1);
        assert!(report.correlations[0].correlation > 0.8);
        assert_eq!(report.at_risk_tests.len(), 1);
        assert_eq!(report.at_risk_tests[0].test.first_n, 3);
        assert_eq!(report.cluster_anova.as_ref().unwrap().n_groups, 2);
        // No population column, no years: change analysis is skipped
        assert!(report.temporal.is_none());
        assert!(report.age_groups.is_empty());
    }
}
