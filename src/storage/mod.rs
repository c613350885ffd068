//! Results persistence module

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;
use serde_json::{json, to_string_pretty};

use crate::analysis::{ClusteringReport, NetworkReport, RunSummary, StatisticsReport};

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut file = create(path)?;
    file.write_all(to_string_pretty(value)?.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Quote a CSV field when it contains a delimiter, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Save similarity, cluster evaluation and cluster assignment results
pub fn save_clustering_results(report: &ClusteringReport, output_dir: &Path) -> Result<()> {
    log::info!("Saving clustering results to {}", output_dir.display());
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    save_clustering_summary(report, output_dir)?;
    save_similar_pairs(report, output_dir)?;
    save_cluster_evaluation(report, output_dir)?;
    save_cluster_assignment(report, output_dir)?;
    write_json(&output_dir.join("cluster_summary.json"), &report.characterization)?;

    Ok(())
}

fn save_clustering_summary(report: &ClusteringReport, output_dir: &Path) -> Result<()> {
    let characterization = &report.characterization;
    let sizes: Vec<usize> = characterization.clusters.iter().map(|c| c.size).collect();

    let summary = json!({
        "similarity": {
            "county_count": report.similarity.len(),
            "top_pair_count": report.top_pairs.len(),
            "best_similarity": report.top_pairs.first().map(|p| p.similarity),
        },
        "evaluation": {
            "k_values": report.evaluation.k_values,
            "inertia": report.evaluation.inertia,
            "silhouette": report.evaluation.silhouette,
        },
        "clusters": {
            "k": report.assignment.k(),
            "non_empty": characterization.clusters.len(),
            "sizes": sizes,
            "largest_cluster_size": sizes.iter().max().copied().unwrap_or(0),
            "smallest_cluster_size": sizes.iter().min().copied().unwrap_or(0),
            "unmatched_rows": characterization.unmatched,
        }
    });

    write_json(&output_dir.join("summary.json"), &summary)
}

fn save_similar_pairs(report: &ClusteringReport, output_dir: &Path) -> Result<()> {
    let mut file = create(&output_dir.join("similar_pairs.csv"))?;
    writeln!(file, "GEOID_1,GEOID_2,Similarity")?;
    for pair in &report.top_pairs {
        writeln!(file, "{},{},{}", pair.first, pair.second, pair.similarity)?;
    }
    file.flush()?;
    Ok(())
}

fn save_cluster_evaluation(report: &ClusteringReport, output_dir: &Path) -> Result<()> {
    let mut file = create(&output_dir.join("cluster_evaluation.csv"))?;
    writeln!(file, "k,inertia,silhouette")?;
    for (k, inertia, silhouette) in report.evaluation.rows() {
        writeln!(file, "{},{},{}", k, inertia, silhouette)?;
    }
    file.flush()?;
    Ok(())
}

fn save_cluster_assignment(report: &ClusteringReport, output_dir: &Path) -> Result<()> {
    let mut file = create(&output_dir.join("cluster_assignment.csv"))?;
    writeln!(file, "GEOID,Cluster")?;
    for (id, label) in report.assignment.iter() {
        writeln!(file, "{},{}", csv_field(id), label)?;
    }

    // Cluster means, one row per non-empty cluster
    let features = &report.characterization.features;
    let mut means = create(&output_dir.join("cluster_means.csv"))?;
    writeln!(
        means,
        "Cluster,Size,{}",
        features.iter().map(|f| csv_field(f)).join(",")
    )?;
    for cluster in &report.characterization.clusters {
        writeln!(
            means,
            "{},{},{}",
            cluster.id,
            cluster.size,
            cluster.means.iter().map(|m| optional_number(m.mean)).join(",")
        )?;
    }

    file.flush()?;
    means.flush()?;
    Ok(())
}

/// Save adjacency, weighted network and centrality results
pub fn save_network_results(report: &NetworkReport, output_dir: &Path) -> Result<()> {
    log::info!("Saving network results to {}", output_dir.display());
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut adjacency = create(&output_dir.join("adjacency.csv"))?;
    writeln!(adjacency, "County_STATE,COUNTY,Neighbor_STATE,Neighbor_COUNTY")?;
    for pair in &report.adjacency.pairs {
        writeln!(
            adjacency,
            "{},{},{},{}",
            pair.county.state, pair.county.county, pair.neighbor.state, pair.neighbor.county
        )?;
    }
    adjacency.flush()?;

    let metric = csv_field(&report.network.metric);
    let mut weighted = create(&output_dir.join("weighted_network.csv"))?;
    writeln!(
        weighted,
        "YEAR,County_STATE,COUNTY,{m}_County,Neighbor_STATE,Neighbor_COUNTY,{m}_Neighbor",
        m = metric
    )?;
    for edge in &report.network.edges {
        writeln!(
            weighted,
            "{},{},{},{},{},{},{}",
            edge.year,
            edge.county.state,
            edge.county.county,
            edge.county_value,
            edge.neighbor.state,
            edge.neighbor.county,
            edge.neighbor_value
        )?;
    }
    weighted.flush()?;

    let mut pagerank = create(&output_dir.join("pagerank.csv"))?;
    writeln!(pagerank, "County_STATE,COUNTY,PageRank")?;
    for score in &report.pagerank.scores {
        writeln!(pagerank, "{},{},{}", score.county.state, score.county.county, score.score)?;
    }
    pagerank.flush()?;

    let mut degree = create(&output_dir.join("degree.csv"))?;
    writeln!(degree, "STATE,COUNTY,Degree")?;
    for score in &report.degrees {
        writeln!(degree, "{},{},{}", score.county.state, score.county.county, score.degree)?;
    }
    degree.flush()?;

    let graph = &report.adjacency.graph;
    let avg_degree = if graph.node_count == 0 {
        0.0
    } else {
        2.0 * graph.edge_count() as f64 / graph.node_count as f64
    };
    let summary = json!({
        "node_count": graph.node_count,
        "edge_count": graph.edge_count(),
        "isolated_counties": report.degrees.iter().filter(|d| d.degree == 0).count(),
        "avg_degree": avg_degree,
        "metric": report.network.metric,
        "year": report.network.year,
        "weighted_edges": report.network.edges.len(),
        "dropped_edges": report.network.dropped,
        "pagerank_iterations": report.pagerank.iterations,
        "top_county": report.pagerank.top.map(|t| json!({
            "GEOID": t.county.geoid(),
            "PageRank": t.score,
        })),
    });
    write_json(&output_dir.join("network_summary.json"), &summary)?;

    Ok(())
}

/// Save one statistics report per target metric
pub fn save_statistics_results(reports: &[StatisticsReport], output_dir: &Path) -> Result<()> {
    log::info!("Saving {} statistics reports", reports.len());
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    write_json(&output_dir.join("statistics.json"), reports)
}

pub fn save_run_summary(summary: &RunSummary, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    write_json(&output_dir.join("run_summary.json"), summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("EMP/Area"), "EMP/Area");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_optional_number() {
        assert_eq!(optional_number(Some(1.5)), "1.5");
        assert_eq!(optional_number(None), "");
    }
}
