//! PageRank and degree centrality.
//!
//! PageRank runs on a directed `petgraph` graph built from a weighted network:
//!
//! ```text
//! county -> neighbor   weight = neighbor value
//! county -> county     weight = county value (once per county)
//! ```
//!
//! Each node spreads its score over its out-edges in proportion to their
//! weight. Nodes whose out-weight is zero are dangling; their mass is spread
//! uniformly over every node.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::config::PageRankConfig;
use crate::error::{AnalysisError, Result};
use crate::graph::{CountyGraph, WeightedNetwork};
use crate::types::CountyKey;

/// Centrality of one county
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentralityScore {
    pub county: CountyKey,
    pub score: f64,
}

/// PageRank scores, highest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankResult {
    pub scores: Vec<CentralityScore>,
    pub top: Option<CentralityScore>,
    pub iterations: usize,
}

/// Neighbor count of one county in the undirected graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegreeScore {
    pub county: CountyKey,
    pub degree: usize,
    /// degree / (n - 1), 0 for a single-node graph
    pub normalized: f64,
}

/// Directed weighted graph for PageRank.
///
/// Nodes are added in the order counties first appear in the edge list. The
/// self-loop of a county takes its value from the first row it sources.
pub fn build_directed_graph(network: &WeightedNetwork) -> Result<DiGraph<CountyKey, f64>> {
    let mut graph = DiGraph::with_capacity(0, network.edges.len());
    let mut nodes: HashMap<CountyKey, NodeIndex> = HashMap::new();

    for edge in &network.edges {
        for weight in [edge.county_value, edge.neighbor_value] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(AnalysisError::invalid_input(format!(
                    "edge {} -> {} has weight {}; PageRank needs finite non-negative weights",
                    edge.county, edge.neighbor, weight
                )));
            }
        }

        let source = *nodes
            .entry(edge.county)
            .or_insert_with(|| graph.add_node(edge.county));
        if graph.find_edge(source, source).is_none() {
            graph.add_edge(source, source, edge.county_value);
        }

        let target = *nodes
            .entry(edge.neighbor)
            .or_insert_with(|| graph.add_node(edge.neighbor));
        if source != target {
            graph.update_edge(source, target, edge.neighbor_value);
        }
    }

    Ok(graph)
}

/// Weighted PageRank by power iteration.
///
/// Converges when the L1 change between iterations drops below
/// `n * tolerance`; otherwise fails after `max_iterations`.
pub fn pagerank(network: &WeightedNetwork, config: &PageRankConfig) -> Result<PageRankResult> {
    let graph = build_directed_graph(network)?;
    let n = graph.node_count();
    if n == 0 {
        log::warn!("PageRank over an empty network");
        return Ok(PageRankResult {
            scores: Vec::new(),
            top: None,
            iterations: 0,
        });
    }

    let n_f64 = n as f64;
    let d = config.damping_factor;
    let teleport = (1.0 - d) / n_f64;

    let out_weights: Vec<f64> = graph
        .node_indices()
        .map(|idx| graph.edges(idx).map(|e| *e.weight()).sum())
        .collect();

    let mut scores = vec![1.0 / n_f64; n];
    let mut next = vec![0.0; n];
    let mut converged_at = None;

    for iteration in 1..=config.max_iterations {
        let dangling_sum: f64 = out_weights
            .iter()
            .zip(&scores)
            .filter(|(&w, _)| w == 0.0)
            .map(|(_, &s)| s)
            .sum();
        next.fill(teleport + d * dangling_sum / n_f64);

        for u in graph.node_indices() {
            let total = out_weights[u.index()];
            if total == 0.0 {
                continue;
            }
            let mass = d * scores[u.index()] / total;
            for edge in graph.edges(u) {
                next[edge.target().index()] += mass * edge.weight();
            }
        }

        let err: f64 = scores.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut scores, &mut next);

        if err < n_f64 * config.tolerance {
            converged_at = Some(iteration);
            break;
        }
    }

    let iterations = converged_at.ok_or(AnalysisError::ConvergenceFailure {
        iterations: config.max_iterations,
    })?;
    log::debug!("PageRank converged after {} iterations over {} nodes", iterations, n);

    let mut ranked: Vec<CentralityScore> = graph
        .node_indices()
        .map(|idx| CentralityScore {
            county: graph[idx],
            score: scores[idx.index()],
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    Ok(PageRankResult {
        top: ranked.first().copied(),
        scores: ranked,
        iterations,
    })
}

/// Degree of every county, highest first; ties keep node order.
pub fn degree_centrality(graph: &CountyGraph) -> Vec<DegreeScore> {
    let denom = graph.node_count.saturating_sub(1) as f64;
    let mut scores: Vec<DegreeScore> = (0..graph.node_count)
        .map(|node| {
            let degree = graph.degree(node);
            DegreeScore {
                county: graph.key(node),
                degree,
                normalized: if denom > 0.0 { degree as f64 / denom } else { 0.0 },
            }
        })
        .collect();
    scores.sort_by(|a, b| b.degree.cmp(&a.degree));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, WeightedEdge};

    fn edge(a: CountyKey, b: CountyKey, va: f64, vb: f64) -> WeightedEdge {
        WeightedEdge {
            year: 2022,
            county: a,
            neighbor: b,
            county_value: va,
            neighbor_value: vb,
        }
    }

    fn network(edges: Vec<WeightedEdge>) -> WeightedNetwork {
        WeightedNetwork {
            metric: "m".to_string(),
            year: 2022,
            edges,
            dropped: 0,
        }
    }

    #[test]
    fn test_self_loop_first_occurrence_wins() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);
        let graph = build_directed_graph(&network(vec![
            edge(a, b, 2.0, 3.0),
            edge(a, c, 9.0, 4.0),
        ]))
        .unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        let a_idx = NodeIndex::new(0);
        let self_loop = graph.find_edge(a_idx, a_idx).unwrap();
        assert_eq!(graph[self_loop], 2.0);
    }

    #[test]
    fn test_scores_sum_to_one_and_sorted() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);
        let result = pagerank(
            &network(vec![
                edge(a, b, 1.0, 5.0),
                edge(b, a, 5.0, 1.0),
                edge(b, c, 5.0, 2.0),
                edge(c, b, 2.0, 5.0),
            ]),
            &PageRankConfig::default(),
        )
        .unwrap();

        let total: f64 = result.scores.iter().map(|s| s.score).sum();
        assert!((total - 1.0).abs() < 1e-6, "total = {total}");
        assert!(result.scores.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(result.top.unwrap().county, b);
    }

    #[test]
    fn test_dangling_mass_is_redistributed() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        // b is only reached, never a source; a's self-loop weight is zero
        let result = pagerank(&network(vec![edge(a, b, 0.0, 1.0)]), &PageRankConfig::default()).unwrap();
        let total: f64 = result.scores.iter().map(|s| s.score).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(result.top.unwrap().county, b);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let err = pagerank(&network(vec![edge(a, b, 1.0, -1.0)]), &PageRankConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn test_non_convergence_reported() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let config = PageRankConfig {
            damping_factor: 0.85,
            max_iterations: 1,
            tolerance: 1e-15,
        };
        let err = pagerank(&network(vec![edge(a, b, 1.0, 3.0)]), &config).unwrap_err();
        assert_eq!(err, AnalysisError::ConvergenceFailure { iterations: 1 });
    }

    #[test]
    fn test_degree_ties_keep_node_order() {
        let keys: Vec<CountyKey> = (1..=4).map(|c| CountyKey::new(1, c)).collect();
        let mut builder = GraphBuilder::with_capacity(4);
        for &key in &keys {
            builder.get_or_create_node(key);
        }
        builder.add_edge(keys[0], keys[1]);
        builder.add_edge(keys[2], keys[3]);
        builder.add_edge(keys[1], keys[2]);
        let degrees = degree_centrality(&builder.build().unwrap());

        let order: Vec<(CountyKey, usize)> = degrees.iter().map(|d| (d.county, d.degree)).collect();
        assert_eq!(
            order,
            vec![(keys[1], 2), (keys[2], 2), (keys[0], 1), (keys[3], 1)]
        );
        assert!((degrees[0].normalized - 2.0 / 3.0).abs() < 1e-12);
    }
}
