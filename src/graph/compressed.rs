//! Compressed undirected county graph

use serde::{Deserialize, Serialize};

use crate::types::CountyKey;

/// Compressed sparse row form of the undirected county adjacency graph.
///
/// Every undirected edge is stored once in each endpoint's neighbor list.
/// Nodes are indexed in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountyGraph {
    /// Number of counties in the graph
    pub node_count: usize,

    /// offsets[i] to offsets[i+1] is the neighbor range of node i
    pub offsets: Vec<u32>,

    /// Concatenated, sorted neighbor lists
    pub neighbors: Vec<u32>,

    /// County key of every node, by node index
    pub keys: Vec<CountyKey>,
}

impl CountyGraph {
    /// Neighbor indices of a node, ascending
    pub fn neighbors(&self, node: usize) -> &[u32] {
        let start = self.offsets[node] as usize;
        let end = self.offsets[node + 1] as usize;
        &self.neighbors[start..end]
    }

    /// Check if two nodes share an edge
    pub fn has_edge(&self, a: usize, b: u32) -> bool {
        self.neighbors(a).binary_search(&b).is_ok()
    }

    pub fn degree(&self, node: usize) -> usize {
        (self.offsets[node + 1] - self.offsets[node]) as usize
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        self.neighbors.len() / 2
    }

    pub fn key(&self, node: usize) -> CountyKey {
        self.keys[node]
    }

    pub fn index_of(&self, key: &CountyKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Undirected edges as `(low, high)` node index pairs
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.node_count).flat_map(move |a| {
            self.neighbors(a)
                .iter()
                .map(|&b| b as usize)
                .filter(move |&b| a < b)
                .map(move |b| (a, b))
        })
    }
}
