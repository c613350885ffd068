//! Graph construction module

use std::collections::HashMap;

use crate::error::{AnalysisError, Result};
use crate::graph::CountyGraph;
use crate::types::CountyKey;

/// Builder for incrementally constructing a CountyGraph
#[derive(Debug, Default)]
pub struct GraphBuilder {
    /// Mapping from county keys to node indices
    key_to_index: HashMap<CountyKey, u32>,

    /// County key per node, in insertion order
    keys: Vec<CountyKey>,

    /// Neighbor lists for each node
    adjacency_lists: Vec<Vec<u32>>,
}

impl GraphBuilder {
    /// Create a new graph builder with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            key_to_index: HashMap::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            adjacency_lists: Vec::with_capacity(capacity),
        }
    }

    /// Get or create the node for a county
    pub fn get_or_create_node(&mut self, key: CountyKey) -> u32 {
        if let Some(&idx) = self.key_to_index.get(&key) {
            return idx;
        }

        let idx = self.keys.len() as u32;
        self.key_to_index.insert(key, idx);
        self.keys.push(key);
        self.adjacency_lists.push(Vec::new());
        idx
    }

    /// Add an undirected edge; self loops are ignored
    pub fn add_edge(&mut self, a: CountyKey, b: CountyKey) {
        let a_idx = self.get_or_create_node(a);
        let b_idx = self.get_or_create_node(b);
        if a_idx == b_idx {
            return;
        }

        self.adjacency_lists[a_idx as usize].push(b_idx);
        self.adjacency_lists[b_idx as usize].push(a_idx);
    }

    /// Build the compressed graph, collapsing repeated edges
    pub fn build(mut self) -> Result<CountyGraph> {
        let node_count = self.keys.len();
        if u32::try_from(node_count).is_err() {
            return Err(AnalysisError::invalid_input(format!(
                "{node_count} counties exceed the graph index range"
            )));
        }

        for list in &mut self.adjacency_lists {
            list.sort_unstable();
            list.dedup();
        }

        let edge_count: usize = self.adjacency_lists.iter().map(Vec::len).sum();

        let mut offsets = Vec::with_capacity(node_count + 1);
        offsets.push(0);
        let mut offset = 0;
        for list in &self.adjacency_lists {
            offset += list.len() as u32;
            offsets.push(offset);
        }

        let mut neighbors = Vec::with_capacity(edge_count);
        for list in &self.adjacency_lists {
            neighbors.extend_from_slice(list);
        }

        log::debug!(
            "Built county graph with {} nodes and {} edges",
            node_count,
            edge_count / 2
        );

        Ok(CountyGraph {
            node_count,
            offsets,
            neighbors,
            keys: self.keys,
        })
    }
}
