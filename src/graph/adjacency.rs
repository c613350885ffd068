//! County adjacency from polygon geometry.
//!
//! Two counties are adjacent when their geometries satisfy the DE-9IM
//! touches predicate: boundaries meet, interiors do not overlap. Candidate
//! pairs come from a [`NeighborIndex`]; the exact predicate is always applied
//! afterwards, so every index yields the same relation.

use std::collections::HashSet;

use geo::{BoundingRect, MultiPolygon, Rect, Relate};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::graph::{CountyGraph, GraphBuilder};
use crate::types::CountyKey;

/// A county boundary tagged with its key
#[derive(Debug, Clone)]
pub struct CountyPolygon {
    pub key: CountyKey,
    pub geometry: MultiPolygon<f64>,
}

impl CountyPolygon {
    pub fn new(key: CountyKey, geometry: MultiPolygon<f64>) -> Self {
        Self { key, geometry }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }

    /// True when the two boundaries touch without interior overlap
    pub fn touches(&self, other: &CountyPolygon) -> bool {
        self.geometry.relate(&other.geometry).is_touches()
    }
}

/// Candidate search: indices of polygons that may touch polygon `i`.
///
/// Implementations may return extra candidates but must never omit a
/// polygon that actually touches `i`.
pub trait NeighborIndex: Sync {
    fn neighbors_of(&self, i: usize) -> Vec<usize>;
}

/// Every other polygon is a candidate
#[derive(Debug, Clone)]
pub struct BruteForceIndex {
    len: usize,
}

impl BruteForceIndex {
    pub fn new(polygons: &[CountyPolygon]) -> Self {
        Self {
            len: polygons.len(),
        }
    }
}

impl NeighborIndex for BruteForceIndex {
    fn neighbors_of(&self, i: usize) -> Vec<usize> {
        (0..self.len).filter(|&j| j != i).collect()
    }
}

#[derive(Debug, Clone)]
struct BoundingBox {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for BoundingBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// R-tree over polygon bounding boxes; candidates are the boxes that
/// intersect (or share an edge with) the query polygon's box
#[derive(Debug, Clone)]
pub struct RTreeIndex {
    rtree: RTree<BoundingBox>,
    bounds: Vec<Option<Rect<f64>>>,
}

impl RTreeIndex {
    pub fn new(polygons: &[CountyPolygon]) -> Self {
        let bounds: Vec<Option<Rect<f64>>> = polygons.iter().map(|p| p.bounding_rect()).collect();
        let boxes = bounds
            .iter()
            .enumerate()
            .filter_map(|(idx, bbox)| bbox.map(|bbox| BoundingBox { idx, bbox }))
            .collect();

        Self {
            rtree: RTree::bulk_load(boxes),
            bounds,
        }
    }
}

impl NeighborIndex for RTreeIndex {
    fn neighbors_of(&self, i: usize) -> Vec<usize> {
        let Some(rect) = self.bounds[i] else {
            return Vec::new();
        };
        let search = AABB::from_corners(rect.min().into(), rect.max().into());

        let mut candidates: Vec<usize> = self
            .rtree
            .locate_in_envelope_intersecting(&search)
            .map(|b| b.idx)
            .filter(|&j| j != i)
            .collect();
        candidates.sort_unstable();
        candidates
    }
}

/// Directed adjacency row; the list carries both orientations of every pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdjacencyPair {
    pub county: CountyKey,
    pub neighbor: CountyKey,
}

/// Sorted adjacency list plus the undirected graph over every input county
#[derive(Debug, Clone)]
pub struct CountyAdjacency {
    pub pairs: Vec<AdjacencyPair>,
    pub graph: CountyGraph,
}

impl CountyAdjacency {
    /// Counties touching `key`, ascending
    pub fn neighbors_of(&self, key: &CountyKey) -> Vec<CountyKey> {
        let start = self.pairs.partition_point(|p| p.county < *key);
        self.pairs[start..]
            .iter()
            .take_while(|p| p.county == *key)
            .map(|p| p.neighbor)
            .collect()
    }
}

/// Builds county adjacency from polygons
#[derive(Debug, Clone, Copy)]
pub struct AdjacencyGraphBuilder {
    use_spatial_index: bool,
}

impl Default for AdjacencyGraphBuilder {
    fn default() -> Self {
        Self {
            use_spatial_index: true,
        }
    }
}

impl AdjacencyGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose between the R-tree index and brute-force candidate search
    pub fn with_spatial_index(mut self, enabled: bool) -> Self {
        self.use_spatial_index = enabled;
        self
    }

    pub fn build(&self, polygons: &[CountyPolygon]) -> Result<CountyAdjacency> {
        if self.use_spatial_index {
            self.build_with_index(polygons, &RTreeIndex::new(polygons))
        } else {
            self.build_with_index(polygons, &BruteForceIndex::new(polygons))
        }
    }

    /// Test every candidate pair from `index` with the touches predicate.
    pub fn build_with_index<I: NeighborIndex>(
        &self,
        polygons: &[CountyPolygon],
        index: &I,
    ) -> Result<CountyAdjacency> {
        if polygons.is_empty() {
            return Err(AnalysisError::invalid_input("no county polygons"));
        }
        let mut seen = HashSet::with_capacity(polygons.len());
        if let Some(dup) = polygons.iter().find(|p| !seen.insert(p.key)) {
            return Err(AnalysisError::invalid_input(format!(
                "county {} appears in more than one polygon",
                dup.key
            )));
        }

        log::info!("Computing touches adjacency for {} counties", polygons.len());

        // Each unordered pair is tested once, from its lower index
        let touching: Vec<(usize, usize)> = (0..polygons.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                index
                    .neighbors_of(i)
                    .into_iter()
                    .filter(move |&j| j > i)
                    .filter(move |&j| polygons[i].touches(&polygons[j]))
                    .map(move |j| (i, j))
            })
            .collect();

        let mut pairs: Vec<AdjacencyPair> = touching
            .iter()
            .flat_map(|&(i, j)| {
                let (a, b) = (polygons[i].key, polygons[j].key);
                [
                    AdjacencyPair { county: a, neighbor: b },
                    AdjacencyPair { county: b, neighbor: a },
                ]
            })
            .collect();
        pairs.sort_unstable();
        pairs.dedup();

        let mut keys: Vec<CountyKey> = polygons.iter().map(|p| p.key).collect();
        keys.sort_unstable();

        let mut builder = GraphBuilder::with_capacity(keys.len());
        for &key in &keys {
            builder.get_or_create_node(key);
        }
        for pair in pairs.iter().filter(|p| p.county < p.neighbor) {
            builder.add_edge(pair.county, pair.neighbor);
        }
        let graph = builder.build()?;

        log::info!(
            "Found {} adjacent county pairs; {} counties have no neighbor",
            pairs.len() / 2,
            (0..graph.node_count).filter(|&n| graph.degree(n) == 0).count()
        );

        Ok(CountyAdjacency { pairs, graph })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn square(key: CountyKey, x: f64, y: f64) -> CountyPolygon {
        let poly = polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
            (x: x, y: y),
        ];
        CountyPolygon::new(key, MultiPolygon(vec![poly]))
    }

    fn grid() -> Vec<CountyPolygon> {
        vec![
            square(CountyKey::new(1, 3), 1.0, 0.0),
            square(CountyKey::new(1, 1), 0.0, 0.0),
            square(CountyKey::new(1, 5), 0.0, 1.0),
            square(CountyKey::new(2, 1), 5.0, 5.0),
        ]
    }

    #[test]
    fn test_touching_squares_are_adjacent_both_ways() {
        let adjacency = AdjacencyGraphBuilder::new().build(&grid()).unwrap();
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);

        assert!(adjacency.pairs.contains(&AdjacencyPair { county: a, neighbor: b }));
        assert!(adjacency.pairs.contains(&AdjacencyPair { county: b, neighbor: a }));
        // Corner contact also touches
        assert_eq!(adjacency.neighbors_of(&b), vec![a, c]);
        assert!(adjacency.pairs.windows(2).all(|w| w[0] < w[1]));
        assert!(adjacency.pairs.iter().all(|p| p.county != p.neighbor));
    }

    #[test]
    fn test_isolated_county_is_a_node_with_degree_zero() {
        let adjacency = AdjacencyGraphBuilder::new().build(&grid()).unwrap();
        let graph = &adjacency.graph;
        assert_eq!(graph.node_count, 4);
        let isolated = graph.index_of(&CountyKey::new(2, 1)).unwrap();
        assert_eq!(graph.degree(isolated), 0);
        // Nodes are inserted in key order
        assert!(graph.keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_index_strategies_agree() {
        let polygons = grid();
        let builder = AdjacencyGraphBuilder::new();
        let brute = builder
            .build_with_index(&polygons, &BruteForceIndex::new(&polygons))
            .unwrap();
        let rtree = builder
            .build_with_index(&polygons, &RTreeIndex::new(&polygons))
            .unwrap();
        assert_eq!(brute.pairs, rtree.pairs);
        assert_eq!(brute.graph, rtree.graph);
    }

    #[test]
    fn test_overlapping_polygons_do_not_touch() {
        let polygons = vec![
            square(CountyKey::new(1, 1), 0.0, 0.0),
            square(CountyKey::new(1, 3), 0.5, 0.0),
        ];
        let adjacency = AdjacencyGraphBuilder::new().build(&polygons).unwrap();
        assert!(adjacency.pairs.is_empty());
        assert_eq!(adjacency.graph.edge_count(), 0);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let polygons = vec![
            square(CountyKey::new(1, 1), 0.0, 0.0),
            square(CountyKey::new(1, 1), 1.0, 0.0),
        ];
        assert!(matches!(
            AdjacencyGraphBuilder::new().build(&polygons),
            Err(AnalysisError::InvalidInput(_))
        ));
    }
}
