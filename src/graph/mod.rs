//! County adjacency network and centrality

pub mod adjacency;
pub mod builder;
pub mod centrality;
pub mod compressed;
pub mod weighting;

pub use adjacency::{
    AdjacencyGraphBuilder, AdjacencyPair, BruteForceIndex, CountyAdjacency, CountyPolygon, NeighborIndex,
    RTreeIndex,
};
pub use builder::GraphBuilder;
pub use centrality::{degree_centrality, pagerank, CentralityScore, DegreeScore, PageRankResult};
pub use compressed::CountyGraph;
pub use weighting::{weight_network, WeightedEdge, WeightedNetwork};
