//! Analysis of US county food access: demographic similarity, K-Means
//! clustering, county adjacency networks and their centrality.

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod similarity;
pub mod stats;
pub mod storage;
pub mod types;
pub mod viz;

pub use error::{AnalysisError, Result};
pub use types::CountyKey;
