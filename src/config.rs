//! Configuration management for the county analysis

use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for an analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Input and output locations
    pub paths: DataPaths,

    /// Years covered by the feature matrix
    pub years: Vec<i32>,

    /// K-Means and similarity parameters
    pub clustering: ClusteringConfig,

    /// Spatial network parameters
    pub network: NetworkConfig,

    /// Establishment density below which a county is flagged as at risk
    pub at_risk_threshold: f64,

    /// Area-normalized economic metrics of interest
    pub target_metrics: Vec<String>,

    /// Demographic columns used to characterize clusters
    pub demographic_features: Vec<String>,

    /// Logging and thread pool settings
    pub runtime: RuntimeConfig,

    /// Chart styling
    pub plot: PlotStyle,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            paths: DataPaths::default(),
            years: vec![2019, 2020, 2021, 2022],
            clustering: ClusteringConfig::default(),
            network: NetworkConfig::default(),
            at_risk_threshold: 0.001,
            target_metrics: vec![
                "ESTAB_All_establishments/Area".to_string(),
                "EMP/Area".to_string(),
                "PAYANN/Area".to_string(),
            ],
            demographic_features: [
                "White_Alone_PERCENT",
                "Black_Alone_PERCENT",
                "Native_India_Alone_PERCENT",
                "Asian_Alone_PERCENT",
                "Native_Hawaiian_Alone_PERCENT",
                "Hispanic_Alone_PERCENT",
                "MALE_PERCENT",
                "FEMALE_PERCENT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            runtime: RuntimeConfig::default(),
            plot: PlotStyle::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

/// Locations of the input tables and output directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub population: PathBuf,
    pub grocery_directory: PathBuf,
    pub county_area: PathBuf,
    pub county_shapefile: PathBuf,
    pub results: PathBuf,
    pub visualizations: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            population: "data/cc-est2023-alldata.csv".into(),
            grocery_directory: "data/merged Data".into(),
            county_area: "data/tl_2021_us_county.dbf".into(),
            county_shapefile: "data/tl_2018_us_county.shp".into(),
            results: "results".into(),
            visualizations: "visualizations".into(),
        }
    }
}

/// Parameters for similarity extraction and K-Means
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Number of clusters for the final assignment
    pub n_clusters: usize,

    /// Seed threaded through every K-Means fit
    pub seed: u64,

    /// Candidate cluster counts for evaluation (end exclusive)
    pub k_range: Range<usize>,

    /// Lloyd iterations per initialization
    pub max_iter: usize,

    /// Relative convergence tolerance (scaled by the mean feature variance)
    pub tol: f64,

    /// Number of k-means++ initializations; the lowest inertia wins
    pub n_init: usize,

    /// Number of most-similar pairs to report
    pub top_pairs: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            seed: 42,
            k_range: 2..10,
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
            top_pairs: 100,
        }
    }
}

/// Parameters for the weighted adjacency network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Metric column used as edge weight
    pub metric: String,

    /// Year the metric is taken from
    pub year: i32,

    /// Use the R-tree candidate index instead of testing every pair
    pub use_spatial_index: bool,

    pub pagerank: PageRankConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            metric: "ESTAB_All_establishments/Area".to_string(),
            year: 2022,
            use_spatial_index: true,
            pagerank: PageRankConfig::default(),
        }
    }
}

/// `PageRank` configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRankConfig {
    /// Damping factor (probability of following a link vs teleporting).
    pub damping_factor: f64,
    /// Maximum iterations before giving up.
    pub max_iterations: usize,
    /// Per-node convergence tolerance.
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping_factor: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Logging and worker thread settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = use all available cores)
    pub threads: usize,

    /// Verbose logging
    pub verbose: bool,
}

impl RuntimeConfig {
    /// Configure the global rayon pool. Only the first call in a process takes effect.
    pub fn init_thread_pool(&self) -> Result<usize> {
        let num_threads = if self.threads > 0 {
            self.threads
        } else {
            num_cpus::get()
        };

        log::info!("Using {} worker threads", num_threads);
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .context("Failed to configure the global thread pool")?;

        Ok(num_threads)
    }
}

/// Configure `env_logger`. Safe to call more than once.
pub fn init_logging(verbose: bool) {
    let log_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .try_init();
}

/// Styling for every chart the crate renders.
///
/// Passed explicitly to each rendering call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotStyle {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Nominal resolution recorded in the SVG metadata
    pub dpi: u32,
    pub title_font_size: u32,
    pub label_font_size: u32,
    /// Colors cycled across series and bars
    pub palette: Vec<String>,
    pub background: String,
    /// Grid line opacity in [0, 1]
    pub grid_alpha: f64,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
            dpi: 300,
            title_font_size: 14,
            label_font_size: 12,
            palette: vec![
                "steelblue".to_string(),
                "darkorange".to_string(),
                "lightgreen".to_string(),
                "skyblue".to_string(),
            ],
            background: "#eaeaf2".to_string(),
            grid_alpha: 0.3,
        }
    }
}

impl PlotStyle {
    /// Color for the `i`-th series, cycling through the palette.
    pub fn color(&self, i: usize) -> &str {
        if self.palette.is_empty() {
            "black"
        } else {
            &self.palette[i % self.palette.len()]
        }
    }
}
