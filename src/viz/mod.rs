//! Chart and network export module
//!
//! Charts are written as standalone SVG documents styled by [`PlotStyle`].
//! The weighted county network is exported as GraphML for external tools.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::analysis::{ClusteringReport, NetworkReport, StatisticsReport};
use crate::config::PlotStyle;
use crate::graph::{CountyGraph, WeightedNetwork};
use crate::types::CountyKey;

const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 70.0;
const MARGIN_LEFT: f64 = 90.0;
const BAR_LABEL_WIDTH: f64 = 200.0;
const TICKS: usize = 5;
const TOP_PAGERANK: usize = 20;

/// Render every chart and export file into `output_dir`
pub fn generate_visualizations(
    clustering: &ClusteringReport,
    network: &NetworkReport,
    statistics: &[StatisticsReport],
    style: &PlotStyle,
    output_dir: &Path,
) -> Result<()> {
    log::info!("Generating visualizations in {}", output_dir.display());
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut charts = Vec::new();

    let evaluation = &clustering.evaluation;
    if evaluation.is_empty() {
        log::warn!("No cluster counts were evaluated, skipping elbow and silhouette charts");
    } else {
        let ks: Vec<f64> = evaluation.k_values.iter().map(|&k| k as f64).collect();
        write_svg(
            &output_dir.join("elbow.svg"),
            &line_chart_svg("Elbow Method", "Number of clusters", "Inertia", &ks, &evaluation.inertia, style)?,
        )?;
        write_svg(
            &output_dir.join("silhouette.svg"),
            &line_chart_svg(
                "Silhouette Analysis",
                "Number of clusters",
                "Silhouette score",
                &ks,
                &evaluation.silhouette,
                style,
            )?,
        )?;
        charts.push(("Elbow Method".to_string(), "elbow.svg".to_string()));
        charts.push(("Silhouette Analysis".to_string(), "silhouette.svg".to_string()));
    }

    for report in statistics {
        if report.correlations.is_empty() {
            continue;
        }
        let labels: Vec<String> = report.correlations.iter().map(|c| c.feature.clone()).collect();
        let values: Vec<f64> = report.correlations.iter().map(|c| c.correlation).collect();
        let title = format!("Correlation with {}", report.target);
        let file_name = format!("correlations_{}.svg", file_stem(&report.target));
        write_svg(&output_dir.join(&file_name), &bar_chart_svg(&title, &labels, &values, style)?)?;
        charts.push((title, file_name));
    }

    let histogram = degree_histogram(network);
    if !histogram.is_empty() {
        let labels: Vec<String> = histogram.keys().map(|d| d.to_string()).collect();
        let values: Vec<f64> = histogram.values().map(|&c| c as f64).collect();
        write_svg(
            &output_dir.join("degree_distribution.svg"),
            &bar_chart_svg("Counties by number of neighbors", &labels, &values, style)?,
        )?;
        charts.push(("Degree Distribution".to_string(), "degree_distribution.svg".to_string()));
    }

    if !network.pagerank.scores.is_empty() {
        let top = &network.pagerank.scores[..network.pagerank.scores.len().min(TOP_PAGERANK)];
        let labels: Vec<String> = top.iter().map(|s| s.county.geoid()).collect();
        let values: Vec<f64> = top.iter().map(|s| s.score).collect();
        let title = format!("Top counties by PageRank ({})", network.network.metric);
        write_svg(&output_dir.join("pagerank_top.svg"), &bar_chart_svg(&title, &labels, &values, style)?)?;
        charts.push((title, "pagerank_top.svg".to_string()));
    }

    write_graphml(
        &network.adjacency.graph,
        &network.network,
        &output_dir.join("weighted_network.graphml"),
    )?;
    write_nodes(clustering, network, &output_dir.join("nodes.csv"))?;
    write_index(clustering, network, &charts, &output_dir.join("index.html"))?;

    log::info!("Generated {} charts", charts.len());
    Ok(())
}

fn write_svg(path: &Path, svg: &str) -> Result<()> {
    fs::write(path, svg).with_context(|| format!("Failed to write {}", path.display()))
}

/// Lowercase alphanumeric file name fragment
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Value range padded so a flat series still gets a visible axis
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if hi - lo < f64::EPSILON {
        let pad = if lo.abs() > 0.0 { lo.abs() * 0.1 } else { 1.0 };
        return (lo - pad, hi + pad);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

fn format_tick(value: f64) -> String {
    if value.abs() >= 1e4 || (value != 0.0 && value.abs() < 1e-3) {
        format!("{:.2e}", value)
    } else {
        format!("{:.3}", value)
    }
}

fn svg_open(svg: &mut String, title: &str, style: &PlotStyle) -> Result<()> {
    let (w, h) = (style.width, style.height);
    writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" data-dpi=\"{}\">",
        style.dpi
    )?;
    writeln!(svg, "  <title>{}</title>", escape_xml(title))?;
    writeln!(svg, "  <rect width=\"100%\" height=\"100%\" fill=\"white\"/>")?;
    writeln!(
        svg,
        "  <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"{}\" font-weight=\"bold\">{}</text>",
        w as f64 / 2.0,
        MARGIN_TOP / 2.0,
        style.title_font_size,
        escape_xml(title)
    )?;
    Ok(())
}

/// Line chart with one marker per point, used for the elbow and silhouette plots
pub fn line_chart_svg(
    title: &str,
    x_label: &str,
    y_label: &str,
    xs: &[f64],
    ys: &[f64],
    style: &PlotStyle,
) -> Result<String> {
    anyhow::ensure!(
        xs.len() == ys.len(),
        "line chart has {} x values but {} y values",
        xs.len(),
        ys.len()
    );

    let width = style.width as f64;
    let height = style.height as f64;
    let plot_w = (width - MARGIN_LEFT - MARGIN_RIGHT).max(1.0);
    let plot_h = (height - MARGIN_TOP - MARGIN_BOTTOM).max(1.0);

    let (x_min, x_max) = padded_range(xs.iter().copied());
    let (y_min, y_max) = padded_range(ys.iter().copied());
    let px = |x: f64| MARGIN_LEFT + (x - x_min) / (x_max - x_min) * plot_w;
    let py = |y: f64| MARGIN_TOP + plot_h - (y - y_min) / (y_max - y_min) * plot_h;

    let mut svg = String::new();
    svg_open(&mut svg, title, style)?;
    writeln!(
        svg,
        "  <rect x=\"{MARGIN_LEFT}\" y=\"{MARGIN_TOP}\" width=\"{plot_w}\" height=\"{plot_h}\" fill=\"{}\"/>",
        escape_xml(&style.background)
    )?;

    for i in 0..=TICKS {
        let value = y_min + (y_max - y_min) * i as f64 / TICKS as f64;
        let y = py(value);
        writeln!(
            svg,
            "  <line x1=\"{MARGIN_LEFT}\" y1=\"{y:.2}\" x2=\"{:.2}\" y2=\"{y:.2}\" stroke=\"white\" stroke-opacity=\"{}\"/>",
            MARGIN_LEFT + plot_w,
            1.0 - style.grid_alpha
        )?;
        writeln!(
            svg,
            "  <text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"end\" font-family=\"sans-serif\" font-size=\"{}\">{}</text>",
            MARGIN_LEFT - 6.0,
            y + 4.0,
            style.label_font_size,
            format_tick(value)
        )?;
    }

    for &x in xs {
        writeln!(
            svg,
            "  <text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"{}\">{}</text>",
            px(x),
            MARGIN_TOP + plot_h + 18.0,
            style.label_font_size,
            x
        )?;
    }

    let points = xs
        .iter()
        .zip(ys)
        .filter(|(_, y)| y.is_finite())
        .map(|(&x, &y)| format!("{:.2},{:.2}", px(x), py(y)))
        .join(" ");
    writeln!(
        svg,
        "  <polyline points=\"{points}\" fill=\"none\" stroke=\"{}\" stroke-width=\"2\"/>",
        escape_xml(style.color(0))
    )?;
    for (&x, &y) in xs.iter().zip(ys).filter(|(_, y)| y.is_finite()) {
        writeln!(
            svg,
            "  <circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"4\" fill=\"{}\"/>",
            px(x),
            py(y),
            escape_xml(style.color(0))
        )?;
    }

    writeln!(
        svg,
        "  <text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"{}\">{}</text>",
        MARGIN_LEFT + plot_w / 2.0,
        height - 20.0,
        style.label_font_size,
        escape_xml(x_label)
    )?;
    writeln!(
        svg,
        "  <text transform=\"translate(20,{:.2}) rotate(-90)\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"{}\">{}</text>",
        MARGIN_TOP + plot_h / 2.0,
        style.label_font_size,
        escape_xml(y_label)
    )?;
    writeln!(svg, "</svg>")?;
    Ok(svg)
}

/// Horizontal bar chart; negative values extend left of the zero line
pub fn bar_chart_svg(title: &str, labels: &[String], values: &[f64], style: &PlotStyle) -> Result<String> {
    anyhow::ensure!(
        labels.len() == values.len(),
        "bar chart has {} labels but {} values",
        labels.len(),
        values.len()
    );

    let width = style.width as f64;
    let height = style.height as f64;
    let plot_w = (width - BAR_LABEL_WIDTH - MARGIN_RIGHT).max(1.0);
    let plot_h = (height - MARGIN_TOP - MARGIN_BOTTOM).max(1.0);

    let finite = values.iter().copied().filter(|v| v.is_finite());
    let lo = finite.clone().fold(0.0_f64, f64::min);
    let mut hi = finite.fold(0.0_f64, f64::max);
    if hi - lo < f64::EPSILON {
        hi = lo + 1.0;
    }
    let px = |v: f64| BAR_LABEL_WIDTH + (v - lo) / (hi - lo) * plot_w;
    let slot = plot_h / labels.len().max(1) as f64;

    let mut svg = String::new();
    svg_open(&mut svg, title, style)?;
    writeln!(
        svg,
        "  <rect x=\"{BAR_LABEL_WIDTH}\" y=\"{MARGIN_TOP}\" width=\"{plot_w}\" height=\"{plot_h}\" fill=\"{}\"/>",
        escape_xml(&style.background)
    )?;

    for i in 0..=TICKS {
        let value = lo + (hi - lo) * i as f64 / TICKS as f64;
        let x = px(value);
        writeln!(
            svg,
            "  <line x1=\"{x:.2}\" y1=\"{MARGIN_TOP}\" x2=\"{x:.2}\" y2=\"{:.2}\" stroke=\"white\" stroke-opacity=\"{}\"/>",
            MARGIN_TOP + plot_h,
            1.0 - style.grid_alpha
        )?;
        writeln!(
            svg,
            "  <text x=\"{x:.2}\" y=\"{:.2}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"{}\">{}</text>",
            MARGIN_TOP + plot_h + 18.0,
            style.label_font_size,
            format_tick(value)
        )?;
    }

    let zero = px(0.0);
    for (i, (label, &value)) in labels.iter().zip(values).enumerate() {
        let y = MARGIN_TOP + slot * i as f64;
        let v = if value.is_finite() { value } else { 0.0 };
        let (x, w) = if v >= 0.0 { (zero, px(v) - zero) } else { (px(v), zero - px(v)) };
        writeln!(
            svg,
            "  <rect class=\"bar\" x=\"{x:.2}\" y=\"{:.2}\" width=\"{w:.2}\" height=\"{:.2}\" fill=\"{}\"/>",
            y + slot * 0.1,
            slot * 0.8,
            escape_xml(style.color(i))
        )?;
        writeln!(
            svg,
            "  <text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"end\" font-family=\"sans-serif\" font-size=\"{}\">{}</text>",
            BAR_LABEL_WIDTH - 6.0,
            y + slot / 2.0 + 4.0,
            style.label_font_size,
            escape_xml(label)
        )?;
    }

    writeln!(
        svg,
        "  <line x1=\"{zero:.2}\" y1=\"{MARGIN_TOP}\" x2=\"{zero:.2}\" y2=\"{:.2}\" stroke=\"black\"/>",
        MARGIN_TOP + plot_h
    )?;
    writeln!(svg, "</svg>")?;
    Ok(svg)
}

/// Number of counties per neighbor count
fn degree_histogram(network: &NetworkReport) -> BTreeMap<usize, usize> {
    let mut histogram = BTreeMap::new();
    for score in &network.degrees {
        *histogram.entry(score.degree).or_insert(0) += 1;
    }
    histogram
}

/// Export the weighted county network as directed GraphML.
///
/// Every county in the adjacency graph becomes a node, so isolated counties
/// are kept. Edge weights are the neighbor's metric value.
pub fn write_graphml(graph: &CountyGraph, network: &WeightedNetwork, path: &Path) -> Result<()> {
    let mut values: HashMap<CountyKey, f64> = HashMap::new();
    for edge in &network.edges {
        values.entry(edge.county).or_insert(edge.county_value);
        values.entry(edge.neighbor).or_insert(edge.neighbor_value);
    }

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut file = BufWriter::new(file);

    writeln!(file, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
    writeln!(file, "<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">")?;
    writeln!(file, "  <key id=\"value\" for=\"node\" attr.name=\"{}\" attr.type=\"double\"/>", escape_xml(&network.metric))?;
    writeln!(file, "  <key id=\"weight\" for=\"edge\" attr.name=\"weight\" attr.type=\"double\"/>")?;
    writeln!(file, "  <graph id=\"{}\" edgedefault=\"directed\">", network.year)?;

    for key in &graph.keys {
        match values.get(key) {
            Some(value) => writeln!(
                file,
                "    <node id=\"{key}\">\n      <data key=\"value\">{value}</data>\n    </node>"
            )?,
            None => writeln!(file, "    <node id=\"{key}\"/>")?,
        }
    }

    for (edge_id, edge) in network.edges.iter().enumerate() {
        writeln!(
            file,
            "    <edge id=\"e{}\" source=\"{}\" target=\"{}\">\n      <data key=\"weight\">{}</data>\n    </edge>",
            edge_id, edge.county, edge.neighbor, edge.neighbor_value
        )?;
    }

    writeln!(file, "  </graph>")?;
    writeln!(file, "</graphml>")?;
    file.flush()?;
    Ok(())
}

/// Per-county node table joining degree, PageRank and cluster label
fn write_nodes(clustering: &ClusteringReport, network: &NetworkReport, path: &Path) -> Result<()> {
    let pagerank: HashMap<CountyKey, f64> = network
        .pagerank
        .scores
        .iter()
        .map(|s| (s.county, s.score))
        .collect();

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut file = BufWriter::new(file);
    writeln!(file, "GEOID,Degree,PageRank,Cluster")?;
    for score in &network.degrees {
        let geoid = score.county.geoid();
        let rank = pagerank.get(&score.county).map(|v| v.to_string()).unwrap_or_default();
        let cluster = clustering
            .assignment
            .label_of(&geoid)
            .map(|l| l.to_string())
            .unwrap_or_default();
        writeln!(file, "{},{},{},{}", geoid, score.degree, rank, cluster)?;
    }
    file.flush()?;
    Ok(())
}

fn write_index(
    clustering: &ClusteringReport,
    network: &NetworkReport,
    charts: &[(String, String)],
    path: &Path,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut file = BufWriter::new(file);

    writeln!(file, "<!DOCTYPE html>")?;
    writeln!(file, "<html lang=\"en\">")?;
    writeln!(file, "<head>")?;
    writeln!(file, "  <meta charset=\"UTF-8\">")?;
    writeln!(file, "  <title>County Food Access Analysis</title>")?;
    writeln!(file, "  <style>")?;
    writeln!(file, "    body {{ font-family: Arial, sans-serif; margin: 20px; }}")?;
    writeln!(file, "    h1, h2 {{ color: #333; }}")?;
    writeln!(file, "    .stats {{ margin-top: 20px; background-color: #f9f9f9; padding: 15px; border-radius: 5px; }}")?;
    writeln!(file, "    img {{ max-width: 100%; margin-bottom: 20px; }}")?;
    writeln!(file, "  </style>")?;
    writeln!(file, "</head>")?;
    writeln!(file, "<body>")?;
    writeln!(file, "  <h1>County Food Access Analysis</h1>")?;

    writeln!(file, "  <div class=\"stats\">")?;
    writeln!(file, "    <h2>Summary</h2>")?;
    writeln!(file, "    <p>Counties clustered: {}</p>", clustering.assignment.len())?;
    writeln!(file, "    <p>Clusters: {}</p>", clustering.characterization.clusters.len())?;
    writeln!(file, "    <p>Adjacent county pairs: {}</p>", network.adjacency.graph.edge_count())?;
    if let Some(top) = &network.pagerank.top {
        writeln!(file, "    <p>Highest PageRank: {} ({:.6})</p>", top.county, top.score)?;
    }
    writeln!(file, "  </div>")?;

    for (title, file_name) in charts {
        writeln!(file, "  <h2>{}</h2>", escape_xml(title))?;
        writeln!(file, "  <img src=\"{}\" alt=\"{}\">", escape_xml(file_name), escape_xml(title))?;
    }

    writeln!(file, "</body>")?;
    writeln!(file, "</html>")?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, WeightedEdge};

    #[test]
    fn test_line_chart_marks_every_point() {
        let style = PlotStyle::default();
        let svg = line_chart_svg("Elbow Method", "k", "Inertia", &[2.0, 3.0, 4.0], &[9.0, 5.0, 4.5], &style).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert!(svg.contains("width=\"1200\""));
        assert!(svg.contains("steelblue"));

        assert!(line_chart_svg("bad", "x", "y", &[1.0], &[], &style).is_err());
    }

    #[test]
    fn test_bar_chart_escapes_labels_and_handles_negatives() {
        let style = PlotStyle {
            width: 600,
            height: 300,
            ..PlotStyle::default()
        };
        let labels = vec!["Black & African".to_string(), "White".to_string()];
        let svg = bar_chart_svg("Correlation", &labels, &[-0.4, 0.7], &style).unwrap();
        assert_eq!(svg.matches("class=\"bar\"").count(), 2);
        assert!(svg.contains("Black &amp; African"));
        assert!(!svg.contains("width=\"-"));
    }

    #[test]
    fn test_flat_series_gets_a_range() {
        let (lo, hi) = padded_range([2.0, 2.0].into_iter());
        assert!(lo < 2.0 && hi > 2.0);
        assert_eq!(padded_range(std::iter::empty()), (0.0, 1.0));
    }

    #[test]
    fn test_graphml_keeps_isolated_counties() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);
        let mut builder = GraphBuilder::with_capacity(3);
        builder.get_or_create_node(c);
        builder.add_edge(a, b);
        let graph = builder.build().unwrap();

        let network = WeightedNetwork {
            metric: "EMP/Area".to_string(),
            year: 2020,
            edges: vec![
                WeightedEdge {
                    year: 2020,
                    county: a,
                    neighbor: b,
                    county_value: 1.0,
                    neighbor_value: 2.0,
                },
                WeightedEdge {
                    year: 2020,
                    county: b,
                    neighbor: a,
                    county_value: 2.0,
                    neighbor_value: 1.0,
                },
            ],
            dropped: 0,
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.graphml");
        write_graphml(&graph, &network, &path).unwrap();

        let xml = fs::read_to_string(&path).unwrap();
        assert_eq!(xml.matches("<node ").count(), 3);
        assert_eq!(xml.matches("<edge ").count(), 2);
        assert!(xml.contains("<node id=\"01005\"/>"));
        assert!(xml.contains("attr.name=\"EMP/Area\""));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("EMP/Area"), "emp_area");
    }
}
