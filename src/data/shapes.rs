//! County polygons and area attributes from TIGER/Line shapefiles

use std::path::Path;

use anyhow::{bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{Reader, Shape};

use crate::data::CountyTable;
use crate::graph::adjacency::CountyPolygon;
use crate::types::CountyKey;

/// Get the value of a character field from a Record
fn get_character_field(record: &Record, field: &str) -> Result<String> {
    match record.get(field) {
        Some(FieldValue::Character(Some(s))) => Ok(s.trim().to_string()),
        _ => bail!("missing or invalid character field: {}", field),
    }
}

/// Get the value of a numeric field from a Record
fn get_numeric_field(record: &Record, field: &str) -> Result<f64> {
    match record.get(field) {
        Some(FieldValue::Numeric(Some(n))) => Ok(*n),
        Some(FieldValue::Float(Some(n))) => Ok(*n as f64),
        Some(FieldValue::Double(n)) => Ok(*n),
        _ => bail!("missing or invalid numeric field: {}", field),
    }
}

/// County key from the STATEFP/COUNTYFP attribute pair
fn record_county_key(record: &Record) -> Result<CountyKey> {
    let state = get_character_field(record, "STATEFP")?;
    let county = get_character_field(record, "COUNTYFP")?;
    let state: u32 = state
        .parse()
        .with_context(|| format!("invalid STATEFP '{}'", state))?;
    let county: u32 = county
        .parse()
        .with_context(|| format!("invalid COUNTYFP '{}'", county))?;
    Ok(CountyKey::checked(state, county)?)
}

/// Convert shapefile rings into a MultiPolygon.
///
/// Shapefiles store clockwise exterior rings, each followed by its holes.
fn shape_to_multipolygon(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    fn signed_area(pts: &[Coord<f64>]) -> f64 {
        pts.windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum::<f64>()
            / 2.0
    }

    let mut polys = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in polygon.rings() {
        let mut coords: Vec<Coord<f64>> = ring
            .points()
            .iter()
            .map(|pt| Coord { x: pt.x, y: pt.y })
            .collect();
        if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
            if first != last {
                coords.push(first);
            }
        }

        let is_exterior = signed_area(&coords) < 0.0;
        let ls = LineString(coords);
        if is_exterior {
            if let Some(ext) = exterior.take() {
                polys.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(ls);
        } else {
            holes.push(ls);
        }
    }
    if let Some(ext) = exterior {
        polys.push(Polygon::new(ext, holes));
    }

    MultiPolygon(polys)
}

/// Load county polygons tagged with their (state, county) key
pub fn load_county_polygons(path: &Path) -> Result<Vec<CountyPolygon>> {
    log::info!("Reading county shapefile: {}", path.display());

    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut polygons = Vec::with_capacity(reader.shape_count()?);
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("Error reading shape+record")?;
        let key = record_county_key(&record)?;
        let geometry = match shape {
            Shape::Polygon(polygon) => shape_to_multipolygon(&polygon),
            other => bail!("found non-Polygon shape for county {}: {:?}", key, other.shapetype()),
        };
        polygons.push(CountyPolygon::new(key, geometry));
    }

    log::info!("Loaded {} county polygons", polygons.len());
    Ok(polygons)
}

/// Load county land area (ALAND, converted from m² to km²) from a shapefile's dBASE table
pub fn load_county_area(dbf_path: &Path) -> Result<CountyTable> {
    log::info!("Reading county area table: {}", dbf_path.display());

    let mut reader = shapefile::dbase::Reader::from_path(dbf_path)
        .with_context(|| format!("Failed to open dBASE file: {}", dbf_path.display()))?;
    let records = reader.read().context("Error reading dBASE records")?;

    let mut rows = records
        .iter()
        .map(|record| Ok((record_county_key(record)?, get_numeric_field(record, "ALAND")? / 1_000_000.0)))
        .collect::<Result<Vec<(CountyKey, f64)>>>()?;
    rows.sort_by_key(|(key, _)| *key);

    let (keys, areas): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    let mut table = CountyTable::new(keys);
    table.add_column("ALAND", areas.into_iter().map(Some).collect())?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn ring(points: &[(f64, f64)]) -> Vec<shapefile::Point> {
        points.iter().map(|&(x, y)| shapefile::Point::new(x, y)).collect()
    }

    #[test]
    fn test_shape_with_hole() {
        // Exterior clockwise, hole counter-clockwise
        let exterior = ring(&[(0.0, 0.0), (0.0, 4.0), (4.0, 4.0), (4.0, 0.0), (0.0, 0.0)]);
        let hole = ring(&[(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 2.0), (1.0, 1.0)]);
        let polygon = shapefile::Polygon::with_rings(vec![
            shapefile::PolygonRing::Outer(exterior),
            shapefile::PolygonRing::Inner(hole),
        ]);

        let mp = shape_to_multipolygon(&polygon);
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!((mp.unsigned_area() - 15.0).abs() < 1e-9);
    }
}
