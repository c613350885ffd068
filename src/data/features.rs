//! Feature engineering for demographic and economic metrics

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::Array2;

use crate::data::{CountyTable, FeatureMatrix};
use crate::error::{AnalysisError, Result};
use crate::types::CountyKey;

/// Race/ethnicity groups whose male and female counts are combined
pub const RACE_GROUPS: [&str; 6] = [
    "White_Alone",
    "Black_Alone",
    "Native_India_Alone",
    "Asian_Alone",
    "Native_Hawaiian_Alone",
    "Hispanic_Alone",
];

/// Divide two optional cells; `None` when either side is missing or the denominator is 0
fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}

/// Add `{numerator}_PERCENT` = numerator / denominator * scale
pub fn percent_of(table: &mut CountyTable, numerator: &str, denominator: &str, scale: f64) -> Result<String> {
    let name = format!("{numerator}_PERCENT");
    let values: Vec<Option<f64>> = table
        .column(numerator)?
        .iter()
        .zip(table.column(denominator)?)
        .map(|(&n, &d)| ratio(n, d).map(|r| r * scale))
        .collect();
    table.add_column(name.clone(), values)?;
    Ok(name)
}

/// Add race/ethnicity percentages of total population, by sex and combined.
///
/// Returns the names of the combined `{group}_PERCENT` columns.
pub fn add_demographic_percentages(table: &mut CountyTable) -> Result<Vec<String>> {
    let mut combined = Vec::with_capacity(RACE_GROUPS.len());

    for group in RACE_GROUPS {
        let male = percent_of(table, &format!("{group}_MALE"), "TOT_POP", 100.0)?;
        let female = percent_of(table, &format!("{group}_FEMALE"), "TOT_POP", 100.0)?;

        let values: Vec<Option<f64>> = table
            .column(&male)?
            .iter()
            .zip(table.column(&female)?)
            .map(|(&m, &f)| Some(m? + f?))
            .collect();
        let name = format!("{group}_PERCENT");
        table.add_column(name.clone(), values)?;
        combined.push(name);
    }

    Ok(combined)
}

/// Add MALE_PERCENT and FEMALE_PERCENT as fractions of total population
pub fn add_gender_percentages(table: &mut CountyTable) -> Result<()> {
    for (source, target) in [("TOT_MALE", "MALE_PERCENT"), ("TOT_FEMALE", "FEMALE_PERCENT")] {
        let values: Vec<Option<f64>> = table
            .column(source)?
            .iter()
            .zip(table.column("TOT_POP")?)
            .map(|(&n, &d)| ratio(n, d))
            .collect();
        table.add_column(target, values)?;
    }
    Ok(())
}

/// Add `{column}/Area` = column / area for each named column
pub fn per_area(table: &mut CountyTable, columns: &[&str], area_column: &str) -> Result<Vec<String>> {
    table.require_columns(columns)?;
    let area = table.column(area_column)?.to_vec();

    let mut names = Vec::with_capacity(columns.len());
    for column in columns {
        let name = format!("{column}/Area");
        let values: Vec<Option<f64>> = table
            .column(column)?
            .iter()
            .zip(&area)
            .map(|(&v, &a)| ratio(v, a))
            .collect();
        table.add_column(name.clone(), values)?;
        names.push(name);
    }
    Ok(names)
}

/// Inner join of `right`'s columns onto `left` by (county, year).
///
/// When `right` has no years it is joined by county alone. The first matching
/// right row wins.
pub fn join_columns(left: &CountyTable, right: &CountyTable, columns: &[&str]) -> Result<CountyTable> {
    right.require_columns(columns)?;

    let mut index: HashMap<(CountyKey, Option<i32>), usize> = HashMap::with_capacity(right.len());
    for (row, key) in right.keys().iter().enumerate() {
        let year = right.years().map(|years| years[row]);
        index.entry((*key, year)).or_insert(row);
    }

    let mut left_rows = Vec::new();
    let mut right_rows = Vec::new();
    for (row, key) in left.keys().iter().enumerate() {
        let year = match (left.years(), right.years()) {
            (Some(years), Some(_)) => Some(years[row]),
            (_, None) => None,
            (None, Some(_)) => {
                return Err(AnalysisError::invalid_input(
                    "cannot join a yearly table onto a table without YEAR",
                ))
            }
        };
        if let Some(&r) = index.get(&(*key, year)) {
            left_rows.push(row);
            right_rows.push(r);
        }
    }

    log::debug!(
        "Joined {} of {} rows ({} unmatched)",
        left_rows.len(),
        left.len(),
        left.len() - left_rows.len()
    );

    let mut joined = CountyTable::new(left_rows.iter().map(|&r| left.keys()[r]).collect());
    if let Some(years) = left.years() {
        joined = joined.with_years(left_rows.iter().map(|&r| years[r]).collect())?;
    }
    if left.has_age_groups() {
        joined = joined.with_age_groups(
            left_rows
                .iter()
                .map(|&r| left.age_group(r).unwrap_or("Total").to_string())
                .collect(),
        )?;
    }
    for name in left.column_names() {
        let values = left.column(name)?;
        joined.add_column(name.clone(), left_rows.iter().map(|&r| values[r]).collect())?;
    }
    for name in columns {
        let values = right.column(name)?;
        joined.add_column(*name, right_rows.iter().map(|&r| values[r]).collect())?;
    }

    Ok(joined)
}

/// Build the clustering feature matrix from a long table.
///
/// Uses all-ages rows, averages each column per (county, year), and spreads
/// years into `{column}_{year}` columns. Counties missing any cell are dropped
/// so the resulting matrix is complete.
pub fn pivot_features(table: &CountyTable, columns: &[&str]) -> Result<FeatureMatrix> {
    let years = table.require_years("pivot_features")?;
    table.require_columns(columns)?;

    // (county, year) -> per-column (sum, count)
    let mut groups: BTreeMap<(CountyKey, i32), Vec<(f64, usize)>> = BTreeMap::new();
    let all_years: BTreeSet<i32> = (0..table.len())
        .filter(|&row| table.is_total_row(row))
        .map(|row| years[row])
        .collect();

    let column_values = columns
        .iter()
        .map(|c| table.column(c))
        .collect::<Result<Vec<_>>>()?;

    for row in (0..table.len()).filter(|&row| table.is_total_row(row)) {
        let acc = groups
            .entry((table.keys()[row], years[row]))
            .or_insert_with(|| vec![(0.0, 0); columns.len()]);
        for (c, values) in column_values.iter().enumerate() {
            if let Some(v) = values[row] {
                acc[c].0 += v;
                acc[c].1 += 1;
            }
        }
    }

    let feature_names: Vec<String> = columns
        .iter()
        .flat_map(|c| all_years.iter().map(move |y| format!("{c}_{y}")))
        .collect();

    let counties: BTreeSet<CountyKey> = groups.keys().map(|(key, _)| *key).collect();
    let mut keys = Vec::with_capacity(counties.len());
    let mut flat = Vec::with_capacity(counties.len() * feature_names.len());
    let mut dropped = 0;

    for county in counties {
        let mut row = Vec::with_capacity(feature_names.len());
        for c in 0..columns.len() {
            for &year in &all_years {
                let mean = groups
                    .get(&(county, year))
                    .and_then(|acc| (acc[c].1 > 0).then(|| acc[c].0 / acc[c].1 as f64));
                row.push(mean);
            }
        }
        match row.into_iter().collect::<Option<Vec<f64>>>() {
            Some(values) => {
                keys.push(county);
                flat.extend(values);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        log::info!("Dropped {} counties with incomplete features", dropped);
    }

    let values = Array2::from_shape_vec((keys.len(), feature_names.len()), flat)
        .map_err(|e| AnalysisError::invalid_input(e.to_string()))?;
    FeatureMatrix::new(keys, feature_names, values)
}

/// Change of a column between two years for one county
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalChange {
    pub county: CountyKey,
    pub start: f64,
    pub end: f64,
    pub absolute_change: f64,
    /// Percentage change; `None` when the start value is 0
    pub percent_change: Option<f64>,
}

/// Absolute and percentage change of a column between `start_year` and `end_year`.
///
/// Counties without an all-ages value in both years are skipped.
pub fn temporal_changes(
    table: &CountyTable,
    column: &str,
    start_year: i32,
    end_year: i32,
) -> Result<Vec<TemporalChange>> {
    let years = table.require_years("temporal_changes")?;
    let values = table.column(column)?;

    let mut starts: BTreeMap<CountyKey, f64> = BTreeMap::new();
    let mut ends: HashMap<CountyKey, f64> = HashMap::new();
    for row in (0..table.len()).filter(|&row| table.is_total_row(row)) {
        let Some(value) = values[row] else { continue };
        let key = table.keys()[row];
        if years[row] == start_year {
            starts.entry(key).or_insert(value);
        } else if years[row] == end_year {
            ends.entry(key).or_insert(value);
        }
    }

    Ok(starts
        .into_iter()
        .filter_map(|(county, start)| {
            let end = *ends.get(&county)?;
            let absolute_change = end - start;
            Some(TemporalChange {
                county,
                start,
                end,
                absolute_change,
                percent_change: (start != 0.0).then(|| absolute_change / start * 100.0),
            })
        })
        .collect())
}

/// Flag rows whose metric is below `threshold` (missing values are not at risk)
pub fn at_risk_flags(table: &CountyTable, column: &str, threshold: f64) -> Result<Vec<bool>> {
    Ok(table
        .column(column)?
        .iter()
        .map(|v| v.map_or(false, |v| v < threshold))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_table() -> CountyTable {
        let keys = vec![
            CountyKey::new(1, 3),
            CountyKey::new(1, 3),
            CountyKey::new(1, 1),
            CountyKey::new(1, 1),
            CountyKey::new(2, 5),
        ];
        CountyTable::new(keys)
            .with_years(vec![2019, 2022, 2019, 2022, 2019])
            .unwrap()
            .with_column("TOT_POP", vec![Some(100.0), Some(120.0), Some(50.0), Some(40.0), Some(7.0)])
            .unwrap()
            .with_column("EMP", vec![Some(10.0), Some(12.0), Some(0.0), Some(1.0), Some(1.0)])
            .unwrap()
    }

    #[test]
    fn test_pivot_features_spreads_years_and_drops_incomplete() {
        let matrix = pivot_features(&long_table(), &["TOT_POP", "EMP"]).unwrap();
        assert_eq!(
            matrix.columns(),
            &["TOT_POP_2019", "TOT_POP_2022", "EMP_2019", "EMP_2022"].map(String::from)
        );
        // (2, 5) has no 2022 row and is dropped; rows are sorted by key
        assert_eq!(matrix.keys(), &[CountyKey::new(1, 1), CountyKey::new(1, 3)]);
        assert_eq!(matrix.values().row(1).to_vec(), vec![100.0, 120.0, 10.0, 12.0]);
    }

    #[test]
    fn test_pivot_ignores_age_group_rows() {
        let table = CountyTable::new(vec![CountyKey::new(1, 1), CountyKey::new(1, 1)])
            .with_years(vec![2019, 2019])
            .unwrap()
            .with_age_groups(vec!["Total".to_string(), "0-4".to_string()])
            .unwrap()
            .with_column("TOT_POP", vec![Some(10.0), Some(2.0)])
            .unwrap();
        let matrix = pivot_features(&table, &["TOT_POP"]).unwrap();
        assert_eq!(matrix.values()[[0, 0]], 10.0);
    }

    #[test]
    fn test_temporal_changes() {
        let changes = temporal_changes(&long_table(), "EMP", 2019, 2022).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].county, CountyKey::new(1, 1));
        assert_eq!(changes[0].absolute_change, 1.0);
        assert_eq!(changes[0].percent_change, None);
        assert!((changes[1].percent_change.unwrap() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_percentages_and_area() {
        let mut table = CountyTable::new(vec![CountyKey::new(1, 1), CountyKey::new(1, 3)])
            .with_column("TOT_POP", vec![Some(200.0), Some(0.0)])
            .unwrap()
            .with_column("TOT_MALE", vec![Some(90.0), Some(0.0)])
            .unwrap()
            .with_column("TOT_FEMALE", vec![Some(110.0), Some(0.0)])
            .unwrap()
            .with_column("EMP", vec![Some(30.0), Some(4.0)])
            .unwrap()
            .with_column("ALAND", vec![Some(10.0), Some(2.0)])
            .unwrap();

        add_gender_percentages(&mut table).unwrap();
        assert_eq!(table.column("MALE_PERCENT").unwrap(), &[Some(0.45), None]);

        let names = per_area(&mut table, &["EMP"], "ALAND").unwrap();
        assert_eq!(names, vec!["EMP/Area".to_string()]);
        assert_eq!(table.column("EMP/Area").unwrap(), &[Some(3.0), Some(2.0)]);

        let flags = at_risk_flags(&table, "EMP/Area", 2.5).unwrap();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_join_columns_inner_by_county_and_year() {
        let area = CountyTable::new(vec![CountyKey::new(1, 3)])
            .with_column("ALAND", vec![Some(5.0)])
            .unwrap();
        let joined = join_columns(&long_table(), &area, &["ALAND"]).unwrap();
        assert_eq!(joined.len(), 2);
        assert!(joined.keys().iter().all(|k| *k == CountyKey::new(1, 3)));
        assert_eq!(joined.column("ALAND").unwrap(), &[Some(5.0), Some(5.0)]);
        assert_eq!(joined.years().unwrap(), &[2019, 2022]);
    }
}
