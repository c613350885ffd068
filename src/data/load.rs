//! Table loading with polars

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use polars::prelude::*;

use crate::data::CountyTable;
use crate::types::CountyKey;

/// Census population estimate columns and the names used downstream
pub const POPULATION_COLUMNS: [(&str, &str); 15] = [
    ("TOT_POP", "TOT_POP"),
    ("TOT_MALE", "TOT_MALE"),
    ("TOT_FEMALE", "TOT_FEMALE"),
    ("WA_MALE", "White_Alone_MALE"),
    ("WA_FEMALE", "White_Alone_FEMALE"),
    ("BA_MALE", "Black_Alone_MALE"),
    ("BA_FEMALE", "Black_Alone_FEMALE"),
    ("IA_MALE", "Native_India_Alone_MALE"),
    ("IA_FEMALE", "Native_India_Alone_FEMALE"),
    ("AA_MALE", "Asian_Alone_MALE"),
    ("AA_FEMALE", "Asian_Alone_FEMALE"),
    ("NA_MALE", "Native_Hawaiian_Alone_MALE"),
    ("NA_FEMALE", "Native_Hawaiian_Alone_FEMALE"),
    ("H_MALE", "Hispanic_Alone_MALE"),
    ("H_FEMALE", "Hispanic_Alone_FEMALE"),
];

/// Read a CSV or Parquet file (chosen by extension) into a DataFrame
pub fn read_table(path: &Path) -> Result<DataFrame> {
    log::info!("Reading table: {}", path.display());

    if !path.exists() {
        return Err(anyhow!("File not found: {}", path.display()));
    }

    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("parquet"));

    let frame = if is_parquet {
        LazyFrame::scan_parquet(path, Default::default())?
    } else {
        LazyCsvReader::new(path)
            .with_has_header(true)
            .with_encoding(CsvEncoding::LossyUtf8)
            .with_infer_schema_length(Some(10_000))
            .finish()?
    };

    let df = frame
        .collect()
        .with_context(|| format!("Failed to read table: {}", path.display()))?;

    log::debug!("Schema of {}: {:?}", path.display(), df.schema());
    log::info!("Loaded {} rows from {}", df.height(), path.display());

    Ok(df)
}

/// Split a combined state+county identifier (last three digits are the county)
pub fn split_county_id(id: i64) -> Result<CountyKey> {
    if id < 0 {
        bail!("negative county identifier: {}", id);
    }
    Ok(CountyKey::checked(
        county_part(id / 1000, "state")?,
        county_part(id % 1000, "county")?,
    )?)
}

fn county_part(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("{} code {} is out of range", what, value))
}

/// Map the census estimate YEAR code to a calendar year (codes 1-4 are 2019-2022)
pub fn census_estimate_year(code: i64) -> Option<i32> {
    match code {
        1 => Some(2019),
        2 => Some(2020),
        3 => Some(2021),
        4 => Some(2022),
        _ => None,
    }
}

/// Label for a census AGEGRP code
pub fn age_group_label(code: i64) -> Option<String> {
    match code {
        0 => Some("Total".to_string()),
        1..=17 => {
            let lower = (code - 1) * 5;
            Some(format!("{}-{}", lower, lower + 4))
        }
        18 => Some("85+".to_string()),
        _ => None,
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

fn integer_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = df
        .column(name)?
        .cast(&DataType::Int64)
        .with_context(|| format!("Column '{}' is not integer-like", name))?;
    Ok(column.i64()?.into_iter().collect())
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)?
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{}' is not numeric", name))?;
    Ok(column
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

/// Row keys from STATE/COUNTY columns, or from a combined State_County_ID column
fn county_keys(df: &DataFrame) -> Result<Vec<CountyKey>> {
    if has_column(df, "STATE") && has_column(df, "COUNTY") {
        let states = integer_column(df, "STATE")?;
        let counties = integer_column(df, "COUNTY")?;
        states
            .into_iter()
            .zip(counties)
            .enumerate()
            .map(|(row, pair)| match pair {
                (Some(s), Some(c)) if s >= 0 && c >= 0 => {
                    Ok(CountyKey::checked(county_part(s, "state")?, county_part(c, "county")?)?)
                }
                _ => bail!("missing or invalid STATE/COUNTY in row {}", row),
            })
            .collect()
    } else if has_column(df, "State_County_ID") {
        integer_column(df, "State_County_ID")?
            .into_iter()
            .enumerate()
            .map(|(row, id)| match id {
                Some(id) => split_county_id(id),
                None => bail!("missing State_County_ID in row {}", row),
            })
            .collect()
    } else {
        bail!("table has neither STATE/COUNTY nor State_County_ID columns")
    }
}

/// Convert a DataFrame into a [`CountyTable`] carrying the requested value columns.
///
/// `YEAR` and `AGE_GROUP` are picked up when present.
pub fn county_table_from_frame(df: &DataFrame, value_columns: &[&str]) -> Result<CountyTable> {
    let keys = county_keys(df)?;
    let mut table = CountyTable::new(keys);

    if has_column(df, "YEAR") {
        let years = integer_column(df, "YEAR")?
            .into_iter()
            .enumerate()
            .map(|(row, y)| y.map(|y| y as i32).ok_or_else(|| anyhow!("missing YEAR in row {}", row)))
            .collect::<Result<Vec<_>>>()?;
        table = table.with_years(years)?;
    }

    if has_column(df, "AGE_GROUP") {
        let column = df.column("AGE_GROUP")?.cast(&DataType::String)?;
        let groups = column
            .str()?
            .into_iter()
            .map(|g| g.unwrap_or("Total").to_string())
            .collect();
        table = table.with_age_groups(groups)?;
    }

    for name in value_columns {
        table.add_column(*name, float_column(df, name)?)?;
    }

    Ok(table)
}

/// Read a file straight into a [`CountyTable`]
pub fn read_county_table(path: &Path, value_columns: &[&str]) -> Result<CountyTable> {
    let df = read_table(path)?;
    county_table_from_frame(&df, value_columns)
        .with_context(|| format!("Failed to build county table from {}", path.display()))
}

/// Load census county population estimates.
///
/// Keeps the 2019-2022 estimate rows, labels age groups and renames the
/// race/ethnicity columns to their descriptive names.
pub fn load_population(path: &Path) -> Result<CountyTable> {
    let df = read_table(path)?;

    let keys = county_keys(&df)?;
    let year_codes = integer_column(&df, "YEAR")?;
    let age_codes = integer_column(&df, "AGEGRP")?;

    let keep: Vec<usize> = (0..df.height())
        .filter(|&row| year_codes[row].and_then(census_estimate_year).is_some())
        .filter(|&row| age_codes[row].and_then(age_group_label).is_some())
        .collect();

    log::info!(
        "Keeping {} of {} population rows for estimate years 2019-2022",
        keep.len(),
        df.height()
    );

    let mut years = Vec::with_capacity(keep.len());
    let mut groups = Vec::with_capacity(keep.len());
    for &row in &keep {
        // Both are Some: filtered above.
        years.push(year_codes[row].and_then(census_estimate_year).unwrap_or_default());
        groups.push(age_codes[row].and_then(age_group_label).unwrap_or_default());
    }

    let mut table = CountyTable::new(keep.iter().map(|&row| keys[row]).collect())
        .with_years(years)?
        .with_age_groups(groups)?;

    for (source, target) in POPULATION_COLUMNS {
        let values = float_column(&df, source)?;
        table.add_column(target, keep.iter().map(|&row| values[row]).collect())?;
    }

    Ok(table)
}

/// Establishment files for one year (`merged_data_{year}_EMPSIZE_*.csv`), sorted by name
pub fn grocery_files(dir: &Path, year: i32) -> Result<Vec<PathBuf>> {
    let prefix = format!("merged_data_{year}_EMPSIZE_");
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(&prefix) && name.ends_with(".csv"));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Most frequent label; ties go to the lexically smallest
fn most_common_label(labels: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for label in labels.into_iter().flatten() {
        *counts.entry(label).or_default() += 1;
    }

    let mut best: Option<(String, usize)> = None;
    for (label, n) in counts {
        if best.as_ref().map_or(true, |(_, m)| n > *m) {
            best = Some((label, n));
        }
    }
    best.map(|(label, _)| label)
}

/// One year of establishment data keyed by county
struct GroceryYear {
    keys: BTreeSet<CountyKey>,
    columns: BTreeMap<String, HashMap<CountyKey, f64>>,
}

fn read_grocery_year(dir: &Path, year: i32) -> Result<GroceryYear> {
    let files = grocery_files(dir, year)?;
    if files.is_empty() {
        bail!("No establishment files for {} in {}", year, dir.display());
    }

    let mut keys = BTreeSet::new();
    let mut columns: BTreeMap<String, HashMap<CountyKey, f64>> = BTreeMap::new();

    for (i, path) in files.iter().enumerate() {
        let df = read_table(path)?;
        let file_keys = county_keys(&df)?;

        let labels: Vec<Option<String>> = df
            .column("EMPSIZES_LABEL")?
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|label| label.map(str::to_string))
            .collect();
        let label = most_common_label(labels)
            .with_context(|| format!("{} has no EMPSIZES_LABEL values", path.display()))?
            .replace(' ', "_");

        // Every file carries EMP and PAYANN; the first file's values are kept
        let mut value_columns = vec![(format!("ESTAB_{label}"), "ESTAB")];
        if i == 0 {
            value_columns.push(("EMP".to_string(), "EMP"));
            value_columns.push(("PAYANN".to_string(), "PAYANN"));
        }

        for (target, source) in value_columns {
            let values = float_column(&df, source)?;
            let column = columns.entry(target).or_default();
            for (key, value) in file_keys.iter().zip(values) {
                if let Some(v) = value {
                    column.entry(*key).or_insert(v);
                }
            }
        }
        keys.extend(file_keys);
    }

    Ok(GroceryYear { keys, columns })
}

/// Load establishment counts, employment and payroll for each year.
///
/// Each size-class file contributes an `ESTAB_{label}` column named after its
/// most common `EMPSIZES_LABEL`. Missing cells are filled with 0.
pub fn load_grocery(dir: &Path, years: &[i32]) -> Result<CountyTable> {
    let per_year = years
        .iter()
        .map(|&year| Ok((year, read_grocery_year(dir, year)?)))
        .collect::<Result<Vec<_>>>()?;

    let names: BTreeSet<&String> = per_year.iter().flat_map(|(_, g)| g.columns.keys()).collect();

    let mut keys = Vec::new();
    let mut row_years = Vec::new();
    for (year, grocery) in &per_year {
        keys.extend(grocery.keys.iter().copied());
        row_years.extend(std::iter::repeat(*year).take(grocery.keys.len()));
    }

    let mut table = CountyTable::new(keys).with_years(row_years)?;
    for name in names {
        let values = per_year
            .iter()
            .flat_map(|(_, grocery)| {
                let column = grocery.columns.get(name);
                grocery
                    .keys
                    .iter()
                    .map(move |key| Some(column.and_then(|c| c.get(key)).copied().unwrap_or(0.0)))
            })
            .collect();
        table.add_column(name.clone(), values)?;
    }

    log::info!(
        "Loaded {} establishment rows with {} columns",
        table.len(),
        table.column_names().len()
    );
    Ok(table)
}
