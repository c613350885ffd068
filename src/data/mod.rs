//! County tables, feature matrices and their loaders

pub mod features;
pub mod load;
pub mod shapes;

use std::collections::{HashMap, HashSet};

use ndarray::Array2;

use crate::error::{AnalysisError, Result};
use crate::types::CountyKey;

/// Long-format county table: one row per observation, keyed by county and
/// optionally by year and age group, with named numeric columns.
#[derive(Debug, Clone, Default)]
pub struct CountyTable {
    keys: Vec<CountyKey>,
    years: Option<Vec<i32>>,
    age_groups: Option<Vec<String>>,
    column_order: Vec<String>,
    columns: HashMap<String, Vec<Option<f64>>>,
}

impl CountyTable {
    /// Create a table with the given row keys and no columns
    pub fn new(keys: Vec<CountyKey>) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    /// Attach a year to every row
    pub fn with_years(mut self, years: Vec<i32>) -> Result<Self> {
        self.check_len("YEAR", years.len())?;
        self.years = Some(years);
        Ok(self)
    }

    /// Attach an age group label to every row ("Total" for all ages)
    pub fn with_age_groups(mut self, age_groups: Vec<String>) -> Result<Self> {
        self.check_len("AGE_GROUP", age_groups.len())?;
        self.age_groups = Some(age_groups);
        Ok(self)
    }

    /// Add or replace a numeric column
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        if !self.columns.contains_key(&name) {
            self.column_order.push(name.clone());
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Builder-style variant of [`CountyTable::add_column`]
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<Self> {
        self.add_column(name, values)?;
        Ok(self)
    }

    fn check_len(&self, name: &str, len: usize) -> Result<()> {
        if len != self.keys.len() {
            return Err(AnalysisError::invalid_input(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                len,
                self.keys.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[CountyKey] {
        &self.keys
    }

    pub fn years(&self) -> Option<&[i32]> {
        self.years.as_deref()
    }

    /// Years column, or an error naming the operation that needed it
    pub fn require_years(&self, operation: &str) -> Result<&[i32]> {
        self.years().ok_or_else(|| {
            AnalysisError::invalid_input(format!("{operation} requires a YEAR column"))
        })
    }

    pub fn has_age_groups(&self) -> bool {
        self.age_groups.is_some()
    }

    pub fn age_group(&self, row: usize) -> Option<&str> {
        self.age_groups.as_ref().map(|groups| groups[row].as_str())
    }

    /// True when the row carries the all-ages total (or the table has no age groups)
    pub fn is_total_row(&self, row: usize) -> bool {
        match self.age_group(row) {
            None => true,
            Some(group) => group.eq_ignore_ascii_case("total"),
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Values of a column, `None` where missing
    pub fn column(&self, name: &str) -> Result<&[Option<f64>]> {
        self.columns
            .get(name)
            .map(|values| values.as_slice())
            .ok_or_else(|| AnalysisError::invalid_input(format!("unknown column '{name}'")))
    }

    /// Check every named column exists before any computation starts
    pub fn require_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            self.column(name.as_ref())?;
        }
        Ok(())
    }

    /// New table holding the given rows, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> Result<CountyTable> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.len()) {
            return Err(AnalysisError::invalid_input(format!(
                "row {} is out of range for a table of {} rows",
                bad,
                self.len()
            )));
        }

        let mut table = CountyTable::new(rows.iter().map(|&r| self.keys[r]).collect());
        if let Some(years) = &self.years {
            table = table.with_years(rows.iter().map(|&r| years[r]).collect())?;
        }
        if let Some(groups) = &self.age_groups {
            table = table.with_age_groups(rows.iter().map(|&r| groups[r].clone()).collect())?;
        }
        for name in &self.column_order {
            let values = &self.columns[name];
            table.add_column(name.clone(), rows.iter().map(|&r| values[r]).collect())?;
        }
        Ok(table)
    }

    /// Only the all-ages rows (every row when the table has no age groups)
    pub fn total_rows(&self) -> Result<CountyTable> {
        let rows: Vec<usize> = (0..self.len()).filter(|&r| self.is_total_row(r)).collect();
        self.select_rows(&rows)
    }
}

/// Complete numeric feature matrix keyed by county
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    keys: Vec<CountyKey>,
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Validate and wrap a feature matrix.
    ///
    /// Fails if the shape disagrees with the labels, a row key repeats or a
    /// value is missing (non-finite).
    pub fn new(keys: Vec<CountyKey>, columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != keys.len() || values.ncols() != columns.len() {
            return Err(AnalysisError::invalid_input(format!(
                "feature matrix is {}x{} but has {} row keys and {} column names",
                values.nrows(),
                values.ncols(),
                keys.len(),
                columns.len()
            )));
        }

        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(*key) {
                return Err(AnalysisError::invalid_input(format!(
                    "duplicate feature row for county {key}"
                )));
            }
        }

        if let Some(((row, col), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(AnalysisError::invalid_input(format!(
                "missing value for county {} in column '{}'",
                keys[row], columns[col]
            )));
        }

        Ok(Self { keys, columns, values })
    }

    /// Build from row vectors; every row must have one value per column
    pub fn from_rows(keys: Vec<CountyKey>, columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let ncols = columns.len();
        let mut flat = Vec::with_capacity(rows.len() * ncols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != ncols {
                return Err(AnalysisError::invalid_input(format!(
                    "feature row {} has {} values, expected {}",
                    i,
                    row.len(),
                    ncols
                )));
            }
            flat.extend_from_slice(row);
        }
        let values = Array2::from_shape_vec((rows.len(), ncols), flat)
            .map_err(|e| AnalysisError::invalid_input(e.to_string()))?;
        Self::new(keys, columns, values)
    }

    pub fn keys(&self) -> &[CountyKey] {
        &self.keys
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// 5-digit identifiers in row order
    pub fn geoids(&self) -> Vec<String> {
        self.keys.iter().map(CountyKey::geoid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_columns_must_match_rows() {
        let mut table = CountyTable::new(vec![CountyKey::new(1, 1), CountyKey::new(1, 3)]);
        assert!(table.add_column("TOT_POP", vec![Some(1.0)]).is_err());
        table.add_column("TOT_POP", vec![Some(1.0), None]).unwrap();
        assert_eq!(table.column("TOT_POP").unwrap(), &[Some(1.0), None]);
        assert!(table.column("EMP").is_err());
        assert!(table.clone().with_years(vec![2019]).is_err());
    }

    #[test]
    fn test_column_order_is_insertion_order() {
        let table = CountyTable::new(vec![CountyKey::new(1, 1)])
            .with_column("b", vec![Some(1.0)])
            .unwrap()
            .with_column("a", vec![Some(2.0)])
            .unwrap()
            .with_column("b", vec![Some(3.0)])
            .unwrap();
        assert_eq!(table.column_names(), &["b".to_string(), "a".to_string()]);
        assert_eq!(table.column("b").unwrap(), &[Some(3.0)]);
    }

    #[test]
    fn test_total_rows_keeps_all_ages_only() {
        let key = CountyKey::new(1, 1);
        let table = CountyTable::new(vec![key, key, key])
            .with_years(vec![2019, 2019, 2020])
            .unwrap()
            .with_age_groups(vec!["Total".into(), "0-4".into(), "total".into()])
            .unwrap()
            .with_column("TOT_POP", vec![Some(10.0), Some(2.0), Some(11.0)])
            .unwrap();

        let totals = table.total_rows().unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals.years().unwrap(), &[2019, 2020]);
        assert_eq!(totals.column("TOT_POP").unwrap(), &[Some(10.0), Some(11.0)]);
        assert!(table.select_rows(&[3]).is_err());
    }

    #[test]
    fn test_feature_matrix_rejects_duplicates_and_missing() {
        let cols = vec!["x".to_string()];
        let dup = FeatureMatrix::from_rows(
            vec![CountyKey::new(1, 1), CountyKey::new(1, 1)],
            cols.clone(),
            vec![vec![1.0], vec![2.0]],
        );
        assert!(matches!(dup, Err(AnalysisError::InvalidInput(_))));

        let missing = FeatureMatrix::from_rows(
            vec![CountyKey::new(1, 1), CountyKey::new(1, 3)],
            cols.clone(),
            vec![vec![1.0], vec![f64::NAN]],
        );
        assert!(matches!(missing, Err(AnalysisError::InvalidInput(_))));

        let ragged = FeatureMatrix::from_rows(vec![CountyKey::new(1, 1)], cols, vec![vec![1.0, 2.0]]);
        assert!(ragged.is_err());
    }
}
