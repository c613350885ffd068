//! Classical statistics over county tables: correlation, Welch t-test,
//! one-way ANOVA and simple linear regression.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

use crate::data::features::temporal_changes;
use crate::data::CountyTable;
use crate::error::{AnalysisError, Result};
use crate::types::CountyKey;

/// Population column used for age-group change analysis
pub const POPULATION_COLUMN: &str = "TOT_POP";

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator)
fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Pearson correlation; `None` for fewer than 2 points or a constant series
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Rows where both cells are present
fn complete_pairs(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCorrelation {
    pub feature: String,
    pub correlation: f64,
    /// Rows with both values present
    pub n: usize,
}

/// Correlation of each feature with `target` over pairwise-complete rows,
/// strongest positive first. Features with an undefined correlation are left out.
pub fn rank_correlations(table: &CountyTable, target: &str, features: &[&str]) -> Result<Vec<FeatureCorrelation>> {
    table.require_columns(features)?;
    let target_values = table.column(target)?;

    let mut results = Vec::with_capacity(features.len());
    for &feature in features {
        let (x, y) = complete_pairs(target_values, table.column(feature)?);
        match pearson(&x, &y) {
            Some(correlation) => results.push(FeatureCorrelation {
                feature: feature.to_string(),
                correlation,
                n: x.len(),
            }),
            None => log::debug!("Correlation of '{}' with '{}' is undefined", feature, target),
        }
    }

    results.sort_by(|a, b| b.correlation.total_cmp(&a.correlation));
    Ok(results)
}

/// Welch's unequal-variance t-test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    pub t_statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    pub first_mean: f64,
    pub second_mean: f64,
    pub first_n: usize,
    pub second_n: usize,
}

pub fn welch_t_test(first: &[f64], second: &[f64]) -> Result<TTestResult> {
    for group in [first, second] {
        if group.len() < 2 {
            return Err(AnalysisError::insufficient_data(2, group.len()));
        }
    }

    let (m1, m2) = (mean(first), mean(second));
    let (n1, n2) = (first.len() as f64, second.len() as f64);
    let s1 = sample_variance(first) / n1;
    let s2 = sample_variance(second) / n2;
    let se2 = s1 + s2;
    if se2 == 0.0 {
        return Err(AnalysisError::invalid_input(
            "t-test groups are both constant",
        ));
    }

    let t = (m1 - m2) / se2.sqrt();
    let df = se2.powi(2) / (s1.powi(2) / (n1 - 1.0) + s2.powi(2) / (n2 - 1.0));
    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| AnalysisError::invalid_input(e.to_string()))?;
    let p_value = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);

    Ok(TTestResult {
        t_statistic: t,
        p_value,
        degrees_of_freedom: df,
        first_mean: m1,
        second_mean: m2,
        first_n: first.len(),
        second_n: second.len(),
    })
}

/// Split a metric by an at-risk flag and compare the groups (at-risk first)
pub fn at_risk_t_test(table: &CountyTable, flags: &[bool], metric: &str) -> Result<TTestResult> {
    let values = table.column(metric)?;
    if flags.len() != values.len() {
        return Err(AnalysisError::invalid_input(format!(
            "{} flags for {} rows",
            flags.len(),
            values.len()
        )));
    }

    let mut at_risk = Vec::new();
    let mut safe = Vec::new();
    for (&flag, value) in flags.iter().zip(values) {
        if let Some(v) = value {
            if flag {
                at_risk.push(*v);
            } else {
                safe.push(*v);
            }
        }
    }
    welch_t_test(&at_risk, &safe)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaResult {
    pub f_statistic: f64,
    pub p_value: f64,
    pub n_groups: usize,
}

/// One-way ANOVA over the non-empty groups
pub fn one_way_anova(groups: &[Vec<f64>]) -> Result<AnovaResult> {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    let k = groups.len();
    if k < 2 {
        return Err(AnalysisError::insufficient_data(2, k));
    }
    let total: usize = groups.iter().map(|g| g.len()).sum();
    if total <= k {
        return Err(AnalysisError::insufficient_data(k + 1, total));
    }

    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / total as f64;
    let mut between = 0.0;
    let mut within = 0.0;
    for group in &groups {
        let m = mean(group);
        between += group.len() as f64 * (m - grand_mean).powi(2);
        within += group.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    }
    if within == 0.0 {
        return Err(AnalysisError::invalid_input(
            "ANOVA groups have no within-group variance",
        ));
    }

    let df_between = (k - 1) as f64;
    let df_within = (total - k) as f64;
    let f = (between / df_between) / (within / df_within);
    let dist = FisherSnedecor::new(df_between, df_within)
        .map_err(|e| AnalysisError::invalid_input(e.to_string()))?;

    Ok(AnovaResult {
        f_statistic: f,
        p_value: (1.0 - dist.cdf(f)).clamp(0.0, 1.0),
        n_groups: k,
    })
}

/// Group present values of a column by a label per row, in label order
pub fn grouped_values<L: Ord + Clone>(labels: &[L], values: &[Option<f64>]) -> Vec<(L, Vec<f64>)> {
    let mut groups: BTreeMap<L, Vec<f64>> = BTreeMap::new();
    for (label, value) in labels.iter().zip(values) {
        let entry = groups.entry(label.clone()).or_default();
        if let Some(v) = value {
            entry.push(*v);
        }
    }
    groups.into_iter().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Ordinary least squares fit of `y = slope * x + intercept`
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<Regression> {
    if x.len() != y.len() {
        return Err(AnalysisError::invalid_input(format!(
            "regression inputs differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(AnalysisError::insufficient_data(2, x.len()));
    }

    let (mx, my) = (mean(x), mean(y));
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    if sxx == 0.0 {
        return Err(AnalysisError::invalid_input("regression predictor is constant"));
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let slope = sxy / sxx;
    let intercept = my - slope * mx;

    let ss_tot: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
    let ss_res: f64 = x
        .iter()
        .zip(y)
        .map(|(a, b)| (b - (slope * a + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    Ok(Regression {
        slope,
        intercept,
        r_squared,
    })
}

/// Relative change of population and target for one county
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePair {
    pub county: CountyKey,
    pub population_change: f64,
    pub target_change: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalCorrelation {
    pub changes: Vec<ChangePair>,
    pub correlation: Option<f64>,
}

impl TemporalCorrelation {
    pub fn population_changes(&self) -> Vec<f64> {
        self.changes.iter().map(|c| c.population_change).collect()
    }

    pub fn target_changes(&self) -> Vec<f64> {
        self.changes.iter().map(|c| c.target_change).collect()
    }
}

/// Correlate the relative change of population with the relative change of a
/// target between two years. Counties with a zero start value are dropped.
pub fn temporal_change_correlation(
    table: &CountyTable,
    population_column: &str,
    target_column: &str,
    start_year: i32,
    end_year: i32,
) -> Result<TemporalCorrelation> {
    let relative = |column: &str| -> Result<HashMap<CountyKey, f64>> {
        Ok(temporal_changes(table, column, start_year, end_year)?
            .into_iter()
            .filter_map(|c| {
                let change = c.percent_change? / 100.0;
                change.is_finite().then_some((c.county, change))
            })
            .collect())
    };

    let population = relative(population_column)?;
    let target = relative(target_column)?;

    let mut changes: Vec<ChangePair> = population
        .iter()
        .filter_map(|(county, &population_change)| {
            Some(ChangePair {
                county: *county,
                population_change,
                target_change: *target.get(county)?,
            })
        })
        .collect();
    changes.sort_by_key(|c| c.county);

    let correlation = pearson(
        &changes.iter().map(|c| c.population_change).collect::<Vec<_>>(),
        &changes.iter().map(|c| c.target_change).collect::<Vec<_>>(),
    );
    log::info!(
        "Temporal change correlation {}->{} over {} counties: {:?}",
        start_year,
        end_year,
        changes.len(),
        correlation
    );

    Ok(TemporalCorrelation {
        changes,
        correlation,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeGroupCorrelation {
    pub age_group: String,
    pub correlation: Option<f64>,
    pub counties: usize,
}

/// Per age group, correlate the absolute change of `TOT_POP` with the
/// absolute change of `target_column` across counties. Groups with fewer than
/// two counties are skipped; the all-ages total is excluded.
pub fn age_group_correlations(
    table: &CountyTable,
    target_column: &str,
    start_year: i32,
    end_year: i32,
) -> Result<Vec<AgeGroupCorrelation>> {
    if !table.has_age_groups() {
        return Err(AnalysisError::invalid_input(
            "age group correlations need an AGE_GROUP column",
        ));
    }
    let years = table.require_years("age_group_correlations")?;
    let population = table.column(POPULATION_COLUMN)?;
    let target = table.column(target_column)?;

    // (group, county) -> [start, end] values of (population, target)
    type Endpoints = [Option<(f64, f64)>; 2];
    let mut order: Vec<String> = Vec::new();
    let mut cells: HashMap<(String, CountyKey), Endpoints> = HashMap::new();

    for row in 0..table.len() {
        if table.is_total_row(row) {
            continue;
        }
        let slot = if years[row] == start_year {
            0
        } else if years[row] == end_year {
            1
        } else {
            continue;
        };
        let (Some(p), Some(t)) = (population[row], target[row]) else {
            continue;
        };
        let group = table.age_group(row).unwrap_or_default().to_string();
        if !order.contains(&group) {
            order.push(group.clone());
        }
        let entry = cells.entry((group, table.keys()[row])).or_default();
        entry[slot].get_or_insert((p, t));
    }

    let mut by_group: HashMap<String, Vec<(CountyKey, f64, f64)>> = HashMap::new();
    for ((group, county), [start, end]) in cells {
        if let (Some(s), Some(e)) = (start, end) {
            by_group
                .entry(group)
                .or_default()
                .push((county, e.0 - s.0, e.1 - s.1));
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|group| {
            let mut rows = by_group.remove(&group)?;
            if rows.len() < 2 {
                return None;
            }
            rows.sort_by_key(|r| r.0);
            let pop: Vec<f64> = rows.iter().map(|r| r.1).collect();
            let tgt: Vec<f64> = rows.iter().map(|r| r.2).collect();
            Some(AgeGroupCorrelation {
                correlation: pearson(&pop, &tgt),
                counties: rows.len(),
                age_group: group,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_and_undefined() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&x, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&[1.0], &[2.0]), None);
    }

    #[test]
    fn test_welch_known_values() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0];
        let result = welch_t_test(&a, &b).unwrap();
        // var(a) = 2.5, var(b) = 10; se = sqrt(0.5 + 2) ; t = -3 / sqrt(2.5)
        assert!((result.t_statistic - (-3.0 / 2.5f64.sqrt())).abs() < 1e-12);
        let df = 2.5f64.powi(2) / (0.25 / 4.0 + 4.0 / 4.0);
        assert!((result.degrees_of_freedom - df).abs() < 1e-12);
        assert!(result.p_value > 0.05 && result.p_value < 0.2);
        assert_eq!(result.first_n, 5);
    }

    #[test]
    fn test_welch_needs_two_per_group() {
        assert_eq!(
            welch_t_test(&[1.0], &[1.0, 2.0]).unwrap_err(),
            AnalysisError::insufficient_data(2, 1)
        );
    }

    #[test]
    fn test_anova_separated_groups() {
        let groups = vec![
            vec![1.0, 1.1, 0.9],
            vec![5.0, 5.2, 4.8],
            vec![],
            vec![9.0, 9.1, 8.9],
        ];
        let result = one_way_anova(&groups).unwrap();
        assert_eq!(result.n_groups, 3);
        assert!(result.f_statistic > 100.0);
        assert!(result.p_value < 1e-4);
    }

    #[test]
    fn test_anova_single_group_is_insufficient() {
        let err = one_way_anova(&[vec![1.0, 2.0], vec![]]).unwrap_err();
        assert_eq!(err, AnalysisError::insufficient_data(2, 1));
    }

    #[test]
    fn test_regression_exact_line() {
        let fit = linear_regression(&[0.0, 1.0, 2.0, 3.0], &[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_correlations_pairwise_complete_and_sorted() {
        let keys: Vec<CountyKey> = (1..=4).map(|c| CountyKey::new(1, c)).collect();
        let table = CountyTable::new(keys)
            .with_column("target", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)])
            .unwrap()
            .with_column("up", vec![Some(2.0), None, Some(6.0), Some(8.0)])
            .unwrap()
            .with_column("down", vec![Some(4.0), Some(3.0), Some(2.0), Some(1.0)])
            .unwrap()
            .with_column("flat", vec![Some(1.0); 4])
            .unwrap();

        let ranked = rank_correlations(&table, "target", &["down", "up", "flat"]).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].feature, "up");
        assert_eq!(ranked[0].n, 3);
        assert_eq!(ranked[1].feature, "down");
    }

    fn yearly_table() -> CountyTable {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let c = CountyKey::new(1, 5);
        CountyTable::new(vec![a, a, b, b, c, c])
            .with_years(vec![2019, 2022, 2019, 2022, 2019, 2022])
            .unwrap()
            .with_column("pop", vec![Some(100.0), Some(110.0), Some(100.0), Some(120.0), Some(0.0), Some(5.0)])
            .unwrap()
            .with_column("stores", vec![Some(10.0), Some(11.0), Some(10.0), Some(12.0), Some(1.0), Some(1.0)])
            .unwrap()
    }

    #[test]
    fn test_temporal_change_correlation_drops_zero_start() {
        let result = temporal_change_correlation(&yearly_table(), "pop", "stores", 2019, 2022).unwrap();
        assert_eq!(result.changes.len(), 2);
        assert!((result.changes[0].population_change - 0.1).abs() < 1e-12);
        assert!((result.correlation.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_age_group_correlations() {
        let a = CountyKey::new(1, 1);
        let b = CountyKey::new(1, 3);
        let keys = vec![a, a, b, b, a, a, b, b];
        let groups: Vec<String> = ["0-4", "0-4", "0-4", "0-4", "Total", "Total", "Total", "Total"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let table = CountyTable::new(keys)
            .with_years(vec![2019, 2022, 2019, 2022, 2019, 2022, 2019, 2022])
            .unwrap()
            .with_age_groups(groups)
            .unwrap()
            .with_column(POPULATION_COLUMN, vec![Some(10.0), Some(12.0), Some(10.0), Some(15.0), None, None, None, None])
            .unwrap()
            .with_column("stores", vec![Some(1.0), Some(2.0), Some(1.0), Some(4.0), None, None, None, None])
            .unwrap();

        let result = age_group_correlations(&table, "stores", 2019, 2022).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].age_group, "0-4");
        assert_eq!(result[0].counties, 2);
        assert!((result[0].correlation.unwrap() - 1.0).abs() < 1e-12);
    }
}
