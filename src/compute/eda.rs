//! Exploratory analysis steps over a loaded dataset.
//!
//! Each function returns a JSON payload recorded verbatim in the run's
//! analysis map; the response stage renders from these payloads, so field
//! names here are part of the step contract.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::dataset::{Column, ColumnType, Dataset};
use crate::planner::StepName;

use super::ComputationError;

/// Number of histogram bins for numeric distributions.
const HISTOGRAM_BINS: usize = 10;

/// `load`: confirm readability and report the dataset shape.
pub fn load(dataset: &Dataset) -> Value {
    json!({
        "path": dataset.path,
        "rows": dataset.n_rows,
        "columns": dataset.n_columns(),
    })
}

/// `inspect_columns`: per-column type and missing-count report.
///
/// Feature engineering depends on this payload's `columns` array.
pub fn inspect_columns(dataset: &Dataset) -> Value {
    let columns: Vec<Value> = dataset
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "type": c.ty.to_string(),
                "missing": c.missing_count(),
            })
        })
        .collect();

    json!({ "columns": columns })
}

/// `summary_stats`: summary statistics per column.
///
/// Numeric columns get count/mean/std/min/max/median; other columns get
/// count/distinct and the most frequent value.
pub fn summary_stats(dataset: &Dataset) -> Value {
    let mut numeric = BTreeMap::new();
    let mut categorical = BTreeMap::new();

    for column in &dataset.columns {
        match column.ty {
            ColumnType::Numeric => {
                let values: Vec<f64> = column.numeric_cells().into_iter().flatten().collect();
                numeric.insert(
                    column.name.clone(),
                    json!({
                        "count": values.len(),
                        "mean": mean(&values),
                        "std": std_dev(&values),
                        "min": values.iter().cloned().fold(f64::INFINITY, f64::min),
                        "max": values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                        "median": median(&values),
                    }),
                );
            }
            ColumnType::Boolean | ColumnType::Categorical => {
                let frequencies = frequency_table(column);
                let top = frequencies
                    .iter()
                    .max_by_key(|(_, count)| *count)
                    .map(|(value, count)| (value.clone(), *count));
                categorical.insert(
                    column.name.clone(),
                    json!({
                        "count": column.cells.len() - column.missing_count(),
                        "distinct": frequencies.len(),
                        "top": top.as_ref().map(|(v, _)| v.clone()),
                        "top_count": top.map(|(_, c)| c),
                    }),
                );
            }
        }
    }

    json!({ "numeric": numeric, "categorical": categorical })
}

/// `missing_values`: per-column missing counts.
pub fn missing_values(dataset: &Dataset) -> Value {
    let mut columns = BTreeMap::new();
    let mut total = 0usize;
    for column in &dataset.columns {
        let count = column.missing_count();
        total += count;
        columns.insert(column.name.clone(), count);
    }

    json!({
        "total_missing": total,
        "rows": dataset.n_rows,
        "columns": columns,
    })
}

/// `correlation`: Pearson correlation matrix over numeric columns.
///
/// Params: `{"columns": [...]}` restricts the matrix; an empty or absent
/// list means all numeric columns. Rows with a missing value in either
/// column are dropped pairwise.
pub fn correlation(dataset: &Dataset, params: &Value) -> Result<Value, ComputationError> {
    let requested: Vec<String> = params
        .get("columns")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let columns: Vec<&Column> = if requested.is_empty() {
        dataset.columns_of_type(ColumnType::Numeric)
    } else {
        let mut selected = Vec::with_capacity(requested.len());
        for name in &requested {
            let column = dataset
                .column(name)
                .ok_or_else(|| ComputationError::MissingColumn(name.clone()))?;
            if column.ty != ColumnType::Numeric {
                return Err(ComputationError::NotNumeric(name.clone()));
            }
            selected.push(column);
        }
        selected
    };

    if columns.len() < 2 {
        return Err(ComputationError::NotEnoughNumericColumns(columns.len()));
    }

    let series: Vec<Vec<Option<f64>>> = columns.iter().map(|c| c.numeric_cells()).collect();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    let mut matrix = vec![vec![0.0f64; columns.len()]; columns.len()];
    for i in 0..columns.len() {
        for j in 0..columns.len() {
            matrix[i][j] = if i == j {
                1.0
            } else {
                pearson(&series[i], &series[j])
            };
        }
    }

    Ok(json!({ "columns": names, "matrix": matrix }))
}

/// `distribution`: histogram for a numeric column, frequency table otherwise.
///
/// Params: `{"column": name}`; absent means the first numeric column, or the
/// first column if none are numeric.
pub fn distribution(dataset: &Dataset, params: &Value) -> Result<Value, ComputationError> {
    let column = match params.get("column").and_then(Value::as_str) {
        Some(name) => dataset
            .column(name)
            .ok_or_else(|| ComputationError::MissingColumn(name.to_string()))?,
        None => dataset
            .columns_of_type(ColumnType::Numeric)
            .first()
            .copied()
            .or_else(|| dataset.columns.first())
            .ok_or(ComputationError::InvalidParams {
                step: StepName::Distribution,
                message: "dataset has no columns".to_string(),
            })?,
    };

    match column.ty {
        ColumnType::Numeric => {
            let values: Vec<f64> = column.numeric_cells().into_iter().flatten().collect();
            if values.is_empty() {
                return Err(ComputationError::Failed(format!(
                    "column '{}' has no non-missing values",
                    column.name
                )));
            }
            Ok(json!({
                "column": column.name,
                "type": "numeric",
                "bins": histogram(&values, HISTOGRAM_BINS),
            }))
        }
        ColumnType::Boolean | ColumnType::Categorical => Ok(json!({
            "column": column.name,
            "type": "categorical",
            "frequencies": frequency_table(column),
        })),
    }
}

/// Sample mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0.0 below two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Median; 0.0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Pearson correlation over pairwise-complete observations.
///
/// Returns 0.0 when either side has no variance or fewer than two complete
/// pairs exist.
fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();

    if pairs.len() < 2 {
        return 0.0;
    }

    let xs: Vec<f64> = pairs.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, y)| *y).collect();
    let mx = mean(&xs);
    let my = mean(&ys);

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in &pairs {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }

    if vx == 0.0 || vy == 0.0 {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}

/// Equal-width histogram over `bins` buckets.
fn histogram(values: &[f64], bins: usize) -> Vec<Value> {
    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if lo == hi {
        return vec![json!({ "lo": lo, "hi": hi, "count": values.len() })];
    }

    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in values {
        let mut idx = ((v - lo) / width) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        counts[idx] += 1;
    }

    counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            json!({
                "lo": lo + width * i as f64,
                "hi": lo + width * (i + 1) as f64,
                "count": count,
            })
        })
        .collect()
}

/// Frequency table of non-missing values, insertion-ordered by first sight.
fn frequency_table(column: &Column) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for cell in column.cells.iter().flatten() {
        if !counts.contains_key(cell) {
            order.push(cell.clone());
        }
        *counts.entry(cell.clone()).or_insert(0) += 1;
    }
    order
        .into_iter()
        .map(|value| {
            let count = counts[&value];
            (value, count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(text: &str) -> Dataset {
        Dataset::from_csv_str(text, "test.csv").expect("dataset parses")
    }

    #[test]
    fn test_summary_stats_numeric() {
        let ds = dataset("x\n1\n2\n3\n4\n");
        let stats = summary_stats(&ds);
        let x = &stats["numeric"]["x"];
        assert_eq!(x["count"], 4);
        assert_eq!(x["mean"], 2.5);
        assert_eq!(x["min"], 1.0);
        assert_eq!(x["max"], 4.0);
        assert_eq!(x["median"], 2.5);
    }

    #[test]
    fn test_summary_stats_categorical() {
        let ds = dataset("c\nred\nblue\nred\n");
        let stats = summary_stats(&ds);
        let c = &stats["categorical"]["c"];
        assert_eq!(c["distinct"], 2);
        assert_eq!(c["top"], "red");
        assert_eq!(c["top_count"], 2);
    }

    #[test]
    fn test_missing_values_counts() {
        let ds = dataset("a,b\n1,x\n,y\n,z\n");
        let result = missing_values(&ds);
        assert_eq!(result["total_missing"], 2);
        assert_eq!(result["columns"]["a"], 2);
        assert_eq!(result["columns"]["b"], 0);
    }

    #[test]
    fn test_correlation_perfect() {
        let ds = dataset("x,y\n1,2\n2,4\n3,6\n");
        let result = correlation(&ds, &Value::Null).unwrap();
        let matrix = result["matrix"].as_array().unwrap();
        let off_diag = matrix[0].as_array().unwrap()[1].as_f64().unwrap();
        assert!((off_diag - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_needs_two_numeric() {
        let ds = dataset("x,c\n1,a\n2,b\n");
        let err = correlation(&ds, &Value::Null).unwrap_err();
        assert!(matches!(err, ComputationError::NotEnoughNumericColumns(1)));
    }

    #[test]
    fn test_correlation_rejects_non_numeric_selection() {
        let ds = dataset("x,c\n1,a\n2,b\n");
        let err = correlation(&ds, &json!({"columns": ["x", "c"]})).unwrap_err();
        assert!(matches!(err, ComputationError::NotNumeric(name) if name == "c"));
    }

    #[test]
    fn test_distribution_numeric_bins() {
        let ds = dataset("x\n0\n1\n2\n3\n4\n5\n6\n7\n8\n9\n");
        let result = distribution(&ds, &json!({"column": "x"})).unwrap();
        assert_eq!(result["type"], "numeric");
        let bins = result["bins"].as_array().unwrap();
        assert_eq!(bins.len(), HISTOGRAM_BINS);
        let total: u64 = bins.iter().map(|b| b["count"].as_u64().unwrap()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_distribution_categorical() {
        let ds = dataset("c\nred\nblue\nred\n");
        let result = distribution(&ds, &json!({"column": "c"})).unwrap();
        assert_eq!(result["type"], "categorical");
        assert_eq!(result["frequencies"][0][0], "red");
        assert_eq!(result["frequencies"][0][1], 2);
    }

    #[test]
    fn test_distribution_unknown_column() {
        let ds = dataset("x\n1\n");
        let err = distribution(&ds, &json!({"column": "nope"})).unwrap_err();
        assert!(matches!(err, ComputationError::MissingColumn(name) if name == "nope"));
    }

    #[test]
    fn test_distribution_defaults_to_first_numeric() {
        let ds = dataset("c,x\na,1\nb,2\n");
        let result = distribution(&ds, &Value::Null).unwrap();
        assert_eq!(result["column"], "x");
    }

    #[test]
    fn test_stat_helpers() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138).abs() < 1e-3);
        assert_eq!(std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn test_pearson_constant_series_is_zero() {
        let a = vec![Some(1.0), Some(1.0), Some(1.0)];
        let b = vec![Some(1.0), Some(2.0), Some(3.0)];
        assert_eq!(pearson(&a, &b), 0.0);
    }
}
