//! Feature engineering: from raw columns to a numeric design matrix.
//!
//! Numeric columns are mean-imputed and standardized; boolean columns map to
//! 0/1; categorical columns are one-hot encoded while their cardinality stays
//! small. The same builder feeds both the `feature_engineering` step payload
//! and the training stage, so the two always agree on the design matrix.

use ndarray::Array2;
use serde_json::{json, Value};

use crate::dataset::{ColumnType, Dataset};
use crate::planner::StepName;

use super::eda::{mean, std_dev};
use super::ComputationError;

/// One-hot encoding is skipped above this cardinality.
const MAX_ONE_HOT: usize = 10;

/// A design matrix with its column names.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Engineered feature names, matrix column order.
    pub names: Vec<String>,
    /// Row-major matrix, one row per kept dataset row.
    pub matrix: Array2<f64>,
    /// Dataset row indices behind each matrix row.
    pub row_indices: Vec<usize>,
    /// Source columns skipped (name, reason).
    pub skipped: Vec<(String, String)>,
}

/// Builds the design matrix for all columns except `exclude`, keeping only
/// the rows listed in `rows`.
pub fn build_matrix(dataset: &Dataset, exclude: Option<&str>, rows: &[usize]) -> FeatureMatrix {
    let mut names: Vec<String> = Vec::new();
    let mut columns_data: Vec<Vec<f64>> = Vec::new();
    let mut skipped: Vec<(String, String)> = Vec::new();

    for column in &dataset.columns {
        if Some(column.name.as_str()) == exclude {
            continue;
        }

        match column.ty {
            ColumnType::Numeric => {
                let cells = column.numeric_cells();
                let present: Vec<f64> = rows.iter().filter_map(|&r| cells[r]).collect();
                if present.is_empty() {
                    skipped.push((column.name.clone(), "all values missing".to_string()));
                    continue;
                }
                let m = mean(&present);
                let s = std_dev(&present);
                let values: Vec<f64> = rows
                    .iter()
                    .map(|&r| {
                        let v = cells[r].unwrap_or(m);
                        if s > 0.0 {
                            (v - m) / s
                        } else {
                            0.0
                        }
                    })
                    .collect();
                names.push(format!("{}_std", column.name));
                columns_data.push(values);
            }
            ColumnType::Boolean => {
                let values: Vec<f64> = rows
                    .iter()
                    .map(|&r| match column.cells[r].as_deref() {
                        Some(v) if v.eq_ignore_ascii_case("true") => 1.0,
                        Some(_) => 0.0,
                        None => 0.5,
                    })
                    .collect();
                names.push(format!("{}_flag", column.name));
                columns_data.push(values);
            }
            ColumnType::Categorical => {
                let levels = column.distinct_values();
                if levels.len() > MAX_ONE_HOT {
                    skipped.push((
                        column.name.clone(),
                        format!("cardinality {} exceeds {}", levels.len(), MAX_ONE_HOT),
                    ));
                    continue;
                }
                if levels.is_empty() {
                    skipped.push((column.name.clone(), "all values missing".to_string()));
                    continue;
                }
                for level in &levels {
                    let values: Vec<f64> = rows
                        .iter()
                        .map(|&r| {
                            if column.cells[r].as_deref() == Some(level.as_str()) {
                                1.0
                            } else {
                                0.0
                            }
                        })
                        .collect();
                    names.push(format!("{}={}", column.name, level));
                    columns_data.push(values);
                }
            }
        }
    }

    let n_rows = rows.len();
    let n_cols = names.len();
    let mut matrix = Array2::zeros((n_rows, n_cols));
    for (c, values) in columns_data.iter().enumerate() {
        for (r, v) in values.iter().enumerate() {
            matrix[[r, c]] = *v;
        }
    }

    FeatureMatrix {
        names,
        matrix,
        row_indices: rows.to_vec(),
        skipped,
    }
}

/// `feature_engineering` step: report the engineered design matrix.
///
/// Params: `{"target": name}` excludes the target column. The payload is a
/// report; the training stage rebuilds the same matrix from the dataset.
pub fn engineer(dataset: &Dataset, params: &Value) -> Result<Value, ComputationError> {
    let target = params.get("target").and_then(Value::as_str);

    if let Some(name) = target {
        if dataset.column(name).is_none() {
            return Err(ComputationError::MissingColumn(name.to_string()));
        }
    }

    let rows: Vec<usize> = (0..dataset.n_rows).collect();
    let built = build_matrix(dataset, target, &rows);

    if built.names.is_empty() {
        return Err(ComputationError::InvalidParams {
            step: StepName::FeatureEngineering,
            message: "no usable feature columns".to_string(),
        });
    }

    Ok(json!({
        "target": target,
        "n_rows": built.matrix.nrows(),
        "n_features": built.names.len(),
        "features": built.names,
        "skipped": built.skipped
            .iter()
            .map(|(name, reason)| json!({ "column": name, "reason": reason }))
            .collect::<Vec<_>>(),
    }))
}
