//! In-memory tabular datasets.
//!
//! A [`Dataset`] is loaded once per run, wrapped in an `Arc`, and shared
//! read-only across all analysis steps. Loading parses CSV (quote-aware,
//! multiline fields supported), infers a type per column, and records missing
//! cells. [`DatasetDescriptor`] is the cheap summary handed to the planner
//! and to LLM prompts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::DatasetError;

/// Cell tokens treated as missing, compared case-insensitively.
const MISSING_TOKENS: &[&str] = &["", "na", "n/a", "null", "nan"];

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Every non-missing cell parses as a float.
    Numeric,
    /// Every non-missing cell is "true" or "false" (case-insensitive).
    Boolean,
    /// Anything else.
    Categorical,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Numeric => write!(f, "numeric"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Categorical => write!(f, "categorical"),
        }
    }
}

/// A single named column with raw cells.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name from the header.
    pub name: String,
    /// Inferred type.
    pub ty: ColumnType,
    /// Raw cells; `None` marks a missing value.
    pub cells: Vec<Option<String>>,
}

impl Column {
    /// Number of missing cells.
    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Non-missing cells parsed as floats, aligned with row indices.
    ///
    /// Cells that fail to parse come back as `None`; for a `Numeric` column
    /// only missing cells do.
    pub fn numeric_cells(&self) -> Vec<Option<f64>> {
        self.cells
            .iter()
            .map(|c| c.as_deref().and_then(|s| s.parse::<f64>().ok()))
            .collect()
    }

    /// Distinct non-missing values, in first-seen order.
    pub fn distinct_values(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for cell in self.cells.iter().flatten() {
            if seen.insert(cell.clone()) {
                out.push(cell.clone());
            }
        }
        out
    }
}

/// A loaded, immutable tabular dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Source path, for diagnostics.
    pub path: String,
    /// Columns in header order.
    pub columns: Vec<Column>,
    /// Number of data rows.
    pub n_rows: usize,
}

impl Dataset {
    /// Loads a dataset from a CSV file.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError` if the file is missing, empty, ragged, or has
    /// a malformed header.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        if !path.exists() {
            return Err(DatasetError::NotFound(display));
        }

        let text = std::fs::read_to_string(path)?;
        Self::from_csv_str(&text, &display)
    }

    /// Parses a dataset from CSV text. `source` labels error messages.
    pub fn from_csv_str(text: &str, source: &str) -> Result<Self, DatasetError> {
        let records = parse_csv(text)?;
        let mut records = records.into_iter();

        let header = records.next().ok_or_else(|| {
            DatasetError::Empty(source.to_string())
        })?;

        let mut names: Vec<String> = Vec::with_capacity(header.fields.len());
        for field in &header.fields {
            let name = field.clone().unwrap_or_default();
            if names.contains(&name) {
                return Err(DatasetError::DuplicateColumn(name));
            }
            names.push(name);
        }

        let n_cols = names.len();
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); n_cols];
        let mut n_rows = 0usize;

        for record in records {
            // A completely blank line is padding, not a row, unless the
            // dataset has a single column (where it is a missing value).
            if n_cols > 1 && record.fields.len() == 1 && record.fields[0].is_none() {
                continue;
            }
            if record.fields.len() != n_cols {
                return Err(DatasetError::RaggedRow {
                    line: record.line,
                    expected: n_cols,
                    found: record.fields.len(),
                });
            }
            for (col, field) in record.fields.into_iter().enumerate() {
                cells[col].push(field);
            }
            n_rows += 1;
        }

        if n_rows == 0 {
            return Err(DatasetError::NoRows(source.to_string()));
        }

        let columns = names
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| {
                let ty = infer_type(&cells);
                Column { name, ty, cells }
            })
            .collect();

        Ok(Self {
            path: source.to_string(),
            columns,
            n_rows,
        })
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns of a given type, in header order.
    pub fn columns_of_type(&self, ty: ColumnType) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.ty == ty).collect()
    }

    /// Builds the descriptor summary for this dataset.
    pub fn descriptor(&self) -> DatasetDescriptor {
        DatasetDescriptor {
            path: self.path.clone(),
            n_rows: self.n_rows,
            columns: self
                .columns
                .iter()
                .map(|c| ColumnDescriptor {
                    name: c.name.clone(),
                    ty: c.ty,
                    missing: c.missing_count(),
                })
                .collect(),
        }
    }
}

/// Summary of one column for planning and prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Inferred type.
    pub ty: ColumnType,
    /// Number of missing cells.
    pub missing: usize,
}

/// Cheap, serializable summary of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Source path.
    pub path: String,
    /// Number of data rows.
    pub n_rows: usize,
    /// Column summaries in header order.
    pub columns: Vec<ColumnDescriptor>,
}

impl DatasetDescriptor {
    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Renders a human-readable table of the descriptor.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{}: {} rows x {} columns\n",
            self.path,
            self.n_rows,
            self.columns.len()
        );
        for col in &self.columns {
            out.push_str(&format!(
                "  {:<24} {:<12} missing: {}\n",
                col.name, col.ty, col.missing
            ));
        }
        out
    }
}

/// One parsed CSV record with the line it started on.
struct Record {
    line: usize,
    fields: Vec<Option<String>>,
}

/// Parses CSV text into records.
///
/// Handles quoted fields (commas and newlines inside quotes, `""` escapes)
/// and both LF and CRLF line endings. Missing-value tokens become `None`.
fn parse_csv(text: &str) -> Result<Vec<Record>, DatasetError> {
    let mut records = Vec::new();
    let mut fields: Vec<Option<String>> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quote_start_line = 0usize;
    let mut line = 1usize;
    let mut record_line = 1usize;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => {
                in_quotes = true;
                quote_start_line = line;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(&mut field));
            }
            '\r' if !in_quotes => {
                // consumed with the following '\n'
            }
            '\n' if !in_quotes => {
                line += 1;
                fields.push(finish_field(&mut field));
                records.push(Record {
                    line: record_line,
                    fields: std::mem::take(&mut fields),
                });
                record_line = line;
            }
            '\n' => {
                line += 1;
                field.push('\n');
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(DatasetError::UnterminatedQuote {
            line: quote_start_line,
        });
    }

    // Final record without a trailing newline.
    if !field.is_empty() || !fields.is_empty() {
        fields.push(finish_field(&mut field));
        records.push(Record {
            line: record_line,
            fields,
        });
    }

    Ok(records)
}

/// Takes the accumulated field text, mapping missing tokens to `None`.
fn finish_field(field: &mut String) -> Option<String> {
    let value = std::mem::take(field);
    let trimmed = value.trim();
    if MISSING_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Infers the type of a column from its cells.
///
/// All-missing columns are categorical; type checks consider non-missing
/// cells only.
fn infer_type(cells: &[Option<String>]) -> ColumnType {
    let mut any = false;
    let mut all_numeric = true;
    let mut all_boolean = true;

    for cell in cells.iter().flatten() {
        any = true;
        if cell.parse::<f64>().is_err() {
            all_numeric = false;
        }
        if !cell.eq_ignore_ascii_case("true") && !cell.eq_ignore_ascii_case("false") {
            all_boolean = false;
        }
        if !all_numeric && !all_boolean {
            break;
        }
    }

    if !any {
        ColumnType::Categorical
    } else if all_boolean {
        ColumnType::Boolean
    } else if all_numeric {
        ColumnType::Numeric
    } else {
        ColumnType::Categorical
    }
}
