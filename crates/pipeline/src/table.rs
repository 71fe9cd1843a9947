//! Observation tables and delimited-file loading
//!
//! Every cell is parsed once at load time into a [`Value`]: empty cells and
//! configured missing tokens become `Missing`, finite numbers become `Number`, anything
//! else stays `Text`.

use std::fmt;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::errors::{PipelineError, Result};

/// Name given to columns with a blank header (the unnamed row-number column)
pub const BLANK_HEADER_NAME: &str = "X";

/// A single parsed cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Parse raw cell text against the missing-token list.
    /// An empty cell is always missing.
    pub fn parse(raw: &str, missing_tokens: &[String]) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || missing_tokens.iter().any(|token| token == raw) {
            return Value::Missing;
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Number(v),
            Ok(_) => Value::Missing,
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Missing => f.write_str("NA"),
        }
    }
}

/// Ordered rows sharing one column schema
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, checking every row against the header width
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(PipelineError::Schema {
                table: name,
                message: format!(
                    "row {idx} has {} values, header has {}",
                    row.len(),
                    columns.len()
                ),
            });
        }
        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    /// Load a table from a delimited file with a header row
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        name: impl Into<String>,
        missing_tokens: &[String],
    ) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, name, missing_tokens)
    }

    /// Load a table from any reader producing comma-delimited text
    pub fn from_reader<R: Read>(
        reader: R,
        name: impl Into<String>,
        missing_tokens: &[String],
    ) -> Result<Self> {
        let name = name.into();
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|header| {
                if header.is_empty() {
                    BLANK_HEADER_NAME.to_string()
                } else {
                    header.to_string()
                }
            })
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|cell| Value::parse(cell, missing_tokens))
                    .collect(),
            );
        }

        if rows.is_empty() {
            return Err(PipelineError::Schema {
                table: name,
                message: "table has no rows".to_string(),
            });
        }

        debug!(table = %name, rows = rows.len(), columns = columns.len(), "Loaded table");
        Self::new(name, columns, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Column index or a schema error naming this table
    pub fn require_column(&self, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| PipelineError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Fraction of rows whose value in the column is missing
    pub fn missing_fraction(&self, idx: usize) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let missing = self.column_values(idx).filter(|v| v.is_missing()).count();
        missing as f64 / self.rows.len() as f64
    }

    /// Copy the given rows into a new table with the same schema
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: indices.iter().map(|&idx| self.rows[idx].clone()).collect(),
        }
    }

    /// Text form of every value in a column; missing values are an error
    pub fn required_text_column(&self, column: &str) -> Result<Vec<String>> {
        let idx = self.require_column(column)?;
        self.column_values(idx)
            .enumerate()
            .map(|(row, value)| match value {
                Value::Missing => Err(PipelineError::Schema {
                    table: self.name.clone(),
                    message: format!("row {row}: missing value in column '{column}'"),
                }),
                other => Ok(other.to_string()),
            })
            .collect()
    }
}
