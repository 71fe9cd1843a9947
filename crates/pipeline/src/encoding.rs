//! Table to matrix encoding
//!
//! Labels become class indices in a fixed order. Predictor columns are
//! fitted on the training partition and applied unchanged to every other
//! table: numeric columns pass through, text columns become ordinal codes of
//! their sorted training levels. Missing cells and unseen levels become `NaN`.

use serde::Serialize;
use wle_gbdt::FeatureMatrix;

use crate::errors::{PipelineError, Result};
use crate::table::{Table, Value};

/// Ordered class names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSet {
    names: Vec<String>,
}

impl ClassSet {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.len() < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "at least two classes are required, got {}",
                names.len()
            )));
        }
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != names.len() {
            return Err(PipelineError::InvalidConfig("duplicate class names".into()));
        }
        Ok(Self { names })
    }

    /// The configured order, or the sorted distinct labels when none is given
    pub fn resolve(configured: &[String], labels: &[String]) -> Result<Self> {
        if !configured.is_empty() {
            return Self::new(configured.to_vec());
        }
        let mut names = labels.to_vec();
        names.sort();
        names.dedup();
        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.names.iter().position(|n| n == label)
    }

    pub fn encode(&self, labels: &[String]) -> Result<Vec<usize>> {
        labels
            .iter()
            .enumerate()
            .map(|(row, label)| {
                self.index_of(label).ok_or_else(|| PipelineError::UnknownLabel {
                    row,
                    label: label.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ColumnEncoding {
    Numeric,
    Categorical { levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct EncodedColumn {
    name: String,
    encoding: ColumnEncoding,
}

/// Predictor encoding fitted on the training partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureEncoder {
    columns: Vec<EncodedColumn>,
}

impl FeatureEncoder {
    pub fn fit(training: &Table, predictors: &[String]) -> Result<Self> {
        let columns = predictors
            .iter()
            .map(|name| {
                let idx = training.require_column(name)?;
                let has_text = training
                    .column_values(idx)
                    .any(|v| matches!(v, Value::Text(_)));
                let encoding = if has_text {
                    let mut levels: Vec<String> = training
                        .column_values(idx)
                        .filter(|v| !v.is_missing())
                        .map(Value::to_string)
                        .collect();
                    levels.sort();
                    levels.dedup();
                    ColumnEncoding::Categorical { levels }
                } else {
                    ColumnEncoding::Numeric
                };
                Ok(EncodedColumn {
                    name: name.clone(),
                    encoding,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Names of the columns encoded as categorical
    pub fn categorical_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| matches!(c.encoding, ColumnEncoding::Categorical { .. }))
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn transform(&self, table: &Table) -> Result<FeatureMatrix> {
        let indices = self
            .columns
            .iter()
            .map(|c| table.require_column(&c.name))
            .collect::<Result<Vec<_>>>()?;

        let mut values = Vec::with_capacity(table.len() * self.columns.len());
        for row in &table.rows {
            for (column, &idx) in self.columns.iter().zip(&indices) {
                values.push(column.encode(&row[idx]));
            }
        }
        Ok(FeatureMatrix::new(table.len(), self.columns.len(), values)?)
    }
}

impl EncodedColumn {
    fn encode(&self, value: &Value) -> f64 {
        match (&self.encoding, value) {
            (_, Value::Missing) => f64::NAN,
            (ColumnEncoding::Numeric, Value::Number(v)) => *v,
            (ColumnEncoding::Numeric, Value::Text(_)) => f64::NAN,
            (ColumnEncoding::Categorical { levels }, other) => levels
                .binary_search(&other.to_string())
                .map(|code| code as f64)
                .unwrap_or(f64::NAN),
        }
    }
}
