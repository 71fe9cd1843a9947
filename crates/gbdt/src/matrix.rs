//! Dense matrices exchanged with the booster
//!
//! Both matrices are row-major. Missing feature values are stored as `NaN`.

use serde::{Deserialize, Serialize};

use crate::errors::{GbdtError, Result};

/// Dense row-major feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
}

impl FeatureMatrix {
    /// Build from a flat row-major buffer
    pub fn new(n_rows: usize, n_cols: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != n_rows * n_cols {
            return Err(GbdtError::InvalidData(format!(
                "expected {} values for a {}x{} matrix, got {}",
                n_rows * n_cols,
                n_rows,
                n_cols,
                values.len()
            )));
        }
        Ok(Self {
            n_rows,
            n_cols,
            values,
        })
    }

    /// Build from nested rows; every row must have the same length
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * n_cols);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(GbdtError::InvalidData(format!(
                    "row {idx}: expected {n_cols} values, got {}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        Self::new(rows.len(), n_cols, values)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Borrow one row
    pub fn row(&self, idx: usize) -> &[f64] {
        let start = idx * self.n_cols;
        &self.values[start..start + self.n_cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n_cols + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows).map(move |idx| self.row(idx))
    }

    /// Copy the given rows, in the given order, into a new matrix
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.n_cols);
        for &idx in indices {
            values.extend_from_slice(self.row(idx));
        }
        Self {
            n_rows: indices.len(),
            n_cols: self.n_cols,
            values,
        }
    }
}

/// Per-row class probability distributions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMatrix {
    n_rows: usize,
    n_classes: usize,
    values: Vec<f64>,
}

impl ProbabilityMatrix {
    pub fn new(n_rows: usize, n_classes: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != n_rows * n_classes {
            return Err(GbdtError::InvalidData(format!(
                "expected {} probabilities for {} rows x {} classes, got {}",
                n_rows * n_classes,
                n_rows,
                n_classes,
                values.len()
            )));
        }
        Ok(Self {
            n_rows,
            n_classes,
            values,
        })
    }

    pub fn from_rows(rows: Vec<Vec<f64>>, n_classes: usize) -> Result<Self> {
        let n_rows = rows.len();
        let values: Vec<f64> = rows.into_iter().flatten().collect();
        Self::new(n_rows, n_classes, values)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        let start = idx * self.n_classes;
        &self.values[start..start + self.n_classes]
    }

    pub fn get(&self, row: usize, class: usize) -> f64 {
        self.values[row * self.n_classes + class]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows).map(move |idx| self.row(idx))
    }

    /// Most probable class per row; the lowest index wins ties
    pub fn argmax(&self) -> Vec<usize> {
        self.rows()
            .map(|row| {
                let mut best_idx = 0usize;
                let mut best_val = f64::NEG_INFINITY;
                for (idx, &p) in row.iter().enumerate() {
                    if p > best_val {
                        best_val = p;
                        best_idx = idx;
                    }
                }
                best_idx
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_and_select() {
        let matrix =
            FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.n_cols(), 2);
        assert_eq!(matrix.get(1, 1), 4.0);

        let picked = matrix.select_rows(&[2, 0]);
        assert_eq!(picked.row(0), &[5.0, 6.0]);
        assert_eq!(picked.row(1), &[1.0, 2.0]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, GbdtError::InvalidData(_)));
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        let proba =
            ProbabilityMatrix::from_rows(vec![vec![0.4, 0.4, 0.2], vec![0.1, 0.2, 0.7]], 3)
                .unwrap();
        assert_eq!(proba.argmax(), vec![0, 2]);
    }
}
