//! Cross-entropy scoring
//!
//! `score = -(1/n) * sum(log2(P[row, label[row]]))`, in bits. A row whose
//! true-class probability is zero (or not a finite number) has no finite
//! contribution; the score then becomes [`Score::Unbounded`] instead of an
//! infinity or NaN that would silently poison averaging.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use wle_gbdt::ProbabilityMatrix;

use crate::errors::{PipelineError, Result};

/// Mean cross-entropy in bits, or the unbounded sentinel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Finite(f64),
    /// `row` is the first row whose true-class probability was zero
    Unbounded { row: usize },
}

impl Score {
    pub fn is_finite(&self) -> bool {
        matches!(self, Score::Finite(_))
    }

    pub fn bits(&self) -> Option<f64> {
        match self {
            Score::Finite(bits) => Some(*bits),
            Score::Unbounded { .. } => None,
        }
    }

    /// Numeric view; the sentinel maps to positive infinity
    pub fn value(&self) -> f64 {
        self.bits().unwrap_or(f64::INFINITY)
    }

    /// Lower is better; every finite score ranks before the sentinel
    pub fn rank(&self, other: &Score) -> Ordering {
        match (self, other) {
            (Score::Finite(a), Score::Finite(b)) => a.total_cmp(b),
            (Score::Finite(_), Score::Unbounded { .. }) => Ordering::Less,
            (Score::Unbounded { .. }, Score::Finite(_)) => Ordering::Greater,
            (Score::Unbounded { .. }, Score::Unbounded { .. }) => Ordering::Equal,
        }
    }

    /// Arithmetic mean; any unbounded input makes the mean unbounded
    pub fn mean(scores: &[Score]) -> Option<Score> {
        if scores.is_empty() {
            return None;
        }
        if let Some(unbounded) = scores.iter().find(|s| !s.is_finite()) {
            return Some(*unbounded);
        }
        let total: f64 = scores.iter().filter_map(Score::bits).sum();
        Some(Score::Finite(total / scores.len() as f64))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Finite(bits) => write!(f, "{bits:.5}"),
            Score::Unbounded { row } => write!(f, "unbounded (row {row})"),
        }
    }
}

/// Mean base-2 cross-entropy of the true-class probabilities.
///
/// With a `floor`, probabilities are clamped to `[floor, 1]` first and the
/// result is always finite.
pub fn cross_entropy(
    proba: &ProbabilityMatrix,
    labels: &[usize],
    floor: Option<f64>,
) -> Result<Score> {
    if labels.is_empty() {
        return Err(PipelineError::Scoring("cannot score zero rows".into()));
    }
    if proba.n_rows() != labels.len() {
        return Err(PipelineError::Scoring(format!(
            "{} probability rows for {} labels",
            proba.n_rows(),
            labels.len()
        )));
    }

    let mut total = 0.0;
    for (row, &label) in labels.iter().enumerate() {
        if label >= proba.n_classes() {
            return Err(PipelineError::Scoring(format!(
                "row {row}: label {label} outside {} classes",
                proba.n_classes()
            )));
        }
        let mut p = proba.get(row, label);
        if let Some(floor) = floor {
            p = if p.is_nan() { floor } else { p.clamp(floor, 1.0) };
        }
        if !(p > 0.0 && p.is_finite()) {
            return Ok(Score::Unbounded { row });
        }
        total -= p.log2();
    }
    Ok(Score::Finite(total / labels.len() as f64))
}
