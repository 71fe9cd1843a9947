//! Predictor selection

use serde::Serialize;
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::table::Table;

/// Why a column was left out of the predictor set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Missing fraction strictly above the cutoff
    MostlyMissing { fraction: f64 },
    Identifier,
    Label,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedColumn {
    pub column: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Predictor columns in table order, plus every excluded column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSelection {
    pub predictors: Vec<String>,
    pub excluded: Vec<ExcludedColumn>,
}

impl FeatureSelection {
    pub fn count_excluded(&self, pred: impl Fn(&ExclusionReason) -> bool) -> usize {
        self.excluded.iter().filter(|e| pred(&e.reason)).count()
    }
}

/// Compute the predictor set from the training partition.
///
/// The label is checked first, then the identifier list, then the missing
/// fraction, so each excluded column carries exactly one reason.
pub fn select_predictors(
    training: &Table,
    label_column: &str,
    identifier_columns: &[String],
    missing_cutoff: f64,
) -> Result<FeatureSelection> {
    if !(0.0..=1.0).contains(&missing_cutoff) {
        return Err(PipelineError::InvalidConfig(format!(
            "missing cutoff must be in [0, 1], got {missing_cutoff}"
        )));
    }
    training.require_column(label_column)?;

    let mut predictors = Vec::new();
    let mut excluded = Vec::new();

    for (idx, column) in training.columns.iter().enumerate() {
        let reason = if column == label_column {
            Some(ExclusionReason::Label)
        } else if identifier_columns.iter().any(|id| id == column) {
            Some(ExclusionReason::Identifier)
        } else {
            let fraction = training.missing_fraction(idx);
            (fraction > missing_cutoff).then_some(ExclusionReason::MostlyMissing { fraction })
        };

        match reason {
            Some(reason) => {
                debug!(column = %column, ?reason, "Excluding column");
                excluded.push(ExcludedColumn {
                    column: column.clone(),
                    reason,
                });
            }
            None => predictors.push(column.clone()),
        }
    }

    Ok(FeatureSelection {
        predictors,
        excluded,
    })
}
