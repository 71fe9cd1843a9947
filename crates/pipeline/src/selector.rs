//! Model selection

use tracing::{info, warn};

use crate::errors::{PipelineError, Result};
use crate::tuner::{GridResult, TuningReport};

/// Grid point with the lowest mean cross-entropy.
///
/// Ties keep the earliest point in enumeration order. Unbounded means rank
/// last and can never be selected.
pub fn select_best(report: &TuningReport) -> Result<&GridResult> {
    let mut best: Option<&GridResult> = None;
    for result in &report.results {
        if !result.mean.is_finite() {
            warn!(point = %result.point, score = %result.mean, "Skipping unbounded grid point");
            continue;
        }
        match best {
            // strict comparison keeps the first of equal scores
            Some(current) if result.mean.rank(&current.mean).is_lt() => best = Some(result),
            None => best = Some(result),
            _ => {}
        }
    }

    let best = best.ok_or_else(|| {
        if report.results.is_empty() {
            PipelineError::Selection("tuning produced no grid results".into())
        } else {
            PipelineError::Selection(format!(
                "all {} grid points have an unbounded cross-entropy",
                report.results.len()
            ))
        }
    })?;
    info!(point = %best.point, score = %best.mean, "Selected hyperparameters");
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::Score;
    use crate::tuner::GridPoint;

    fn report(entries: &[(f64, f64, Score)]) -> TuningReport {
        TuningReport {
            folds: 1,
            results: entries
                .iter()
                .map(|&(mcw, rel, mean)| GridResult {
                    point: GridPoint::new(mcw, rel),
                    fold_scores: vec![mean],
                    mean,
                })
                .collect(),
            models_trained: entries.len(),
        }
    }

    #[test]
    fn test_first_of_tied_minimum() {
        let report = report(&[
            (0.2, 0.2, Score::Finite(0.05)),
            (0.2, 0.5, Score::Finite(0.03)),
            (0.5, 0.2, Score::Finite(0.03)),
        ]);
        let best = select_best(&report).unwrap();
        assert_eq!(best.point, GridPoint::new(0.2, 0.5));
    }

    #[test]
    fn test_unbounded_ranks_last() {
        let report = report(&[
            (0.2, 0.2, Score::Unbounded { row: 0 }),
            (1.0, 1.0, Score::Finite(2.5)),
        ]);
        assert_eq!(select_best(&report).unwrap().point, GridPoint::new(1.0, 1.0));
    }

    #[test]
    fn test_all_unbounded_or_empty_fails() {
        let unbounded = report(&[(0.2, 0.2, Score::Unbounded { row: 4 })]);
        assert!(matches!(select_best(&unbounded), Err(PipelineError::Selection(_))));
        assert!(matches!(select_best(&report(&[])), Err(PipelineError::Selection(_))));
    }
}
