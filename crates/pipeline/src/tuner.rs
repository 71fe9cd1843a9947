//! Cross-validated grid search over (min_child_weight, lambda_relative)
//!
//! Every (fold, grid point) pair is an independent training job. Jobs run on
//! a dedicated rayon pool, each on its own copy of the held-in and held-out
//! rows, and report a score keyed by (fold, grid index). Scores are
//! aggregated only after every job has finished; one failing job fails the
//! whole search.

use std::fmt;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};
use wle_gbdt::{BoostParams, Booster, FeatureMatrix, Objective};

use crate::config::TuningConfig;
use crate::errors::{PipelineError, Result};
use crate::partition::{stratified_folds, FoldAssignment};
use crate::scoring::{cross_entropy, Score};

/// One hyperparameter combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridPoint {
    pub min_child_weight: f64,
    pub lambda_relative: f64,
}

impl GridPoint {
    pub fn new(min_child_weight: f64, lambda_relative: f64) -> Self {
        Self {
            min_child_weight,
            lambda_relative,
        }
    }

    /// L2 penalty, always derived from the stored pair
    pub fn lambda(&self) -> f64 {
        self.lambda_relative * self.min_child_weight
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min_child_weight={} lambda_relative={} (lambda={})",
            self.min_child_weight,
            self.lambda_relative,
            self.lambda()
        )
    }
}

/// Cartesian grid, min_child_weight in the outer loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HyperGrid {
    pub min_child_weight: Vec<f64>,
    pub lambda_relative: Vec<f64>,
}

impl HyperGrid {
    pub fn new(min_child_weight: Vec<f64>, lambda_relative: Vec<f64>) -> Self {
        Self {
            min_child_weight,
            lambda_relative,
        }
    }

    pub fn from_config(config: &TuningConfig) -> Self {
        Self::new(config.min_child_weight.clone(), config.lambda_relative.clone())
    }

    pub fn len(&self) -> usize {
        self.min_child_weight.len() * self.lambda_relative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points in enumeration order
    pub fn points(&self) -> Vec<GridPoint> {
        self.min_child_weight
            .iter()
            .flat_map(|&mcw| {
                self.lambda_relative
                    .iter()
                    .map(move |&rel| GridPoint::new(mcw, rel))
            })
            .collect()
    }
}

/// Scores of one grid point across all folds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridResult {
    pub point: GridPoint,
    pub fold_scores: Vec<Score>,
    pub mean: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReport {
    pub folds: usize,
    /// One entry per grid point, in enumeration order
    pub results: Vec<GridResult>,
    pub models_trained: usize,
}

impl fmt::Display for TuningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>16} {:>16} {:>10} {:>22}",
            "min_child_weight", "lambda_relative", "lambda", "mean cross-entropy"
        )?;
        for result in &self.results {
            writeln!(
                f,
                "{:>16} {:>16} {:>10} {:>22}",
                result.point.min_child_weight,
                result.point.lambda_relative,
                result.point.lambda(),
                result.mean.to_string()
            )?;
        }
        write!(f, "{} models trained over {} folds", self.models_trained, self.folds)
    }
}

/// Held-in and held-out data of one fold
struct FoldData {
    train_x: FeatureMatrix,
    train_y: Vec<usize>,
    test_x: FeatureMatrix,
    test_y: Vec<usize>,
}

/// Runs the k-fold grid search with a given booster
pub struct Tuner<'a, B: Booster> {
    booster: &'a B,
    config: &'a TuningConfig,
    num_class: usize,
    seed: u64,
    probability_floor: Option<f64>,
}

impl<'a, B: Booster> Tuner<'a, B> {
    pub fn new(booster: &'a B, config: &'a TuningConfig, num_class: usize, seed: u64) -> Self {
        Self {
            booster,
            config,
            num_class,
            seed,
            probability_floor: None,
        }
    }

    pub fn with_probability_floor(mut self, floor: Option<f64>) -> Self {
        self.probability_floor = floor;
        self
    }

    /// Booster settings for one job; `seed + fold` keeps results
    /// independent of job scheduling
    pub fn params_for(&self, point: &GridPoint, fold: usize) -> BoostParams {
        BoostParams {
            rounds: self.config.rounds,
            learning_rate: self.config.learning_rate,
            max_depth: self.config.max_depth,
            min_child_weight: point.min_child_weight,
            lambda: point.lambda(),
            gamma: 0.0,
            subsample: self.config.subsample,
            num_class: self.num_class,
            seed: self.seed.wrapping_add(fold as u64),
            objective: Objective::MultiSoftprob,
        }
    }

    pub fn run(&self, features: &FeatureMatrix, labels: &[usize]) -> Result<TuningReport> {
        let grid = HyperGrid::from_config(self.config);
        if grid.is_empty() {
            return Err(PipelineError::InvalidConfig("tuning grid is empty".into()));
        }
        if features.n_rows() != labels.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} feature rows for {} labels",
                features.n_rows(),
                labels.len()
            )));
        }

        let k = self.config.folds;
        let assignment = stratified_folds(labels, k, self.seed)?;
        let folds = self.prepare_folds(&assignment, features, labels)?;
        let points = grid.points();

        let jobs: Vec<(usize, usize)> = (0..k)
            .flat_map(|fold| (0..points.len()).map(move |g| (fold, g)))
            .collect();
        info!(
            "Tuning {} grid points over {} folds ({} models)",
            points.len(),
            k,
            jobs.len()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;

        let scores: Vec<((usize, usize), Score)> = pool.install(|| {
            jobs.par_iter()
                .map(|&(fold, g)| -> Result<((usize, usize), Score)> {
                    let data = &folds[fold];
                    let point = &points[g];
                    let params = self.params_for(point, fold);
                    let model = self.booster.train(&data.train_x, &data.train_y, &params)?;
                    let proba = self.booster.predict(&model, &data.test_x)?;
                    let score = cross_entropy(&proba, &data.test_y, self.probability_floor)?;
                    debug!(fold, %point, %score, "Fold scored");
                    Ok(((fold, g), score))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut fold_scores = vec![Vec::with_capacity(k); points.len()];
        let mut ordered = scores;
        ordered.sort_by_key(|&(key, _)| key);
        for ((_, g), score) in ordered {
            fold_scores[g].push(score);
        }

        let results = points
            .into_iter()
            .zip(fold_scores)
            .map(|(point, fold_scores)| {
                let mean = Score::mean(&fold_scores).ok_or_else(|| {
                    PipelineError::Selection(format!("no fold scores for {point}"))
                })?;
                Ok(GridResult {
                    point,
                    fold_scores,
                    mean,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TuningReport {
            folds: k,
            results,
            models_trained: jobs.len(),
        })
    }

    /// Materialise every fold and reject degenerate ones before training
    fn prepare_folds(
        &self,
        assignment: &FoldAssignment,
        features: &FeatureMatrix,
        labels: &[usize],
    ) -> Result<Vec<FoldData>> {
        let mut present = vec![false; self.num_class];
        for &label in labels {
            if label >= self.num_class {
                return Err(PipelineError::InvalidConfig(format!(
                    "label {label} outside {} classes",
                    self.num_class
                )));
            }
            present[label] = true;
        }

        (0..assignment.k())
            .map(|fold| {
                let held_out = assignment.held_out(fold);
                if held_out.is_empty() {
                    return Err(PipelineError::DegenerateFold {
                        fold,
                        reason: "held-out set is empty".into(),
                    });
                }
                let held_in = assignment.held_in(fold);
                let train_y: Vec<usize> = held_in.iter().map(|&r| labels[r]).collect();

                let mut seen = vec![false; self.num_class];
                for &label in &train_y {
                    seen[label] = true;
                }
                if let Some(class) = (0..self.num_class).find(|&c| present[c] && !seen[c]) {
                    return Err(PipelineError::DegenerateFold {
                        fold,
                        reason: format!("held-in set has no rows of class {class}"),
                    });
                }

                Ok(FoldData {
                    train_x: features.select_rows(&held_in),
                    train_y,
                    test_x: features.select_rows(held_out),
                    test_y: held_out.iter().map(|&r| labels[r]).collect(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wle_gbdt::GbdtTrainer;

    fn small_config() -> TuningConfig {
        TuningConfig {
            folds: 3,
            min_child_weight: vec![0.5, 1.0],
            lambda_relative: vec![0.5, 2.0],
            rounds: 5,
            learning_rate: 0.3,
            subsample: 0.5,
            max_depth: 2,
            threads: 2,
        }
    }

    fn dataset() -> (FeatureMatrix, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let class = i % 3;
            rows.push(vec![class as f64 * 3.0 + (i as f64 * 0.37).sin(), i as f64]);
            labels.push(class);
        }
        (FeatureMatrix::from_rows(&rows).unwrap(), labels)
    }

    #[test]
    fn test_grid_order_and_lambda() {
        let grid = HyperGrid::new(vec![0.2, 5.0], vec![0.5, 2.0]);
        let points = grid.points();
        assert_eq!(
            points,
            vec![
                GridPoint::new(0.2, 0.5),
                GridPoint::new(0.2, 2.0),
                GridPoint::new(5.0, 0.5),
                GridPoint::new(5.0, 2.0),
            ]
        );
        assert_eq!(points[3].lambda(), 10.0);
    }

    #[test]
    fn test_run_scores_every_point() {
        let (x, y) = dataset();
        let config = small_config();
        let trainer = GbdtTrainer::new();
        let report = Tuner::new(&trainer, &config, 3, 11).run(&x, &y).unwrap();

        assert_eq!(report.models_trained, 12);
        assert_eq!(report.results.len(), 4);
        for result in &report.results {
            assert_eq!(result.fold_scores.len(), 3);
            assert!(result.mean.is_finite());
        }
    }

    #[test]
    fn test_run_is_independent_of_thread_count() {
        let (x, y) = dataset();
        let trainer = GbdtTrainer::new();
        let one = TuningConfig {
            threads: 1,
            ..small_config()
        };
        let four = TuningConfig {
            threads: 4,
            ..small_config()
        };
        let a = Tuner::new(&trainer, &one, 3, 11).run(&x, &y).unwrap();
        let b = Tuner::new(&trainer, &four, 3, 11).run(&x, &y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_degenerate_fold_detected() {
        // Class 2 has a single row, so the fold holding it leaves the
        // held-in side without that class
        let (x, mut y) = dataset();
        for label in y.iter_mut() {
            if *label == 2 {
                *label = 0;
            }
        }
        y[0] = 2;
        let config = small_config();
        let trainer = GbdtTrainer::new();
        let err = Tuner::new(&trainer, &config, 3, 1).run(&x, &y).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateFold { .. }));
    }

    #[test]
    fn test_params_for_job() {
        let config = small_config();
        let trainer = GbdtTrainer::new();
        let tuner = Tuner::new(&trainer, &config, 5, 100);
        let params = tuner.params_for(&GridPoint::new(2.0, 0.5), 3);

        assert_eq!(params.lambda, 1.0);
        assert_eq!(params.min_child_weight, 2.0);
        assert_eq!(params.seed, 103);
        assert_eq!(params.subsample, 0.5);
        assert_eq!(params.num_class, 5);
    }
}
