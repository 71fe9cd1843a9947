//! Gradient Boosted Decision Tree (GBDT) trainer
//!
//! Multiclass boosting on the softmax (multinomial log-loss) objective.
//! Each round fits one tree per class to the per-class gradients, on a
//! Bernoulli row subsample drawn from the seeded RNG.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::booster::Booster;
use crate::cart::{CartBuilder, SortedColumns, TreeConfig};
use crate::deterministic::{softmax_into, stream_rng};
use crate::errors::{GbdtError, Result};
use crate::matrix::{FeatureMatrix, ProbabilityMatrix};
use crate::model::{Model, MODEL_VERSION};

/// Lower bound on per-row hessians
const MIN_HESSIAN: f64 = 1e-16;

/// Loss objective
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Multinomial log-loss, outputs per-class probabilities
    #[default]
    MultiSoftprob,
}

/// Boosting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    /// Number of boosting rounds
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub lambda: f64,
    /// Minimum split loss
    pub gamma: f64,
    /// Fraction of rows sampled per round
    pub subsample: f64,
    pub num_class: usize,
    pub seed: u64,
    pub objective: Objective,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            rounds: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
            gamma: 0.0,
            subsample: 1.0,
            num_class: 2,
            seed: 0,
            objective: Objective::MultiSoftprob,
        }
    }
}

impl BoostParams {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(GbdtError::InvalidParameters(msg));
        if self.rounds == 0 {
            return fail("rounds must be positive".into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.max_depth == 0 {
            return fail("max_depth must be positive".into());
        }
        if !(self.min_child_weight >= 0.0 && self.min_child_weight.is_finite()) {
            return fail(format!(
                "min_child_weight must be non-negative, got {}",
                self.min_child_weight
            ));
        }
        if !(self.lambda >= 0.0 && self.lambda.is_finite()) {
            return fail(format!("lambda must be non-negative, got {}", self.lambda));
        }
        if !(self.gamma >= 0.0 && self.gamma.is_finite()) {
            return fail(format!("gamma must be non-negative, got {}", self.gamma));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return fail(format!("subsample must be in (0, 1], got {}", self.subsample));
        }
        if self.num_class < 2 {
            return fail(format!("num_class must be at least 2, got {}", self.num_class));
        }
        Ok(())
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_child_weight: self.min_child_weight,
            lambda: self.lambda,
            gamma: self.gamma,
            learning_rate: self.learning_rate,
        }
    }
}

/// GBDT trainer
#[derive(Debug, Clone, Copy, Default)]
pub struct GbdtTrainer;

impl GbdtTrainer {
    pub fn new() -> Self {
        Self
    }

    /// Train a multiclass model on the given matrix and class indices
    pub fn fit(
        &self,
        features: &FeatureMatrix,
        labels: &[usize],
        params: &BoostParams,
    ) -> Result<Model> {
        params.validate()?;
        let n = features.n_rows();
        let k = params.num_class;
        if n == 0 {
            return Err(GbdtError::InvalidData("training set is empty".into()));
        }
        if labels.len() != n {
            return Err(GbdtError::InvalidData(format!(
                "{} labels for {} rows",
                labels.len(),
                n
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&label| label >= k) {
            return Err(GbdtError::InvalidData(format!(
                "label {bad} out of range for {k} classes"
            )));
        }

        let columns = SortedColumns::new(features);
        let tree_config = params.tree_config();
        let mut rng = stream_rng(params.seed, 0);

        let mut raw = vec![0.0; n * k];
        let mut proba = vec![0.0; n * k];
        let mut gradients = vec![vec![0.0; n]; k];
        let mut hessians = vec![vec![0.0; n]; k];
        let mut rounds = Vec::with_capacity(params.rounds);

        for round in 0..params.rounds {
            for (r, p) in raw.chunks(k).zip(proba.chunks_mut(k)) {
                softmax_into(r, p);
            }
            for (i, &label) in labels.iter().enumerate() {
                for class in 0..k {
                    let p = proba[i * k + class];
                    let target = if label == class { 1.0 } else { 0.0 };
                    gradients[class][i] = p - target;
                    hessians[class][i] = (2.0 * p * (1.0 - p)).max(MIN_HESSIAN);
                }
            }

            let rows = sample_rows(&mut rng, n, params.subsample);

            let trees: Vec<_> = (0..k)
                .map(|class| {
                    CartBuilder::new(
                        features,
                        &columns,
                        &gradients[class],
                        &hessians[class],
                        &tree_config,
                    )
                    .build(&rows)
                })
                .collect();

            for (i, row) in features.rows().enumerate() {
                for (class, tree) in trees.iter().enumerate() {
                    raw[i * k + class] += tree.evaluate(row);
                }
            }

            if (round + 1) % 50 == 0 {
                tracing::trace!(
                    round = round + 1,
                    train_logloss = mean_log_loss(&raw, labels, k),
                    "boosting progress"
                );
            }
            rounds.push(trees);
        }

        let model = Model {
            version: MODEL_VERSION,
            feature_count: features.n_cols(),
            params: params.clone(),
            rounds,
        };
        model.validate()?;
        Ok(model)
    }
}

impl Booster for GbdtTrainer {
    type Model = Model;

    fn train(
        &self,
        features: &FeatureMatrix,
        labels: &[usize],
        params: &BoostParams,
    ) -> Result<Model> {
        self.fit(features, labels, params)
    }

    fn predict(&self, model: &Model, features: &FeatureMatrix) -> Result<ProbabilityMatrix> {
        model.predict_proba(features)
    }

    fn fingerprint(&self, model: &Model) -> Result<Option<String>> {
        model.fingerprint().map(Some)
    }
}

/// Bernoulli row sample; never empty
fn sample_rows<R: Rng>(rng: &mut R, n: usize, fraction: f64) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let rows: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < fraction).collect();
    if rows.is_empty() {
        return (0..n).collect();
    }
    rows
}

fn mean_log_loss(raw: &[f64], labels: &[usize], k: usize) -> f64 {
    let mut p = vec![0.0; k];
    let total: f64 = raw
        .chunks(k)
        .zip(labels)
        .map(|(r, &label)| {
            softmax_into(r, &mut p);
            -p[label].max(f64::MIN_POSITIVE).ln()
        })
        .sum();
    total / labels.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_cluster_dataset() -> (FeatureMatrix, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for class in 0..3usize {
            for i in 0..10 {
                rows.push(vec![class as f64 * 10.0 + i as f64 * 0.1, (i % 3) as f64]);
                labels.push(class);
            }
        }
        (FeatureMatrix::from_rows(&rows).unwrap(), labels)
    }

    fn params() -> BoostParams {
        BoostParams {
            rounds: 10,
            learning_rate: 0.3,
            max_depth: 3,
            min_child_weight: 0.5,
            lambda: 1.0,
            gamma: 0.0,
            subsample: 1.0,
            num_class: 3,
            seed: 7,
            objective: Objective::MultiSoftprob,
        }
    }

    #[test]
    fn test_train_simple_model() {
        let (x, y) = three_cluster_dataset();
        let model = GbdtTrainer::new().fit(&x, &y, &params()).unwrap();

        assert_eq!(model.rounds.len(), 10);
        assert_eq!(model.num_trees(), 30);
        assert_eq!(model.feature_count, 2);
        assert!(model.validate().is_ok());

        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.argmax(), y);
    }

    #[test]
    fn test_determinism_with_subsample() {
        let (x, y) = three_cluster_dataset();
        let params = BoostParams {
            subsample: 0.5,
            ..params()
        };

        let model1 = GbdtTrainer::new().fit(&x, &y, &params).unwrap();
        let model2 = GbdtTrainer::new().fit(&x, &y, &params).unwrap();

        assert_eq!(model1, model2);
        assert_eq!(model1.fingerprint().unwrap(), model2.fingerprint().unwrap());
    }

    #[test]
    fn test_rejects_bad_labels() {
        let (x, mut y) = three_cluster_dataset();
        y[0] = 5;
        let err = GbdtTrainer::new().fit(&x, &y, &params()).unwrap_err();
        assert!(matches!(err, GbdtError::InvalidData(_)));
    }

    #[test]
    fn test_rejects_invalid_params() {
        let (x, y) = three_cluster_dataset();
        for bad in [
            BoostParams { rounds: 0, ..params() },
            BoostParams { subsample: 0.0, ..params() },
            BoostParams { learning_rate: -0.1, ..params() },
            BoostParams { num_class: 1, ..params() },
        ] {
            assert!(matches!(
                GbdtTrainer::new().fit(&x, &y, &bad),
                Err(GbdtError::InvalidParameters(_))
            ));
        }
    }

    #[test]
    fn test_sample_rows_fraction() {
        let mut rng = stream_rng(1, 0);
        let rows = sample_rows(&mut rng, 10_000, 0.5);
        assert!(rows.len() > 4_500 && rows.len() < 5_500);
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
    }
}
