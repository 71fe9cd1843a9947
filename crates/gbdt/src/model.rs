//! Multiclass GBDT model
//!
//! One tree per class per boosting round. Raw scores are the sum of leaf
//! contributions; class probabilities are their softmax.

use serde::{Deserialize, Serialize};

use crate::deterministic::softmax_into;
use crate::errors::{GbdtError, Result};
use crate::matrix::{FeatureMatrix, ProbabilityMatrix};
use crate::trainer::BoostParams;
use crate::tree::Tree;

/// Current model format version
pub const MODEL_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    pub version: i32,

    /// Number of predictor columns the model was trained on
    pub feature_count: usize,

    /// Parameters the model was trained with
    pub params: BoostParams,

    /// Shape: `[n_rounds][num_class]`
    pub rounds: Vec<Vec<Tree>>,
}

impl Model {
    pub fn num_class(&self) -> usize {
        self.params.num_class
    }

    pub fn num_trees(&self) -> usize {
        self.rounds.iter().map(Vec::len).sum()
    }

    /// Validate model structure
    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_VERSION {
            return Err(GbdtError::ValidationFailed(format!(
                "Unsupported model version: {}",
                self.version
            )));
        }
        for (round_idx, round) in self.rounds.iter().enumerate() {
            if round.len() != self.num_class() {
                return Err(GbdtError::ValidationFailed(format!(
                    "Round {round_idx} has {} trees but expected {}",
                    round.len(),
                    self.num_class()
                )));
            }
            for (class_idx, tree) in round.iter().enumerate() {
                tree.validate(self.feature_count).map_err(|e| {
                    GbdtError::ValidationFailed(format!(
                        "Round {round_idx} class {class_idx}: {e}"
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Raw per-class scores for one feature vector
    pub fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = vec![0.0; self.num_class()];
        for round in &self.rounds {
            for (score, tree) in raw.iter_mut().zip(round) {
                *score += tree.evaluate(features);
            }
        }
        raw
    }

    /// Class probability distribution for every row
    pub fn predict_proba(&self, features: &FeatureMatrix) -> Result<ProbabilityMatrix> {
        if features.n_cols() != self.feature_count {
            return Err(GbdtError::FeatureMismatch {
                expected: self.feature_count,
                actual: features.n_cols(),
            });
        }
        let k = self.num_class();
        let mut values = vec![0.0; features.n_rows() * k];
        for (row, out) in features.rows().zip(values.chunks_mut(k)) {
            softmax_into(&self.predict_raw(row), out);
        }
        ProbabilityMatrix::new(features.n_rows(), k, values)
    }

    /// JSON form used for fingerprinting
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Blake3 hash of the JSON representation as hex
    pub fn fingerprint(&self) -> Result<String> {
        let json = self.to_json()?;
        let hash = blake3::hash(json.as_bytes());
        Ok(hex::encode(hash.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn two_class_model() -> Model {
        let split = |left: f64, right: f64| {
            Tree::new(vec![
                Node::internal(0, 0, 0.0, true, 1, 2),
                Node::leaf(1, left),
                Node::leaf(2, right),
            ])
        };
        Model {
            version: MODEL_VERSION,
            feature_count: 1,
            params: BoostParams {
                num_class: 2,
                ..BoostParams::default()
            },
            rounds: vec![vec![split(1.0, -1.0), split(-1.0, 1.0)]],
        }
    }

    #[test]
    fn test_predict_proba_rows_sum_to_one() {
        let model = two_class_model();
        let x = FeatureMatrix::from_rows(&[vec![-1.0], vec![1.0], vec![f64::NAN]]).unwrap();
        let proba = model.predict_proba(&x).unwrap();

        for row in proba.rows() {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        assert_eq!(proba.argmax(), vec![0, 1, 0]);
    }

    #[test]
    fn test_feature_mismatch() {
        let model = two_class_model();
        let x = FeatureMatrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            model.predict_proba(&x),
            Err(GbdtError::FeatureMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_validate_round_shape() {
        let mut model = two_class_model();
        assert!(model.validate().is_ok());
        model.rounds[0].pop();
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let model = two_class_model();
        assert_eq!(model.fingerprint().unwrap(), model.clone().fingerprint().unwrap());
        assert_eq!(model.fingerprint().unwrap().len(), 64);
    }
}
