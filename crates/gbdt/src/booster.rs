//! Narrow training/prediction interface consumed by the pipeline

use crate::errors::Result;
use crate::matrix::{FeatureMatrix, ProbabilityMatrix};
use crate::trainer::BoostParams;

/// A multiclass boosted-tree learner.
///
/// Implementations must be deterministic for a fixed `params.seed` and must
/// not share mutable state between calls, so independent trainings can run
/// on separate threads.
pub trait Booster: Send + Sync {
    /// Trained artifact; never mutated after `train` returns
    type Model: Send;

    fn train(
        &self,
        features: &FeatureMatrix,
        labels: &[usize],
        params: &BoostParams,
    ) -> Result<Self::Model>;

    /// Per-row, per-class probabilities
    fn predict(&self, model: &Self::Model, features: &FeatureMatrix) -> Result<ProbabilityMatrix>;

    /// Stable content hash of a model, if the learner can produce one
    fn fingerprint(&self, _model: &Self::Model) -> Result<Option<String>> {
        Ok(None)
    }
}
