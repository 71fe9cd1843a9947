//! Final refit and scoring
//!
//! The selected grid point is refitted on the whole training partition with
//! the larger round budget and smaller learning rate, then scored on the
//! validation partition and applied to the evaluation table. The model is
//! dropped once its predictions have been taken.

use serde::Serialize;
use tracing::info;
use wle_gbdt::{BoostParams, Booster, FeatureMatrix, Objective, ProbabilityMatrix};

use crate::config::FinalModelConfig;
use crate::errors::Result;
use crate::scoring::{cross_entropy, Score};
use crate::tuner::GridPoint;

/// Matrices the final model is fitted on and applied to
pub struct FinalInputs<'a> {
    pub train_x: &'a FeatureMatrix,
    pub train_y: &'a [usize],
    pub validation_x: &'a FeatureMatrix,
    pub validation_y: &'a [usize],
    pub evaluation_x: &'a FeatureMatrix,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalOutcome {
    pub params: BoostParams,
    pub validation_score: Score,
    #[serde(skip)]
    pub validation_proba: ProbabilityMatrix,
    #[serde(skip)]
    pub evaluation_proba: ProbabilityMatrix,
    /// Content hash of the fitted model, when the booster provides one
    pub fingerprint: Option<String>,
}

/// Booster settings for the refit
pub fn final_params(
    config: &FinalModelConfig,
    point: &GridPoint,
    num_class: usize,
    seed: u64,
) -> BoostParams {
    BoostParams {
        rounds: config.rounds,
        learning_rate: config.learning_rate,
        max_depth: config.max_depth,
        min_child_weight: point.min_child_weight,
        lambda: point.lambda(),
        gamma: 0.0,
        subsample: config.subsample,
        num_class,
        seed,
        objective: Objective::MultiSoftprob,
    }
}

pub fn train_final<B: Booster>(
    booster: &B,
    params: BoostParams,
    inputs: &FinalInputs<'_>,
    probability_floor: Option<f64>,
) -> Result<FinalOutcome> {
    info!(
        rounds = params.rounds,
        learning_rate = params.learning_rate,
        rows = inputs.train_x.n_rows(),
        "Training final model"
    );
    let model = booster.train(inputs.train_x, inputs.train_y, &params)?;
    let fingerprint = booster.fingerprint(&model)?;
    if let Some(fp) = &fingerprint {
        info!(fingerprint = %fp, "Final model trained");
    }

    let validation_proba = booster.predict(&model, inputs.validation_x)?;
    let validation_score =
        cross_entropy(&validation_proba, inputs.validation_y, probability_floor)?;
    info!(score = %validation_score, "Validation cross-entropy");

    let evaluation_proba = booster.predict(&model, inputs.evaluation_x)?;

    Ok(FinalOutcome {
        params,
        validation_score,
        validation_proba,
        evaluation_proba,
        fingerprint,
    })
}
