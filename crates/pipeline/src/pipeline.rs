//! Stage driver
//!
//! Runs load, partition, feature selection, tuning, selection, final fit and
//! reporting strictly in that order. Every schema check on both tables
//! happens before the first model is trained.

use tracing::info;
use wle_gbdt::{Booster, FeatureMatrix};

use crate::config::PipelineConfig;
use crate::encoding::{ClassSet, FeatureEncoder};
use crate::errors::Result;
use crate::features::{select_predictors, FeatureSelection};
use crate::final_model::{final_params, train_final, FinalInputs};
use crate::partition::{stratified_split, Partition};
use crate::report::{evaluation_predictions, Report, ValidationMetrics};
use crate::selector::select_best;
use crate::table::{Table, Value};
use crate::tuner::{GridResult, Tuner, TuningReport};

/// Encoded data shared by the tuning and final stages
#[derive(Debug, Clone)]
pub struct Prepared {
    pub classes: ClassSet,
    pub partition: Partition,
    pub selection: FeatureSelection,
    pub encoder: FeatureEncoder,
    pub train_x: FeatureMatrix,
    pub train_y: Vec<usize>,
    pub validation_x: FeatureMatrix,
    pub validation_y: Vec<usize>,
    pub evaluation_x: FeatureMatrix,
    pub evaluation_ids: Vec<String>,
}

/// Result of stages 1 to 5
#[derive(Debug, Clone)]
pub struct TuneOutcome {
    pub prepared: Prepared,
    pub tuning: TuningReport,
    pub selected: GridResult,
}

pub struct Pipeline<B: Booster> {
    config: PipelineConfig,
    booster: B,
}

impl<B: Booster> Pipeline<B> {
    pub fn new(config: PipelineConfig, booster: B) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, booster })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read both tables from the configured paths
    pub fn load_tables(&self) -> Result<(Table, Table)> {
        let data = &self.config.data;
        info!("Stage 1: loading data");
        let training = Table::from_csv(&data.training_path, "training", &data.missing_tokens)?;
        let evaluation =
            Table::from_csv(&data.evaluation_path, "evaluation", &data.missing_tokens)?;
        info!(
            training_rows = training.len(),
            evaluation_rows = evaluation.len(),
            columns = training.columns.len(),
            "Tables loaded"
        );
        Ok((training, evaluation))
    }

    /// Whole run from the configured files
    pub fn run(&self) -> Result<Report> {
        let (training, evaluation) = self.load_tables()?;
        self.run_with_tables(&training, &evaluation)
    }

    /// Whole run on tables already in memory
    pub fn run_with_tables(&self, training: &Table, evaluation: &Table) -> Result<Report> {
        let TuneOutcome {
            prepared,
            tuning,
            selected,
        } = self.tune_with_tables(training, evaluation)?;

        info!("Stage 6: final model");
        let params = final_params(
            &self.config.final_model,
            &selected.point,
            prepared.classes.len(),
            self.config.partition.seed,
        );
        let inputs = FinalInputs {
            train_x: &prepared.train_x,
            train_y: &prepared.train_y,
            validation_x: &prepared.validation_x,
            validation_y: &prepared.validation_y,
            evaluation_x: &prepared.evaluation_x,
        };
        let outcome = train_final(
            &self.booster,
            params,
            &inputs,
            self.config.scoring.probability_floor,
        )?;

        info!("Stage 7: report");
        let validation = ValidationMetrics::compute(
            &prepared.validation_y,
            &outcome.validation_proba,
            &prepared.classes,
        )?;
        info!(accuracy = validation.overall.accuracy, "Validation accuracy");
        let predictions = evaluation_predictions(
            &prepared.evaluation_ids,
            &outcome.evaluation_proba,
            &prepared.classes,
        )?;

        Ok(Report {
            classes: prepared.classes.names().to_vec(),
            training_rows: prepared.partition.train.len(),
            validation_rows: prepared.partition.validation.len(),
            predictors: prepared.selection.predictors,
            excluded: prepared.selection.excluded,
            tuning,
            selected: selected.point,
            selected_score: selected.mean,
            final_params: outcome.params,
            model_fingerprint: outcome.fingerprint,
            validation_score: outcome.validation_score,
            validation,
            predictions,
        })
    }

    /// Stages 2 to 5 on tables already in memory
    pub fn tune_with_tables(&self, training: &Table, evaluation: &Table) -> Result<TuneOutcome> {
        let prepared = self.prepare(training, evaluation)?;

        info!("Stage 4: cross-validation");
        let tuning = Tuner::new(
            &self.booster,
            &self.config.tuning,
            prepared.classes.len(),
            self.config.partition.seed,
        )
        .with_probability_floor(self.config.scoring.probability_floor)
        .run(&prepared.train_x, &prepared.train_y)?;

        info!("Stage 5: model selection");
        let selected = select_best(&tuning)?.clone();

        Ok(TuneOutcome {
            prepared,
            tuning,
            selected,
        })
    }

    /// Stages 2 and 3 plus encoding of all three row sets
    pub fn prepare(&self, training: &Table, evaluation: &Table) -> Result<Prepared> {
        let data = &self.config.data;
        let labels = training.required_text_column(&data.label_column)?;
        let classes = ClassSet::resolve(&data.classes, &labels)?;
        let encoded_labels = classes.encode(&labels)?;

        info!("Stage 2: partitioning");
        let partition = stratified_split(
            &encoded_labels,
            self.config.partition.train_fraction,
            self.config.partition.seed,
        )?;
        info!(
            train = partition.train.len(),
            validation = partition.validation.len(),
            "Partition complete"
        );
        let train_table = training.select_rows(&partition.train);
        let validation_table = training.select_rows(&partition.validation);

        info!("Stage 3: feature selection");
        let selection = select_predictors(
            &train_table,
            &data.label_column,
            &self.config.features.identifier_columns,
            self.config.features.missing_cutoff,
        )?;
        info!(
            predictors = selection.predictors.len(),
            excluded = selection.excluded.len(),
            "Feature selection complete"
        );

        let encoder = FeatureEncoder::fit(&train_table, &selection.predictors)?;
        let train_x = encoder.transform(&train_table)?;
        let validation_x = encoder.transform(&validation_table)?;
        let evaluation_x = encoder.transform(evaluation)?;
        let evaluation_ids = evaluation_ids(evaluation, &data.id_column);

        let pick = |rows: &[usize]| -> Vec<usize> {
            rows.iter().map(|&r| encoded_labels[r]).collect()
        };
        Ok(Prepared {
            train_y: pick(&partition.train),
            validation_y: pick(&partition.validation),
            classes,
            partition,
            selection,
            encoder,
            train_x,
            validation_x,
            evaluation_x,
            evaluation_ids,
        })
    }
}

/// Values of the id column, or 1-based row numbers where absent
fn evaluation_ids(evaluation: &Table, id_column: &str) -> Vec<String> {
    match evaluation.column_index(id_column) {
        Some(idx) => evaluation
            .column_values(idx)
            .enumerate()
            .map(|(row, value)| match value {
                Value::Missing => (row + 1).to_string(),
                other => other.to_string(),
            })
            .collect(),
        None => (1..=evaluation.len()).map(|row| row.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_ids() {
        let table = Table::new(
            "evaluation",
            vec!["problem_id".into()],
            vec![vec![Value::Number(7.0)], vec![Value::Missing]],
        )
        .unwrap();
        assert_eq!(evaluation_ids(&table, "problem_id"), vec!["7", "2"]);
        assert_eq!(evaluation_ids(&table, "id"), vec!["1", "2"]);
    }
}
