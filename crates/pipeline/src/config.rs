//! Pipeline configuration
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `WLE_*` environment variables. Command line flags are applied by the
//! binary on top of the result.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{PipelineError, Result};

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input tables and label schema
    pub data: DataConfig,
    /// Predictor selection
    pub features: FeatureConfig,
    /// Training/validation split
    pub partition: PartitionConfig,
    /// Cross-validated grid search
    pub tuning: TuningConfig,
    /// Refit on the full training partition
    pub final_model: FinalModelConfig,
    /// Cross-entropy scoring
    pub scoring: ScoringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Labeled corpus
    pub training_path: PathBuf,
    /// Unlabeled evaluation set
    pub evaluation_path: PathBuf,
    /// Cell texts read as missing
    pub missing_tokens: Vec<String>,
    pub label_column: String,
    /// Row identifier in the evaluation table
    pub id_column: String,
    /// Ordered class set; empty means the sorted distinct labels
    pub classes: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            training_path: PathBuf::from("pml-training.csv"),
            evaluation_path: PathBuf::from("pml-testing.csv"),
            missing_tokens: vec!["".into(), "NA".into(), "#DIV/0!".into()],
            label_column: "classe".into(),
            id_column: "problem_id".into(),
            classes: ["A", "B", "C", "D", "E"].iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Columns with a missing fraction strictly above this are dropped
    pub missing_cutoff: f64,
    /// Identifier and timestamp columns never used as predictors
    pub identifier_columns: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            missing_cutoff: 0.95,
            identifier_columns: [
                "X",
                "user_name",
                "raw_timestamp_part_1",
                "raw_timestamp_part_2",
                "cvtd_timestamp",
                "new_window",
                "num_window",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub train_fraction: f64,
    /// Seed shared by the split, the folds and the booster
    pub seed: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.7,
            seed: 1234,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub folds: usize,
    /// Outer loop of the grid
    pub min_child_weight: Vec<f64>,
    /// Inner loop of the grid; `lambda = lambda_relative * min_child_weight`
    pub lambda_relative: Vec<f64>,
    pub rounds: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub max_depth: usize,
    /// Worker threads for the fold x grid jobs, 0 = all cores
    pub threads: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            min_child_weight: vec![0.2, 0.5, 1.0, 2.0, 5.0],
            lambda_relative: vec![0.2, 0.5, 1.0, 2.0, 5.0],
            rounds: 150,
            learning_rate: 0.3,
            subsample: 0.5,
            max_depth: 6,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalModelConfig {
    pub rounds: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub max_depth: usize,
}

impl Default for FinalModelConfig {
    fn default() -> Self {
        Self {
            rounds: 600,
            learning_rate: 0.05,
            subsample: 0.5,
            max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    /// Clamp true-class probabilities to `[floor, 1]` before taking the log.
    /// Without a floor a zero probability yields an unbounded score.
    pub probability_floor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Apply `WLE_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("WLE_TRAINING_PATH") {
            self.data.training_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("WLE_EVALUATION_PATH") {
            self.data.evaluation_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("WLE_SEED") {
            self.partition.seed = parse_override("WLE_SEED", &val)?;
        }
        if let Some(val) = lookup("WLE_THREADS") {
            self.tuning.threads = parse_override("WLE_THREADS", &val)?;
        }
        if let Some(val) = lookup("WLE_FOLDS") {
            self.tuning.folds = parse_override("WLE_FOLDS", &val)?;
        }
        if let Some(val) = lookup("WLE_LOG_LEVEL") {
            self.logging.level = val;
        }
        Ok(())
    }

    /// Reject values no pipeline run can use
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if self.data.label_column.is_empty() {
            return fail("data.label_column must not be empty".into());
        }
        if !(0.0..=1.0).contains(&self.features.missing_cutoff) {
            return fail(format!(
                "features.missing_cutoff must be in [0, 1], got {}",
                self.features.missing_cutoff
            ));
        }
        let fraction = self.partition.train_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return fail(format!(
                "partition.train_fraction must be in (0, 1), got {fraction}"
            ));
        }

        let tuning = &self.tuning;
        if tuning.folds < 2 {
            return fail(format!("tuning.folds must be at least 2, got {}", tuning.folds));
        }
        if tuning.min_child_weight.is_empty() || tuning.lambda_relative.is_empty() {
            return fail("tuning grid must not be empty".into());
        }
        if let Some(v) = tuning
            .min_child_weight
            .iter()
            .chain(&tuning.lambda_relative)
            .find(|v| !(v.is_finite() && **v >= 0.0))
        {
            return fail(format!("tuning grid values must be non-negative, got {v}"));
        }
        check_booster(
            "tuning",
            tuning.rounds,
            tuning.learning_rate,
            tuning.subsample,
            tuning.max_depth,
        )?;

        let fm = &self.final_model;
        check_booster("final_model", fm.rounds, fm.learning_rate, fm.subsample, fm.max_depth)?;
        if fm.rounds <= tuning.rounds {
            return fail(format!(
                "final_model.rounds ({}) must exceed tuning.rounds ({})",
                fm.rounds, tuning.rounds
            ));
        }
        if fm.learning_rate >= tuning.learning_rate {
            return fail(format!(
                "final_model.learning_rate ({}) must be below tuning.learning_rate ({})",
                fm.learning_rate, tuning.learning_rate
            ));
        }

        if let Some(floor) = self.scoring.probability_floor {
            if !(floor > 0.0 && floor < 1.0) {
                return fail(format!("scoring.probability_floor must be in (0, 1), got {floor}"));
            }
        }
        Ok(())
    }
}

fn check_booster(
    section: &str,
    rounds: usize,
    learning_rate: f64,
    subsample: f64,
    max_depth: usize,
) -> Result<()> {
    if rounds == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "{section}.rounds must be positive"
        )));
    }
    if !(learning_rate > 0.0 && learning_rate.is_finite()) {
        return Err(PipelineError::InvalidConfig(format!(
            "{section}.learning_rate must be positive, got {learning_rate}"
        )));
    }
    if !(subsample > 0.0 && subsample <= 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "{section}.subsample must be in (0, 1], got {subsample}"
        )));
    }
    if max_depth == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "{section}.max_depth must be positive"
        )));
    }
    Ok(())
}

fn parse_override<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| PipelineError::InvalidConfig(format!("{key}: cannot parse '{val}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tuning.folds, 5);
        assert_eq!(config.features.missing_cutoff, 0.95);
        assert_eq!(config.data.classes.len(), 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [tuning]
            folds = 3
            min_child_weight = [1.0]

            [scoring]
            probability_floor = 1e-15
            "#,
        )
        .unwrap();

        assert_eq!(config.tuning.folds, 3);
        assert_eq!(config.tuning.min_child_weight, vec![1.0]);
        assert_eq!(config.tuning.lambda_relative.len(), 5);
        assert_eq!(config.scoring.probability_floor, Some(1e-15));
        assert_eq!(config.final_model, FinalModelConfig::default());
    }

    #[test]
    fn test_save_and_load_file() {
        let mut config = PipelineConfig::default();
        config.partition.seed = 99;
        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();

        let loaded = PipelineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("WLE_SEED", "7"),
            ("WLE_FOLDS", "4"),
            ("WLE_TRAINING_PATH", "/data/train.csv"),
            ("WLE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.partition.seed, 7);
        assert_eq!(config.tuning.folds, 4);
        assert_eq!(config.data.training_path, PathBuf::from("/data/train.csv"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.tuning.threads, 0);
    }

    #[test]
    fn test_bad_override_is_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|key| (key == "WLE_THREADS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_impossible_values() {
        let cases: Vec<Box<dyn Fn(&mut PipelineConfig)>> = vec![
            Box::new(|c: &mut PipelineConfig| c.partition.train_fraction = 1.0),
            Box::new(|c: &mut PipelineConfig| c.features.missing_cutoff = 1.5),
            Box::new(|c: &mut PipelineConfig| c.tuning.folds = 1),
            Box::new(|c: &mut PipelineConfig| c.tuning.lambda_relative.clear()),
            Box::new(|c: &mut PipelineConfig| c.tuning.subsample = 0.0),
            Box::new(|c: &mut PipelineConfig| c.final_model.rounds = 0),
            Box::new(|c: &mut PipelineConfig| c.final_model.learning_rate = 0.0),
            Box::new(|c: &mut PipelineConfig| c.scoring.probability_floor = Some(0.0)),
            Box::new(|c: &mut PipelineConfig| {
                c.final_model.rounds = 10;
                c.final_model.learning_rate = 0.9;
            }),
            Box::new(|c: &mut PipelineConfig| c.final_model.rounds = c.tuning.rounds),
            Box::new(|c: &mut PipelineConfig| c.final_model.learning_rate = c.tuning.learning_rate),
        ];
        for mutate in cases {
            let mut config = PipelineConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
        }
    }
}
