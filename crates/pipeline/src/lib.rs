//! WLE Pipeline - weight-lifting exercise classification report
//!
//! Loads the labeled sensor corpus and the unlabeled evaluation set, splits
//! the corpus into training and validation partitions, selects predictors,
//! tunes `min_child_weight` and `lambda` by stratified k-fold
//! cross-validation, refits the best combination and reports validation
//! metrics and evaluation-set class probabilities.

pub mod config;
pub mod encoding;
pub mod errors;
pub mod features;
pub mod final_model;
pub mod partition;
pub mod pipeline;
pub mod report;
pub mod scoring;
pub mod selector;
pub mod table;
pub mod tuner;

pub use config::PipelineConfig;
pub use encoding::{ClassSet, FeatureEncoder};
pub use errors::{PipelineError, Result};
pub use features::{select_predictors, ExclusionReason, FeatureSelection};
pub use partition::{stratified_folds, stratified_split, FoldAssignment, Partition};
pub use pipeline::{Pipeline, Prepared, TuneOutcome};
pub use report::{ConfusionMatrix, Report, ValidationMetrics};
pub use scoring::{cross_entropy, Score};
pub use selector::select_best;
pub use table::{Table, Value};
pub use tuner::{GridPoint, GridResult, HyperGrid, Tuner, TuningReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
