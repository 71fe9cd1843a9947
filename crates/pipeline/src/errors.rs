//! Error types for the report pipeline

use thiserror::Error;

/// Errors that terminate a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// An expected column is absent from a table
    #[error("table '{table}' is missing column '{column}'")]
    MissingColumn { table: String, column: String },

    /// Input rows that do not fit the expected schema
    #[error("schema error in '{table}': {message}")]
    Schema { table: String, message: String },

    /// A label value outside the configured class set
    #[error("row {row}: unknown label '{label}'")]
    UnknownLabel { row: usize, label: String },

    /// A held-in set lacks a class, or a held-out set is empty
    #[error("fold {fold} is degenerate: {reason}")]
    DegenerateFold { fold: usize, reason: String },

    /// No grid point produced a finite cross-entropy
    #[error("model selection failed: {0}")]
    Selection(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("booster error: {0}")]
    Booster(#[from] wle_gbdt::GbdtError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
