//! WLE GBDT - deterministic multiclass gradient boosted trees
//!
//! Provides the boosted-tree capability used by the report pipeline:
//! exact-greedy trees on softmax gradients with `min_child_weight`,
//! L2 `lambda`, row subsampling and learned missing-value directions.

pub mod booster;
pub mod cart;
pub mod deterministic;
pub mod errors;
pub mod matrix;
pub mod model;
pub mod trainer;
pub mod tree;

pub use booster::Booster;
pub use deterministic::{softmax, stream_rng};
pub use errors::{GbdtError, Result};
pub use matrix::{FeatureMatrix, ProbabilityMatrix};
pub use model::Model;
pub use trainer::{BoostParams, GbdtTrainer, Objective};
pub use tree::{Node, Tree};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
