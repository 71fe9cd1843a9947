//! Regression tree builder for one boosting step
//!
//! Exact-greedy, level-wise tree growth on first and second order gradient
//! statistics. Every level scans each pre-sorted feature column once and
//! evaluates candidate splits for all open nodes of that level together.

use crate::deterministic::SplitTieBreaker;
use crate::matrix::FeatureMatrix;
use crate::tree::{Node, Tree};

/// Minimum loss reduction a split must achieve
const MIN_SPLIT_GAIN: f64 = 1e-6;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    /// Minimum hessian sum required in each child
    pub min_child_weight: f64,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    /// Shrinkage applied to leaf weights
    pub learning_rate: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
            gamma: 0.0,
            learning_rate: 0.3,
        }
    }
}

/// Feature columns sorted once per training run
#[derive(Debug, Clone)]
pub struct SortedColumns {
    /// Per feature: rows with a value, ordered by ascending value
    order: Vec<Vec<u32>>,
    /// Per feature: rows whose value is missing
    missing: Vec<Vec<u32>>,
}

impl SortedColumns {
    pub fn new(features: &FeatureMatrix) -> Self {
        let mut order = Vec::with_capacity(features.n_cols());
        let mut missing = Vec::with_capacity(features.n_cols());
        for col in 0..features.n_cols() {
            let mut present = Vec::with_capacity(features.n_rows());
            let mut absent = Vec::new();
            for row in 0..features.n_rows() {
                if features.get(row, col).is_nan() {
                    absent.push(row as u32);
                } else {
                    present.push(row as u32);
                }
            }
            present.sort_by(|&a, &b| {
                features
                    .get(a as usize, col)
                    .total_cmp(&features.get(b as usize, col))
                    .then(a.cmp(&b))
            });
            order.push(present);
            missing.push(absent);
        }
        Self { order, missing }
    }
}

/// Gradient/hessian sums over a set of rows
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct GradStats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl GradStats {
    fn add(&mut self, grad: f64, hess: f64) {
        self.grad += grad;
        self.hess += hess;
        self.count += 1;
    }

    fn plus(self, other: Self) -> Self {
        Self {
            grad: self.grad + other.grad,
            hess: self.hess + other.hess,
            count: self.count + other.count,
        }
    }

    fn minus(self, other: Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    default_left: bool,
    gain: f64,
    left: GradStats,
    right: GradStats,
}

impl SplitCandidate {
    fn tie_breaker(&self) -> SplitTieBreaker {
        SplitTieBreaker::new(self.feature_idx, self.threshold, self.default_left)
    }

    fn beats(&self, current: &SplitCandidate) -> bool {
        self.gain > current.gain
            || (self.gain == current.gain
                && self.tie_breaker().cmp_order(&current.tie_breaker()).is_lt())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    left: GradStats,
    last_value: Option<f64>,
}

/// Build a regression tree with the exact-greedy algorithm
pub struct CartBuilder<'a> {
    features: &'a FeatureMatrix,
    columns: &'a SortedColumns,
    gradients: &'a [f64],
    hessians: &'a [f64],
    config: &'a TreeConfig,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        features: &'a FeatureMatrix,
        columns: &'a SortedColumns,
        gradients: &'a [f64],
        hessians: &'a [f64],
        config: &'a TreeConfig,
    ) -> Self {
        debug_assert_eq!(features.n_rows(), gradients.len());
        debug_assert_eq!(features.n_rows(), hessians.len());
        Self {
            features,
            columns,
            gradients,
            hessians,
            config,
        }
    }

    /// Grow a tree on the given subset of rows
    pub fn build(&self, rows: &[usize]) -> Tree {
        let mut position: Vec<Option<u32>> = vec![None; self.features.n_rows()];
        let mut root = GradStats::default();
        for &row in rows {
            position[row] = Some(0);
            root.add(self.gradients[row], self.hessians[row]);
        }

        let mut nodes = vec![Node::leaf(0, 0.0)];
        let mut stats = vec![root];
        let mut frontier = vec![0usize];

        for _depth in 0..self.config.max_depth {
            if frontier.is_empty() {
                break;
            }

            let mut slot_of: Vec<Option<usize>> = vec![None; nodes.len()];
            for (slot, &node_idx) in frontier.iter().enumerate() {
                slot_of[node_idx] = Some(slot);
            }

            let best = self.find_best_splits(&frontier, &slot_of, &stats, &position);

            let mut next_frontier = Vec::new();
            let mut split_nodes: Vec<Option<(usize, f64, bool, u32, u32)>> =
                vec![None; nodes.len()];
            for (slot, &node_idx) in frontier.iter().enumerate() {
                let Some(split) = &best[slot] else {
                    nodes[node_idx] =
                        Node::leaf(node_idx as i32, self.leaf_weight(stats[node_idx]));
                    continue;
                };

                let left_idx = nodes.len();
                let right_idx = left_idx + 1;
                nodes.push(Node::leaf(left_idx as i32, 0.0));
                nodes.push(Node::leaf(right_idx as i32, 0.0));
                stats.push(split.left);
                stats.push(split.right);

                nodes[node_idx] = Node::internal(
                    node_idx as i32,
                    split.feature_idx as i32,
                    split.threshold,
                    split.default_left,
                    left_idx as i32,
                    right_idx as i32,
                );
                split_nodes[node_idx] = Some((
                    split.feature_idx,
                    split.threshold,
                    split.default_left,
                    left_idx as u32,
                    right_idx as u32,
                ));
                next_frontier.push(left_idx);
                next_frontier.push(right_idx);
            }

            for &row in rows {
                let Some(node_idx) = position[row] else {
                    continue;
                };
                let Some(Some((feature_idx, threshold, default_left, left, right))) =
                    split_nodes.get(node_idx as usize)
                else {
                    continue;
                };
                let value = self.features.get(row, *feature_idx);
                let go_left = if value.is_nan() {
                    *default_left
                } else {
                    value <= *threshold
                };
                position[row] = Some(if go_left { *left } else { *right });
            }

            frontier = next_frontier;
        }

        for node_idx in frontier {
            nodes[node_idx] = Node::leaf(node_idx as i32, self.leaf_weight(stats[node_idx]));
        }

        Tree::new(nodes)
    }

    /// Best split per frontier slot, `None` where no split clears the gain bar
    fn find_best_splits(
        &self,
        frontier: &[usize],
        slot_of: &[Option<usize>],
        stats: &[GradStats],
        position: &[Option<u32>],
    ) -> Vec<Option<SplitCandidate>> {
        let slot = |row: u32| -> Option<usize> {
            position[row as usize].and_then(|node| slot_of.get(node as usize).copied().flatten())
        };

        let mut best: Vec<Option<SplitCandidate>> = vec![None; frontier.len()];

        for feature_idx in 0..self.features.n_cols() {
            let mut missing = vec![GradStats::default(); frontier.len()];
            for &row in &self.columns.missing[feature_idx] {
                if let Some(s) = slot(row) {
                    missing[s].add(self.gradients[row as usize], self.hessians[row as usize]);
                }
            }

            let mut scan = vec![ScanState::default(); frontier.len()];
            for &row in &self.columns.order[feature_idx] {
                let Some(s) = slot(row) else {
                    continue;
                };
                let row = row as usize;
                let value = self.features.get(row, feature_idx);
                let state = &mut scan[s];

                if let Some(last) = state.last_value {
                    if value > last {
                        let mut threshold = last + (value - last) * 0.5;
                        if threshold >= value {
                            threshold = last;
                        }
                        let total = stats[frontier[s]];
                        self.consider(
                            &mut best[s],
                            feature_idx,
                            threshold,
                            total,
                            state.left,
                            missing[s],
                        );
                    }
                }

                state.left.add(self.gradients[row], self.hessians[row]);
                state.last_value = Some(value);
            }
        }

        best
    }

    /// Evaluate both default directions for a threshold
    fn consider(
        &self,
        best: &mut Option<SplitCandidate>,
        feature_idx: usize,
        threshold: f64,
        total: GradStats,
        left_present: GradStats,
        missing: GradStats,
    ) {
        let present_right = total.minus(missing).minus(left_present);

        let mut options = vec![(false, left_present, present_right.plus(missing))];
        if missing.count > 0 {
            options.push((true, left_present.plus(missing), present_right));
        }

        for (default_left, left, right) in options {
            if left.count == 0
                || right.count == 0
                || left.hess < self.config.min_child_weight
                || right.hess < self.config.min_child_weight
            {
                continue;
            }
            let gain = 0.5
                * (self.score(left) + self.score(right) - self.score(total))
                - self.config.gamma;
            if gain <= MIN_SPLIT_GAIN {
                continue;
            }
            let candidate = SplitCandidate {
                feature_idx,
                threshold,
                default_left,
                gain,
                left,
                right,
            };
            let replace = match best {
                None => true,
                Some(current) => candidate.beats(current),
            };
            if replace {
                *best = Some(candidate);
            }
        }
    }

    /// Structure score `G² / (H + λ)`
    fn score(&self, stats: GradStats) -> f64 {
        let denom = stats.hess + self.config.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        stats.grad * stats.grad / denom
    }

    /// Optimal leaf weight `-G / (H + λ)`, shrunk by the learning rate
    fn leaf_weight(&self, stats: GradStats) -> f64 {
        let denom = stats.hess + self.config.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -stats.grad / denom * self.config.learning_rate
    }
}
