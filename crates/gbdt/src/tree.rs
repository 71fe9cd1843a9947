//! Decision tree structures for GBDT inference
//!
//! Trees are stored as flat node arrays; node 0 is the root.

use serde::{Deserialize, Serialize};

/// A decision tree node (internal or leaf)
///
/// For internal nodes:
/// - `feature_idx >= 0`: index into feature vector
/// - `left` and `right` point to child node indices
/// - `default_left` routes missing (`NaN`) values
///
/// For leaf nodes:
/// - `feature_idx == -1`
/// - `leaf` contains the additive contribution (learning rate already applied)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: i32,

    /// Left child index (-1 for leaf nodes)
    pub left: i32,

    /// Right child index (-1 for leaf nodes)
    pub right: i32,

    /// Feature index to split on (-1 for leaf nodes)
    pub feature_idx: i32,

    /// Values `<= threshold` go left
    pub threshold: f64,

    /// Direction taken by missing values
    pub default_left: bool,

    pub leaf: Option<f64>,
}

impl Node {
    /// Create a new internal (split) node
    pub fn internal(
        id: i32,
        feature_idx: i32,
        threshold: f64,
        default_left: bool,
        left: i32,
        right: i32,
    ) -> Self {
        Self {
            id,
            left,
            right,
            feature_idx,
            threshold,
            default_left,
            leaf: None,
        }
    }

    /// Create a new leaf node
    pub fn leaf(id: i32, value: f64) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0.0,
            default_left: true,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature_idx == -1 || self.leaf.is_some()
    }
}

/// A single regression tree fitted to one class's gradients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Evaluate this tree on a feature vector
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;

        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };

            if let Some(value) = node.leaf {
                return value;
            }

            let Some(&value) = features.get(node.feature_idx as usize) else {
                return 0.0;
            };

            let go_left = if value.is_nan() {
                node.default_left
            } else {
                value <= node.threshold
            };
            let next = if go_left { node.left } else { node.right };
            if next < 0 {
                return 0.0;
            }
            idx = next as usize;
        }
    }

    /// Validate tree structure
    pub fn validate(&self, feature_count: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                match node.leaf {
                    Some(value) if value.is_finite() => {}
                    Some(value) => {
                        return Err(format!("Leaf node {i} has non-finite value {value}"))
                    }
                    None => return Err(format!("Leaf node {i} has no leaf value")),
                }
                continue;
            }
            // Children are always appended after their parent.
            for child in [node.left, node.right] {
                if child <= i as i32 || child as usize >= self.nodes.len() {
                    return Err(format!("Node {i} has invalid child: {child}"));
                }
            }
            if node.feature_idx < 0 || node.feature_idx as usize >= feature_count {
                return Err(format!(
                    "Internal node {i} has invalid feature index: {}",
                    node.feature_idx
                ));
            }
        }

        Ok(())
    }
}
