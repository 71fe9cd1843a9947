//! Stratified row partitioning
//!
//! Both the training/validation split and the cross-validation folds group
//! rows by class, shuffle each class with a seeded RNG and hand the rows out
//! class by class, so every subset mirrors the overall label distribution.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use wle_gbdt::stream_rng;

use crate::errors::{PipelineError, Result};

/// RNG stream for the training/validation split
const SPLIT_STREAM: u64 = 1;
/// RNG stream for fold assignment
const FOLD_STREAM: u64 = 2;

/// Disjoint training and validation row indices, each sorted ascending
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Split rows so that each class contributes `round(n_class * fraction)`
/// rows to the training side
pub fn stratified_split(labels: &[usize], train_fraction: f64, seed: u64) -> Result<Partition> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "train fraction must be in (0, 1), got {train_fraction}"
        )));
    }
    if labels.is_empty() {
        return Err(PipelineError::Schema {
            table: "training".into(),
            message: "cannot partition an empty table".into(),
        });
    }

    let mut rng = stream_rng(seed, SPLIT_STREAM);
    let mut train = Vec::new();
    let mut validation = Vec::new();

    for mut rows in group_by_class(labels, &mut rng).into_values() {
        let take = (rows.len() as f64 * train_fraction).round() as usize;
        validation.extend(rows.split_off(take));
        train.extend(rows);
    }

    train.sort_unstable();
    validation.sort_unstable();
    Ok(Partition { train, validation })
}

/// k disjoint, exhaustive groups of row positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoldAssignment {
    folds: Vec<Vec<usize>>,
}

impl FoldAssignment {
    pub fn k(&self) -> usize {
        self.folds.len()
    }

    pub fn folds(&self) -> &[Vec<usize>] {
        &self.folds
    }

    /// Rows of fold `fold`
    pub fn held_out(&self, fold: usize) -> &[usize] {
        &self.folds[fold]
    }

    /// Rows of every other fold, sorted ascending
    pub fn held_in(&self, fold: usize) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .folds
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != fold)
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect();
        rows.sort_unstable();
        rows
    }
}

/// Deal each shuffled class round-robin into `k` folds. The deal position
/// carries over between classes so fold sizes differ by at most one.
pub fn stratified_folds(labels: &[usize], k: usize, seed: u64) -> Result<FoldAssignment> {
    if k < 2 {
        return Err(PipelineError::InvalidConfig(format!(
            "number of folds must be at least 2, got {k}"
        )));
    }
    if labels.len() < k {
        return Err(PipelineError::InvalidConfig(format!(
            "{} rows cannot fill {k} folds",
            labels.len()
        )));
    }

    let mut rng = stream_rng(seed, FOLD_STREAM);
    let mut folds = vec![Vec::new(); k];
    let mut position = 0usize;
    for rows in group_by_class(labels, &mut rng).into_values() {
        for row in rows {
            folds[position % k].push(row);
            position += 1;
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(FoldAssignment { folds })
}

/// Row indices per class, classes in ascending order, each class shuffled
fn group_by_class(labels: &[usize], rng: &mut StdRng) -> BTreeMap<usize, Vec<usize>> {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(row);
    }
    for rows in by_class.values_mut() {
        rows.shuffle(rng);
    }
    by_class
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced_labels(per_class: usize, classes: usize) -> Vec<usize> {
        (0..per_class * classes).map(|i| i % classes).collect()
    }

    #[test]
    fn test_split_sizes_per_class() {
        let labels = balanced_labels(20, 5);
        let partition = stratified_split(&labels, 0.7, 42).unwrap();

        assert_eq!(partition.train.len(), 70);
        assert_eq!(partition.validation.len(), 30);
        for class in 0..5 {
            let in_train = partition.train.iter().filter(|&&r| labels[r] == class).count();
            assert_eq!(in_train, 14);
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let labels = balanced_labels(13, 3);
        let a = stratified_split(&labels, 0.7, 5).unwrap();
        let b = stratified_split(&labels, 0.7, 5).unwrap();
        let c = stratified_split(&labels, 0.7, 6).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let labels = balanced_labels(4, 2);
        assert!(stratified_split(&labels, 0.0, 1).is_err());
        assert!(stratified_split(&labels, 1.0, 1).is_err());
        assert!(stratified_split(&[], 0.5, 1).is_err());
    }

    #[test]
    fn test_folds_partition_rows() {
        let labels = balanced_labels(11, 3);
        let folds = stratified_folds(&labels, 5, 3).unwrap();

        let mut all: Vec<usize> = folds.folds().iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..labels.len()).collect::<Vec<_>>());

        let sizes: Vec<usize> = folds.folds().iter().map(Vec::len).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_held_in_complements_held_out() {
        let labels = balanced_labels(6, 2);
        let folds = stratified_folds(&labels, 3, 9).unwrap();
        for fold in 0..folds.k() {
            let held_in = folds.held_in(fold);
            assert_eq!(held_in.len() + folds.held_out(fold).len(), labels.len());
            assert!(folds.held_out(fold).iter().all(|r| !held_in.contains(r)));
        }
    }

    #[test]
    fn test_folds_reject_bad_k() {
        let labels = balanced_labels(2, 2);
        assert!(stratified_folds(&labels, 1, 0).is_err());
        assert!(stratified_folds(&labels, 5, 0).is_err());
    }
}
