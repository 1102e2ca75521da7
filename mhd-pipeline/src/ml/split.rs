//! Seeded train/validation splits

use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;

use crate::error::{PipelineError, PipelineResult};

/// Row indices of a split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Rows held out for validation: `ceil(n × fraction)`, leaving at least one
/// training row
pub fn test_size(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1))
}

/// Shuffled split of `n` rows
pub fn train_test_split(n: usize, fraction: f64, seed: u64) -> PipelineResult<Split> {
    if n < 2 {
        return Err(PipelineError::InsufficientData(format!(
            "need at least 2 rows to split, got {}",
            n
        )));
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = SmallRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = test_size(n, fraction);
    let train = indices.split_off(n_test);
    Ok(Split {
        train,
        test: indices,
    })
}

/// Split preserving class proportions of a binary (or categorical) target
///
/// Every class must have at least two rows so it appears on both sides.
pub fn stratified_split(labels: &[f64], fraction: f64, seed: u64) -> PipelineResult<Split> {
    let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, y) in labels.iter().enumerate() {
        by_class.entry(y.round() as i64).or_default().push(i);
    }
    if let Some((class, rows)) = by_class.iter().find(|(_, rows)| rows.len() < 2) {
        return Err(PipelineError::InsufficientData(format!(
            "class {} has {} row(s); stratified split needs at least 2 per class",
            class,
            rows.len()
        )));
    }

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::new(),
        test: Vec::new(),
    };
    for rows in by_class.values_mut() {
        rows.shuffle(&mut rng);
        let n_test = test_size(rows.len(), fraction);
        split.train.extend_from_slice(&rows[n_test..]);
        split.test.extend_from_slice(&rows[..n_test]);
    }
    split.train.shuffle(&mut rng);
    split.test.shuffle(&mut rng);
    Ok(split)
}

/// Gather rows by index
pub fn take<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_size_rounds_up() {
        assert_eq!(test_size(500, 0.2), 100);
        assert_eq!(test_size(11, 0.2), 3);
        assert_eq!(test_size(2, 0.2), 1);
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let a = train_test_split(50, 0.2, 42).unwrap();
        let b = train_test_split(50, 0.2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test.len(), 10);
        assert_eq!(a.train.len(), 40);

        let mut all: Vec<usize> = a.train.iter().chain(a.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_rejects_single_row() {
        assert!(train_test_split(1, 0.2, 42).is_err());
    }

    #[test]
    fn test_stratified_keeps_both_classes_in_test() {
        let labels: Vec<f64> = (0..40).map(|i| if i < 6 { 1.0 } else { 0.0 }).collect();
        let split = stratified_split(&labels, 0.2, 7).unwrap();
        let positives = split.test.iter().filter(|&&i| labels[i] == 1.0).count();
        assert_eq!(positives, 2);
        assert_eq!(split.test.len() + split.train.len(), 40);
    }

    #[test]
    fn test_stratified_rejects_lonely_class() {
        let labels = vec![0.0, 0.0, 0.0, 1.0];
        assert!(matches!(
            stratified_split(&labels, 0.2, 7),
            Err(PipelineError::InsufficientData(_))
        ));
    }
}
