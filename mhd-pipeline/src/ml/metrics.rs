//! Validation metrics

use crate::error::{PipelineError, PipelineResult};

/// 1-based ranks with ties assigned their average rank
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share rank (i+1 + j+1) / 2
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

fn class_counts(y_true: &[f64]) -> PipelineResult<(usize, usize)> {
    let positives = y_true.iter().filter(|&&y| y >= 0.5).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(PipelineError::DegenerateTarget(format!(
            "validation set has a single class ({} positive, {} negative)",
            positives, negatives
        )));
    }
    Ok((positives, negatives))
}

/// Area under the ROC curve (Mann-Whitney rank statistic)
pub fn roc_auc(y_true: &[f64], scores: &[f64]) -> PipelineResult<f64> {
    let (positives, negatives) = class_counts(y_true)?;
    let ranks = average_ranks(scores);
    let positive_rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(&y, _)| y >= 0.5)
        .map(|(_, &r)| r)
        .sum();

    let p = positives as f64;
    let u = positive_rank_sum - p * (p + 1.0) / 2.0;
    Ok(u / (p * negatives as f64))
}

/// Average precision (area under the precision-recall curve, step-wise)
pub fn average_precision(y_true: &[f64], scores: &[f64]) -> PipelineResult<f64> {
    let (positives, _) = class_counts(y_true)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0;
    let mut i = 0;
    while i < order.len() {
        // tied scores form a single threshold
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if y_true[order[i]] >= 0.5 {
                tp += 1;
            }
            seen += 1;
            i += 1;
        }
        let recall = tp as f64 / positives as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Ok(ap)
}

/// Mean absolute error
pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / y_true.len() as f64
}

/// Spearman rank correlation; `None` when either side is constant
pub fn spearman(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    pearson(&average_ranks(a), &average_ranks(b))
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 5.0]), vec![2.5, 4.0, 2.5, 1.0]);
    }

    #[test]
    fn test_auc_perfect_inverse_and_ties() {
        let y = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
        assert_eq!(roc_auc(&y, &[0.5, 0.5, 0.5, 0.5]).unwrap(), 0.5);
    }

    #[test]
    fn test_auc_matches_pairwise_count() {
        let y = [1.0, 0.0, 1.0, 0.0, 1.0];
        let s = [0.7, 0.6, 0.4, 0.3, 0.9];
        // 5 of the 6 positive/negative pairs are ordered correctly
        let auc = roc_auc(&y, &s).unwrap();
        assert!((auc - 5.0 / 6.0).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&auc));
    }

    #[test]
    fn test_auc_single_class_is_degenerate() {
        assert!(matches!(
            roc_auc(&[1.0, 1.0], &[0.2, 0.3]),
            Err(PipelineError::DegenerateTarget(_))
        ));
    }

    #[test]
    fn test_average_precision() {
        let y = [1.0, 0.0, 1.0, 0.0];
        let s = [0.9, 0.8, 0.7, 0.1];
        // thresholds: P=1 at R=.5, P=2/3 at R=1
        let ap = average_precision(&y, &s).unwrap();
        assert!((ap - (0.5 * 1.0 + 0.5 * 2.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_mae_and_spearman() {
        assert_eq!(mean_absolute_error(&[1.0, 3.0], &[2.0, 1.0]), 1.5);
        let rho = spearman(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]).unwrap();
        assert!((rho - 1.0).abs() < 1e-12);
        let rho = spearman(&[1.0, 2.0, 3.0], &[3.0, 1.0, 0.0]).unwrap();
        assert!((rho + 1.0).abs() < 1e-12);
        assert_eq!(spearman(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]), None);
    }
}
