//! Promotion gate on validation metrics

use crate::models::Metrics;

/// `val_auc >= threshold`; a run without an AUC never passes
pub fn validate_metrics(metrics: &Metrics, threshold: f64) -> bool {
    metrics.val_auc.is_some_and(|auc| auc >= threshold)
}
