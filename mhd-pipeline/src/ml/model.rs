//! Serialisable fitted model with its feature layout
//!
//! The artifact records the ordered feature names the model was trained on;
//! scoring aligns named inputs to that order and fills missing inputs with 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LogisticRegression, RandomForestRegressor};
use crate::models::FeatureMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    LogisticRegression(LogisticRegression),
    RandomForestRegressor(RandomForestRegressor),
}

/// Contents of `model.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub run_id: String,
    pub feature_names: Vec<String>,
    pub target: String,
    pub estimator: Estimator,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Feature row in training order; absent names become 0.0
    pub fn align(&self, features: &FeatureMap) -> Vec<f64> {
        self.feature_names
            .iter()
            .map(|name| features.get(name).copied().unwrap_or(0.0))
            .collect()
    }

    /// Probability for classifiers, predicted value for regressors
    pub fn score(&self, features: &FeatureMap) -> f64 {
        let row = self.align(features);
        match &self.estimator {
            Estimator::LogisticRegression(m) => m.predict_proba_row(&row),
            Estimator::RandomForestRegressor(m) => m.predict_row(&row),
        }
    }

    pub fn is_classifier(&self) -> bool {
        matches!(self.estimator, Estimator::LogisticRegression(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ForestParams, LogisticParams};
    use std::collections::BTreeMap;

    #[test]
    fn test_score_aligns_by_name_and_zero_fills() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect();
        let model = LogisticRegression::fit(&x, &y, &LogisticParams::default()).unwrap();
        let artifact = ModelArtifact {
            run_id: "r1".into(),
            feature_names: vec!["load".into(), "unused".into()],
            target: "y".into(),
            estimator: Estimator::LogisticRegression(model),
            created_at: Utc::now(),
        };

        let high = BTreeMap::from([("load".to_string(), 19.0), ("extra".to_string(), 7.0)]);
        assert_eq!(artifact.align(&high), vec![19.0, 0.0]);
        assert!(artifact.score(&high) > 0.5);
        assert!(artifact.score(&BTreeMap::new()) < 0.5);
        assert!(artifact.is_classifier());
    }

    #[test]
    fn test_regressor_artifact_round_trips_through_json() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64 / 2.0).collect();
        let forest = RandomForestRegressor::fit(
            &x,
            &y,
            &ForestParams {
                n_trees: 4,
                ..Default::default()
            },
        )
        .unwrap();
        let artifact = ModelArtifact {
            run_id: "r2".into(),
            feature_names: vec!["sets".into()],
            target: "coach_rating".into(),
            estimator: Estimator::RandomForestRegressor(forest),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&artifact).unwrap();
        let back: ModelArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.feature_names, artifact.feature_names);
        let input = BTreeMap::from([("sets".to_string(), 4.0)]);
        assert!((back.score(&input) - artifact.score(&input)).abs() < 1e-9);
        assert!(!back.is_classifier());
    }
}
