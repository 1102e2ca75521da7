//! Session-quality feature set
//!
//! One vector per structured workout session, keyed by the session's own
//! timestamp so it joins exactly to the session's coach rating. Serving
//! derives the same features from request items.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::{features::upsert_feature, records};
use crate::error::PipelineResult;
use crate::models::{FeatureMap, FeatureVector, SessionRecord};

/// Raw per-session inputs before derivation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInputs {
    pub sets: f64,
    pub reps: f64,
    pub rpe: f64,
    pub rest_s: f64,
    pub completed_pct: f64,
    pub nlp_fatigue: f64,
    pub nlp_pain_any: f64,
    pub nlp_sleep_poor: f64,
    pub nlp_mood_neg: f64,
    pub nlp_compliance_issues: f64,
}

impl SessionInputs {
    /// Structured fields default to 0; NLP tags collapse to scores
    pub fn from_record(session: &SessionRecord) -> Self {
        let tag = |name: &str| session.nlp_tags.get(name).copied().unwrap_or(0.0);
        let pain_any = session
            .nlp_tags
            .iter()
            .any(|(k, v)| k.starts_with("pain_") && *v != 0.0);
        Self {
            sets: session.sets.unwrap_or(0.0),
            reps: session.reps.unwrap_or(0.0),
            rpe: session.rpe.unwrap_or(0.0),
            rest_s: session.rest_s.unwrap_or(0.0),
            completed_pct: session.completed_pct.unwrap_or(0.0),
            nlp_fatigue: tag("fatigue"),
            nlp_pain_any: if pain_any { 1.0 } else { 0.0 },
            nlp_sleep_poor: tag("sleep_poor"),
            nlp_mood_neg: tag("mood_neg"),
            nlp_compliance_issues: tag("compliance_issue"),
        }
    }

    /// Clipped inputs plus volume, density and intensity
    pub fn features(&self) -> FeatureMap {
        let rpe = self.rpe.clamp(0.0, 10.0);
        let completed_pct = self.completed_pct.clamp(0.0, 100.0);
        let volume = self.sets * self.reps;
        FeatureMap::from([
            ("sets".to_string(), self.sets),
            ("reps".to_string(), self.reps),
            ("rpe".to_string(), rpe),
            ("rest_s".to_string(), self.rest_s),
            ("completed_pct".to_string(), completed_pct),
            ("volume".to_string(), volume),
            ("density".to_string(), volume / (1.0 + self.rest_s)),
            ("intensity".to_string(), rpe),
            ("nlp_fatigue".to_string(), self.nlp_fatigue),
            ("nlp_pain_any".to_string(), self.nlp_pain_any),
            ("nlp_sleep_poor".to_string(), self.nlp_sleep_poor),
            ("nlp_mood_neg".to_string(), self.nlp_mood_neg),
            ("nlp_compliance_issues".to_string(), self.nlp_compliance_issues),
        ])
    }
}

fn is_structured(session: &SessionRecord) -> bool {
    session.sets.is_some() || session.reps.is_some() || session.rpe.is_some()
}

/// Build and upsert session vectors; returns the number written
pub async fn build_session_features(pool: &SqlitePool, version: &str) -> PipelineResult<usize> {
    let sessions = records::load_sessions(pool, None).await?;

    let mut written = 0;
    for session in sessions.iter().filter(|s| is_structured(s)) {
        let fv = FeatureVector {
            athlete_id: session.athlete_id.clone(),
            ts: session.ts,
            version: version.to_string(),
            x: SessionInputs::from_record(session).features(),
        };
        upsert_feature(pool, &fv).await?;
        written += 1;
    }

    tracing::info!(version, sessions = written, "Built session features");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::features::load_features;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_derived_features_and_clipping() {
        let x = SessionInputs {
            sets: 4.0,
            reps: 10.0,
            rpe: 12.0,
            rest_s: 79.0,
            completed_pct: 130.0,
            ..Default::default()
        }
        .features();
        assert_eq!(x["volume"], 40.0);
        assert_eq!(x["density"], 0.5);
        assert_eq!(x["rpe"], 10.0);
        assert_eq!(x["intensity"], 10.0);
        assert_eq!(x["completed_pct"], 100.0);
        assert_eq!(x.len(), 13);
    }

    #[test]
    fn test_nlp_tags_collapse() {
        let session = SessionRecord {
            nlp_tags: FeatureMap::from([
                ("fatigue".to_string(), 0.7),
                ("pain_knee".to_string(), 1.0),
                ("compliance_issue".to_string(), 1.0),
            ]),
            ..Default::default()
        };
        let inputs = SessionInputs::from_record(&session);
        assert_eq!(inputs.nlp_fatigue, 0.7);
        assert_eq!(inputs.nlp_pain_any, 1.0);
        assert_eq!(inputs.nlp_compliance_issues, 1.0);
        assert_eq!(inputs.nlp_sleep_poor, 0.0);
    }

    #[test]
    fn test_request_item_defaults_nlp_scores() {
        let item: SessionInputs = serde_json::from_str(
            r#"{"sets": 3, "reps": 8, "rpe": 7, "rest_s": 90, "completed_pct": 100}"#,
        )
        .unwrap();
        assert_eq!(item.nlp_mood_neg, 0.0);
    }

    #[tokio::test]
    async fn test_only_structured_sessions_become_vectors() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 17, 30, 0).unwrap();
        records::save_session(
            &pool,
            &SessionRecord {
                id: "w1".into(),
                athlete_id: "a1".into(),
                ts,
                sets: Some(3.0),
                reps: Some(5.0),
                rpe: Some(8.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        records::save_session(
            &pool,
            &SessionRecord {
                id: "run1".into(),
                athlete_id: "a1".into(),
                ts,
                volume: Some(40.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(build_session_features(&pool, "session_v1").await.unwrap(), 1);
        let stored = load_features(&pool, "session_v1").await.unwrap();
        assert_eq!(stored[0].ts, ts);
        assert_eq!(stored[0].x["volume"], 15.0);
    }
}
