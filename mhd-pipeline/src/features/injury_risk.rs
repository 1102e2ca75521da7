//! Injury-risk feature set
//!
//! One vector per athlete, stamped at midnight UTC of the athlete's latest
//! session day. Sessions are first collapsed to daily rows (volume summed,
//! intensity/adherence/sentiment averaged), then rolled over calendar-day
//! windows ending on that latest day.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use mhd_common::time::date_start;

use crate::db::{features::upsert_feature, records};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{FeatureMap, FeatureVector, InjuryRecord, SessionRecord, VitalRecord};

/// Topics counted over the shortest window
pub const TOPIC_VOCABULARY: [&str; 6] = ["knee", "back", "shoulder", "fatigue", "sleep", "soreness"];

/// Lookback for `prior_injury_90d`
const PRIOR_INJURY_DAYS: i64 = 90;

/// Extra days loaded beyond the longest window
const LOAD_SLACK_DAYS: i64 = 2;

#[derive(Debug, Default)]
struct DailyRow {
    volume: f64,
    intensity: Vec<f64>,
    adherence: Vec<f64>,
    sentiment: Vec<f64>,
    topics: Vec<String>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Days `d` with `latest - window < d <= latest`
fn in_window(day: NaiveDate, latest: NaiveDate, window: i64) -> bool {
    day <= latest && (latest - day).num_days() < window
}

fn daily_rows(sessions: &[&SessionRecord]) -> BTreeMap<NaiveDate, DailyRow> {
    let mut days: BTreeMap<NaiveDate, DailyRow> = BTreeMap::new();
    for session in sessions {
        let row = days.entry(session.ts.date_naive()).or_default();
        row.volume += session.volume.unwrap_or(0.0);
        row.intensity.extend(session.intensity);
        row.adherence.extend(session.adherence);
        row.sentiment.extend(session.sentiment);
        row.topics.extend(session.topics.iter().cloned());
    }
    days
}

/// Mean over the window of per-day means; days without values are skipped
fn rolling_mean<F>(days: &BTreeMap<NaiveDate, DailyRow>, latest: NaiveDate, window: i64, pick: F) -> f64
where
    F: Fn(&DailyRow) -> &[f64],
{
    let daily: Vec<f64> = days
        .iter()
        .filter(|(day, _)| in_window(**day, latest, window))
        .filter_map(|(_, row)| mean(pick(row)))
        .collect();
    mean(&daily).unwrap_or(0.0)
}

fn athlete_features(
    sessions: &[&SessionRecord],
    vitals: &[&VitalRecord],
    injuries: &[&InjuryRecord],
    lookbacks: &[i64],
) -> Option<(NaiveDate, FeatureMap)> {
    let days = daily_rows(sessions);
    let latest = *days.keys().next_back()?;
    let short = lookbacks.iter().copied().min()?;

    let mut x = FeatureMap::new();
    for &window in lookbacks {
        let load: f64 = days
            .iter()
            .filter(|(day, _)| in_window(**day, latest, window))
            .map(|(_, row)| row.volume)
            .sum();
        x.insert(format!("load_sum{}", window), load);
    }
    x.insert(
        format!("intensity_avg{}", short),
        rolling_mean(&days, latest, short, |r| &r.intensity),
    );
    x.insert(
        format!("adherence_avg{}", short),
        rolling_mean(&days, latest, short, |r| &r.adherence),
    );
    x.insert(
        format!("nlp_sentiment_avg{}", short),
        rolling_mean(&days, latest, short, |r| &r.sentiment),
    );

    for topic in TOPIC_VOCABULARY {
        let count = days
            .iter()
            .filter(|(day, _)| in_window(**day, latest, short))
            .flat_map(|(_, row)| row.topics.iter())
            .filter(|t| t.as_str() == topic)
            .count();
        x.insert(format!("nlp_topic_{}_{}d", topic, short), count as f64);
    }

    let recent_vitals: Vec<&&VitalRecord> = vitals
        .iter()
        .filter(|v| in_window(v.ts.date_naive(), latest, short))
        .collect();
    let resting_hr: Vec<f64> = recent_vitals.iter().filter_map(|v| v.resting_hr).collect();
    let sleep: Vec<f64> = recent_vitals.iter().filter_map(|v| v.sleep_hours).collect();
    x.insert(format!("resting_hr_avg{}", short), mean(&resting_hr).unwrap_or(0.0));
    x.insert(format!("sleep_hours_avg{}", short), mean(&sleep).unwrap_or(0.0));

    let prior = injuries.iter().any(|i| {
        let onset = i.onset_date.date_naive();
        onset <= latest && (latest - onset).num_days() <= PRIOR_INJURY_DAYS
    });
    x.insert("prior_injury_90d".to_string(), if prior { 1.0 } else { 0.0 });

    Some((latest, x))
}

/// Build and upsert injury-risk vectors; returns the number written
pub async fn build_injury_risk_features(
    pool: &SqlitePool,
    version: &str,
    lookbacks: &[i64],
    now: DateTime<Utc>,
) -> PipelineResult<usize> {
    if lookbacks.is_empty() || lookbacks.iter().any(|&w| w <= 0) {
        return Err(PipelineError::InvalidData(format!(
            "lookback windows must be positive day counts, got {:?}",
            lookbacks
        )));
    }
    let longest = lookbacks.iter().copied().max().unwrap_or(0);
    let since = now - Duration::days(longest + LOAD_SLACK_DAYS);

    let sessions = records::load_sessions(pool, Some(since)).await?;
    if sessions.is_empty() {
        tracing::info!(version, "No recent sessions, no injury-risk features built");
        return Ok(0);
    }
    let vitals = records::load_vitals(pool, since).await?;
    let injuries =
        records::load_injuries(pool, Some(since - Duration::days(PRIOR_INJURY_DAYS)), None).await?;

    let mut by_athlete: BTreeMap<&str, (Vec<&SessionRecord>, Vec<&VitalRecord>, Vec<&InjuryRecord>)> =
        BTreeMap::new();
    for s in &sessions {
        by_athlete.entry(s.athlete_id.as_str()).or_default().0.push(s);
    }
    for v in &vitals {
        if let Some(entry) = by_athlete.get_mut(v.athlete_id.as_str()) {
            entry.1.push(v);
        }
    }
    for i in &injuries {
        if let Some(entry) = by_athlete.get_mut(i.athlete_id.as_str()) {
            entry.2.push(i);
        }
    }

    let mut written = 0;
    for (athlete_id, (s, v, i)) in &by_athlete {
        let Some((latest, x)) = athlete_features(s, v, i, lookbacks) else {
            continue;
        };
        let fv = FeatureVector {
            athlete_id: athlete_id.to_string(),
            ts: date_start(latest),
            version: version.to_string(),
            x,
        };
        upsert_feature(pool, &fv).await?;
        written += 1;
    }

    tracing::info!(version, athletes = written, sessions = sessions.len(), "Built injury-risk features");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::features::load_features;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn session(id: &str, athlete: &str, ts: DateTime<Utc>, volume: f64, intensity: f64) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            athlete_id: athlete.into(),
            ts,
            volume: Some(volume),
            intensity: Some(intensity),
            adherence: Some(1.0),
            sentiment: Some(0.5),
            topics: vec!["knee".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rolling_windows_and_topics() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        // day 1 is outside the 7-day window ending on day 20, inside 28
        records::save_session(&pool, &session("s1", "a1", at(1, 9), 100.0, 9.0)).await.unwrap();
        records::save_session(&pool, &session("s2", "a1", at(18, 9), 50.0, 6.0)).await.unwrap();
        records::save_session(&pool, &session("s3", "a1", at(20, 8), 30.0, 4.0)).await.unwrap();
        records::save_session(&pool, &session("s4", "a1", at(20, 18), 20.0, 2.0)).await.unwrap();
        records::save_injury(
            &pool,
            &InjuryRecord {
                id: "i1".into(),
                athlete_id: "a1".into(),
                onset_date: at(2, 0),
                body_part: Some("knee".into()),
            },
        )
        .await
        .unwrap();

        let n = build_injury_risk_features(&pool, "risk_v1", &[7, 28], at(21, 12)).await.unwrap();
        assert_eq!(n, 1);

        let fv = &load_features(&pool, "risk_v1").await.unwrap()[0];
        assert_eq!(fv.ts, at(20, 0));
        assert_eq!(fv.x["load_sum7"], 100.0);
        assert_eq!(fv.x["load_sum28"], 200.0);
        // daily means 6.0 (day 18) and 3.0 (day 20)
        assert_eq!(fv.x["intensity_avg7"], 4.5);
        assert_eq!(fv.x["nlp_topic_knee_7d"], 3.0);
        assert_eq!(fv.x["nlp_topic_back_7d"], 0.0);
        assert_eq!(fv.x["prior_injury_90d"], 1.0);
        assert_eq!(fv.x["resting_hr_avg7"], 0.0);
    }

    #[tokio::test]
    async fn test_no_sessions_builds_nothing() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        assert_eq!(
            build_injury_risk_features(&pool, "risk_v1", &[7, 28], at(21, 0)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_same_key() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        records::save_session(&pool, &session("s1", "a1", at(10, 9), 10.0, 5.0)).await.unwrap();
        build_injury_risk_features(&pool, "risk_v1", &[7], at(11, 0)).await.unwrap();
        build_injury_risk_features(&pool, "risk_v1", &[7], at(11, 0)).await.unwrap();
        assert_eq!(load_features(&pool, "risk_v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_lookbacks_rejected() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        assert!(matches!(
            build_injury_risk_features(&pool, "risk_v1", &[], at(1, 0)).await,
            Err(PipelineError::InvalidData(_))
        ));
    }
}
