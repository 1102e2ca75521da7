//! Demo data: synthetic athletes with sessions, vitals and injuries
//!
//! Each athlete gets a hidden risk level that raises load, intensity and
//! fatigue tags and makes an injury after the last session more likely, so
//! both the injury-risk and session-quality pipelines have signal to learn.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::Serialize;
use sqlx::SqlitePool;

use mhd_common::time::{add_days, day_start};

use crate::db::records::{save_injury, save_session, save_vital};
use crate::error::PipelineResult;
use crate::models::{FeatureMap, InjuryRecord, SessionRecord, VitalRecord};

/// Sessions span `[now - FIRST_DAY, now - LAST_DAY]`
const FIRST_DAY: i64 = 40;
const LAST_DAY: i64 = 15;

const BODY_PARTS: [&str; 4] = ["knee", "back", "shoulder", "hamstring"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedSummary {
    pub athletes: usize,
    pub sessions: usize,
    pub vitals: usize,
    pub injuries: usize,
}

fn noise(rng: &mut SmallRng, scale: f64) -> f64 {
    (rng.gen::<f64>() - 0.5) * 2.0 * scale
}

fn session(rng: &mut SmallRng, athlete_id: &str, ts: DateTime<Utc>, risk: f64) -> SessionRecord {
    let sets = rng.gen_range(3..=6) as f64;
    let reps = rng.gen_range(5..=12) as f64;
    let rpe = (5.0 + 3.0 * risk + noise(rng, 1.0)).clamp(1.0, 10.0);
    let completed_pct = (100.0 - 25.0 * risk + noise(rng, 8.0)).clamp(40.0, 100.0);

    let mut topics = Vec::new();
    let mut nlp_tags = FeatureMap::new();
    if rng.gen::<f64>() < risk * 0.5 {
        topics.push("fatigue".to_string());
        nlp_tags.insert("fatigue".to_string(), 1.0);
    }
    if rng.gen::<f64>() < risk * 0.3 {
        let part = BODY_PARTS[rng.gen_range(0..BODY_PARTS.len())];
        topics.push(part.to_string());
        topics.push("soreness".to_string());
        nlp_tags.insert(format!("pain_{}", part), 1.0);
    }
    if rng.gen::<f64>() < risk * 0.3 {
        topics.push("sleep".to_string());
        nlp_tags.insert("sleep_poor".to_string(), 1.0);
    }

    let coach_rating = (1.0 + completed_pct / 25.0 - (rpe - 7.0).abs() * 0.3 + noise(rng, 0.4)).clamp(1.0, 5.0);
    SessionRecord {
        id: format!("demo-s-{}-{}", athlete_id, ts.format("%Y%m%d")),
        athlete_id: athlete_id.to_string(),
        ts,
        volume: Some(sets * reps * (8.0 + 6.0 * risk)),
        intensity: Some(rpe),
        adherence: Some(completed_pct / 100.0),
        sentiment: Some((0.4 - risk + noise(rng, 0.3)).clamp(-1.0, 1.0)),
        topics,
        sets: Some(sets),
        reps: Some(reps),
        rpe: Some(rpe),
        rest_s: Some(rng.gen_range(60..=180) as f64),
        completed_pct: Some(completed_pct),
        nlp_tags,
        coach_rating: Some(coach_rating),
    }
}

/// Seed `athletes` demo athletes relative to `now`
pub async fn seed_demo(pool: &SqlitePool, athletes: usize, seed: u64, now: DateTime<Utc>) -> PipelineResult<SeedSummary> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let today = day_start(&now);
    let mut summary = SeedSummary {
        athletes,
        ..Default::default()
    };

    for a in 0..athletes {
        let athlete_id = format!("demo-athlete-{:03}", a);
        let risk: f64 = rng.gen();

        for back in (LAST_DAY..=FIRST_DAY).rev() {
            let day = add_days(&today, -back);
            // roughly one rest day a week
            if rng.gen::<f64>() < 0.85 {
                let record = session(&mut rng, &athlete_id, day + Duration::hours(17), risk);
                save_session(pool, &record).await?;
                summary.sessions += 1;
            }
            let vital = VitalRecord {
                id: format!("demo-v-{}-{}", athlete_id, day.format("%Y%m%d")),
                athlete_id: athlete_id.clone(),
                ts: day + Duration::hours(7),
                resting_hr: Some(55.0 + 10.0 * risk + noise(&mut rng, 3.0)),
                sleep_hours: Some(8.0 - 2.0 * risk + noise(&mut rng, 0.7)),
            };
            save_vital(pool, &vital).await?;
            summary.vitals += 1;
        }

        if rng.gen::<f64>() < 0.1 + 0.6 * risk {
            let onset = add_days(&today, -LAST_DAY + rng.gen_range(1..=14)) + Duration::hours(10);
            let injury = InjuryRecord {
                id: format!("demo-i-{}", athlete_id),
                athlete_id: athlete_id.clone(),
                onset_date: onset,
                body_part: Some(BODY_PARTS[rng.gen_range(0..BODY_PARTS.len())].to_string()),
            };
            save_injury(pool, &injury).await?;
            summary.injuries += 1;
        }
    }

    tracing::info!(
        athletes = summary.athletes,
        sessions = summary.sessions,
        vitals = summary.vitals,
        injuries = summary.injuries,
        "Demo data seeded"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::records::{load_injuries, load_sessions};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_seed_is_deterministic_and_in_window() {
        let now = Utc.with_ymd_and_hms(2024, 7, 30, 9, 0, 0).unwrap();
        let first = {
            let pool = mhd_common::db::init_in_memory().await.unwrap();
            seed_demo(&pool, 6, 7, now).await.unwrap()
        };
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let second = seed_demo(&pool, 6, 7, now).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.vitals, 6 * (FIRST_DAY - LAST_DAY + 1) as usize);

        let sessions = load_sessions(&pool, None).await.unwrap();
        assert_eq!(sessions.len(), second.sessions);
        assert!(sessions.iter().all(|s| s.ts < now - Duration::days(LAST_DAY - 1)));
        assert!(sessions.iter().all(|s| s.coach_rating.is_some_and(|r| (1.0..=5.0).contains(&r))));

        for injury in load_injuries(&pool, None, None).await.unwrap() {
            assert!(injury.onset_date < now);
        }
    }
}
