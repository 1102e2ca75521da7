//! Raw session, vitals and injury records

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use mhd_common::time::{format_ts, parse_ts};
use mhd_common::Result;

use crate::models::{InjuryRecord, SessionRecord, VitalRecord};

/// Insert or replace a session record
pub async fn save_session(pool: &SqlitePool, session: &SessionRecord) -> Result<()> {
    let topics = serde_json::to_string(&session.topics)?;
    let nlp_tags = serde_json::to_string(&session.nlp_tags)?;

    sqlx::query(
        r#"
        INSERT INTO sessions (
            id, athlete_id, ts, volume, intensity, adherence, sentiment, topics,
            sets, reps, rpe, rest_s, completed_pct, nlp_tags, coach_rating
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            athlete_id = excluded.athlete_id,
            ts = excluded.ts,
            volume = excluded.volume,
            intensity = excluded.intensity,
            adherence = excluded.adherence,
            sentiment = excluded.sentiment,
            topics = excluded.topics,
            sets = excluded.sets,
            reps = excluded.reps,
            rpe = excluded.rpe,
            rest_s = excluded.rest_s,
            completed_pct = excluded.completed_pct,
            nlp_tags = excluded.nlp_tags,
            coach_rating = excluded.coach_rating
        "#,
    )
    .bind(&session.id)
    .bind(&session.athlete_id)
    .bind(format_ts(&session.ts))
    .bind(session.volume)
    .bind(session.intensity)
    .bind(session.adherence)
    .bind(session.sentiment)
    .bind(&topics)
    .bind(session.sets)
    .bind(session.reps)
    .bind(session.rpe)
    .bind(session.rest_s)
    .bind(session.completed_pct)
    .bind(&nlp_tags)
    .bind(session.coach_rating)
    .execute(pool)
    .await?;

    Ok(())
}

/// Sessions at or after `since`, oldest first (all sessions when `None`)
pub async fn load_sessions(
    pool: &SqlitePool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<SessionRecord>> {
    let since = since.map(|ts| format_ts(&ts)).unwrap_or_default();
    let rows = sqlx::query(
        r#"
        SELECT id, athlete_id, ts, volume, intensity, adherence, sentiment, topics,
               sets, reps, rpe, rest_s, completed_pct, nlp_tags, coach_rating
        FROM sessions
        WHERE ts >= ?
        ORDER BY ts, id
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.iter().map(session_from_row).collect()
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord> {
    let ts: String = row.get("ts");
    let topics: String = row.get("topics");
    let nlp_tags: String = row.get("nlp_tags");

    Ok(SessionRecord {
        id: row.get("id"),
        athlete_id: row.get("athlete_id"),
        ts: parse_ts(&ts)?,
        volume: row.get("volume"),
        intensity: row.get("intensity"),
        adherence: row.get("adherence"),
        sentiment: row.get("sentiment"),
        topics: serde_json::from_str(&topics)?,
        sets: row.get("sets"),
        reps: row.get("reps"),
        rpe: row.get("rpe"),
        rest_s: row.get("rest_s"),
        completed_pct: row.get("completed_pct"),
        nlp_tags: serde_json::from_str(&nlp_tags)?,
        coach_rating: row.get("coach_rating"),
    })
}

/// Insert or replace a vitals reading
pub async fn save_vital(pool: &SqlitePool, vital: &VitalRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vitals (id, athlete_id, ts, resting_hr, sleep_hours)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            athlete_id = excluded.athlete_id,
            ts = excluded.ts,
            resting_hr = excluded.resting_hr,
            sleep_hours = excluded.sleep_hours
        "#,
    )
    .bind(&vital.id)
    .bind(&vital.athlete_id)
    .bind(format_ts(&vital.ts))
    .bind(vital.resting_hr)
    .bind(vital.sleep_hours)
    .execute(pool)
    .await?;

    Ok(())
}

/// Vitals readings at or after `since`, oldest first
pub async fn load_vitals(pool: &SqlitePool, since: DateTime<Utc>) -> Result<Vec<VitalRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, athlete_id, ts, resting_hr, sleep_hours
        FROM vitals
        WHERE ts >= ?
        ORDER BY ts, id
        "#,
    )
    .bind(format_ts(&since))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let ts: String = row.get("ts");
            Ok(VitalRecord {
                id: row.get("id"),
                athlete_id: row.get("athlete_id"),
                ts: parse_ts(&ts)?,
                resting_hr: row.get("resting_hr"),
                sleep_hours: row.get("sleep_hours"),
            })
        })
        .collect()
}

/// Insert or replace an injury event
pub async fn save_injury(pool: &SqlitePool, injury: &InjuryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO injuries (id, athlete_id, onset_date, body_part)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            athlete_id = excluded.athlete_id,
            onset_date = excluded.onset_date,
            body_part = excluded.body_part
        "#,
    )
    .bind(&injury.id)
    .bind(&injury.athlete_id)
    .bind(format_ts(&injury.onset_date))
    .bind(&injury.body_part)
    .execute(pool)
    .await?;

    Ok(())
}

/// Injuries with onset in `[start, end)`; open bounds when `None`
pub async fn load_injuries(
    pool: &SqlitePool,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<InjuryRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, athlete_id, onset_date, body_part
        FROM injuries
        WHERE (? IS NULL OR onset_date >= ?)
          AND (? IS NULL OR onset_date < ?)
        ORDER BY onset_date, id
        "#,
    )
    .bind(start.map(|ts| format_ts(&ts)))
    .bind(start.map(|ts| format_ts(&ts)))
    .bind(end.map(|ts| format_ts(&ts)))
    .bind(end.map(|ts| format_ts(&ts)))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let onset: String = row.get("onset_date");
            Ok(InjuryRecord {
                id: row.get("id"),
                athlete_id: row.get("athlete_id"),
                onset_date: parse_ts(&onset)?,
                body_part: row.get("body_part"),
            })
        })
        .collect()
}
