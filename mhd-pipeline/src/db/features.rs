//! Feature store: versioned feature vectors and labels
//!
//! Upserts are last-write-wins with no locking; concurrent builders for the
//! same (athlete_id, ts, version) simply overwrite each other.

use sqlx::{Row, SqlitePool};
use mhd_common::time::{format_ts, parse_ts};
use mhd_common::Result;

use crate::models::{FeatureVector, Label};

/// Insert or overwrite one feature vector
pub async fn upsert_feature(pool: &SqlitePool, fv: &FeatureVector) -> Result<()> {
    let x = serde_json::to_string(&fv.x)?;

    sqlx::query(
        r#"
        INSERT INTO features (athlete_id, ts, version, x, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id, ts, version) DO UPDATE SET
            x = excluded.x,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&fv.athlete_id)
    .bind(format_ts(&fv.ts))
    .bind(&fv.version)
    .bind(&x)
    .bind(format_ts(&mhd_common::time::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// All feature vectors of a version, ordered by (athlete_id, ts)
pub async fn load_features(pool: &SqlitePool, version: &str) -> Result<Vec<FeatureVector>> {
    let rows = sqlx::query(
        r#"
        SELECT athlete_id, ts, version, x
        FROM features
        WHERE version = ?
        ORDER BY athlete_id, ts
        "#,
    )
    .bind(version)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let ts: String = row.get("ts");
            let x: String = row.get("x");
            Ok(FeatureVector {
                athlete_id: row.get("athlete_id"),
                ts: parse_ts(&ts)?,
                version: row.get("version"),
                x: serde_json::from_str(&x)?,
            })
        })
        .collect()
}

/// Insert or overwrite one label
pub async fn upsert_label(pool: &SqlitePool, label: &Label) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO labels (athlete_id, ts, horizon_days, y, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id, ts, horizon_days) DO UPDATE SET
            y = excluded.y,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&label.athlete_id)
    .bind(format_ts(&label.ts))
    .bind(label.horizon_days)
    .bind(label.y as i64)
    .bind(format_ts(&mhd_common::time::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// All labels of a horizon, ordered by (athlete_id, ts)
pub async fn load_labels(pool: &SqlitePool, horizon_days: i64) -> Result<Vec<Label>> {
    let rows = sqlx::query(
        r#"
        SELECT athlete_id, ts, horizon_days, y
        FROM labels
        WHERE horizon_days = ?
        ORDER BY athlete_id, ts
        "#,
    )
    .bind(horizon_days)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let ts: String = row.get("ts");
            Ok(Label {
                athlete_id: row.get("athlete_id"),
                ts: parse_ts(&ts)?,
                horizon_days: row.get("horizon_days"),
                y: row.get::<i64, _>("y") as u8,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_upsert_feature_overwrites_same_key() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut fv = FeatureVector {
            athlete_id: "a1".into(),
            ts,
            version: "risk_v1".into(),
            x: BTreeMap::from([("load_sum7".to_string(), 10.0)]),
        };
        upsert_feature(&pool, &fv).await.unwrap();
        fv.x.insert("load_sum7".into(), 25.0);
        upsert_feature(&pool, &fv).await.unwrap();

        let loaded = load_features(&pool, "risk_v1").await.unwrap();
        assert_eq!(loaded, vec![fv]);
        assert!(load_features(&pool, "session_v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_labels_keyed_by_horizon() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        for (horizon, y) in [(14, 1), (7, 0)] {
            upsert_label(
                &pool,
                &Label {
                    athlete_id: "a1".into(),
                    ts,
                    horizon_days: horizon,
                    y,
                },
            )
            .await
            .unwrap();
        }

        let labels = load_labels(&pool, 14).await.unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].y, 1);
    }
}
