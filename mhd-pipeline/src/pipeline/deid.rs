//! De-identification of tabular training data

use sha2::{Digest, Sha256};

use super::normalize::normalize_numeric;
use crate::error::PipelineResult;
use crate::frame::{Cell, Frame};

/// Direct identifiers removed outright
pub const PII_COLUMNS: [&str; 5] = ["name", "email", "phone", "address", "ssn"];

/// Identifier columns replaced by their SHA-256 digest
pub const HASHED_COLUMNS: [&str; 2] = ["athlete_id", "user_id"];

pub fn hash_value(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Right-closed bands: (0,18] (18,30] (30,45] (45,60] (60,120]
pub fn age_band(age: f64) -> Option<&'static str> {
    const BANDS: [(f64, &str); 5] = [
        (18.0, "<18"),
        (30.0, "18-29"),
        (45.0, "30-44"),
        (60.0, "45-59"),
        (120.0, "60+"),
    ];
    if age <= 0.0 {
        return None;
    }
    BANDS.iter().find(|(upper, _)| age <= *upper).map(|(_, band)| *band)
}

pub fn deidentify(mut frame: Frame) -> PipelineResult<Frame> {
    frame.drop_columns(&PII_COLUMNS);

    for column in HASHED_COLUMNS {
        if frame.has_column(column) {
            frame.map_column(column, |cell| match cell {
                Cell::Null => Cell::Null,
                other => Cell::Text(hash_value(&other.to_string())),
            })?;
        }
    }

    if let Some(zip) = frame.column("zip") {
        let zip3 = zip
            .iter()
            .map(|cell| match cell {
                Cell::Null => Cell::Null,
                other => Cell::Text(other.to_string().chars().take(3).collect()),
            })
            .collect();
        frame.insert_column("zip3", zip3)?;
        frame.drop_columns(&["zip"]);
    }

    if let Some(age) = frame.column("age") {
        let bands = age
            .iter()
            .map(|cell| {
                normalize_numeric(cell)
                    .as_f64()
                    .and_then(age_band)
                    .map(Cell::from)
                    .unwrap_or(Cell::Null)
            })
            .collect();
        frame.insert_column("age_band", bands)?;
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_band_edges() {
        assert_eq!(age_band(18.0), Some("<18"));
        assert_eq!(age_band(18.5), Some("18-29"));
        assert_eq!(age_band(30.0), Some("18-29"));
        assert_eq!(age_band(60.0), Some("45-59"));
        assert_eq!(age_band(61.0), Some("60+"));
        assert_eq!(age_band(0.0), None);
        assert_eq!(age_band(130.0), None);
    }

    #[test]
    fn test_deidentify_drops_hashes_and_coarsens() {
        let csv = "name,email,athlete_id,zip,age,bp\nAnn,a@x.io,ath-1,90210,34,120\nBo,,ath-2,,50+,130\n";
        let frame = deidentify(Frame::from_csv(csv.as_bytes()).unwrap()).unwrap();

        assert!(!frame.has_column("name"));
        assert!(!frame.has_column("email"));
        assert!(!frame.has_column("zip"));
        assert_eq!(frame.column("zip3").unwrap()[0], Cell::Text("902".into()));
        assert_eq!(frame.column("zip3").unwrap()[1], Cell::Null);
        assert_eq!(
            frame.column("athlete_id").unwrap()[0],
            Cell::Text(hash_value("ath-1"))
        );
        assert_eq!(hash_value("ath-1").len(), 64);
        assert_eq!(frame.column("age_band").unwrap()[0], Cell::Text("30-44".into()));
        assert_eq!(frame.column("age_band").unwrap()[1], Cell::Text("45-59".into()));
        // raw age is kept
        assert_eq!(frame.column("age").unwrap()[0], Cell::Num(34.0));
    }
}
