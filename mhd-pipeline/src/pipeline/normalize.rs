//! Numeric clean-up of loosely typed vitals columns

use crate::error::PipelineResult;
use crate::frame::{Cell, Frame};

/// Columns normalised by the generic pipeline
pub const NUMERIC_COLUMNS: [&str; 3] = ["age", "bp", "hr"];

/// Numbers pass through, `"50+"` → 50, `"40-60"` → 50, anything else → null
pub fn normalize_numeric(cell: &Cell) -> Cell {
    match cell {
        Cell::Num(v) => Cell::Num(*v),
        Cell::Text(text) => {
            let text = text.trim();
            if let Some(lower) = text.strip_suffix('+') {
                return lower.trim().parse::<f64>().map(Cell::from).unwrap_or(Cell::Null);
            }
            if let Some((lo, hi)) = text.split_once('-') {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<f64>(), hi.trim().parse::<f64>()) {
                    return Cell::from((lo + hi) / 2.0);
                }
            }
            Cell::Null
        }
        Cell::Null => Cell::Null,
    }
}

/// Normalise the vitals columns present, then drop rows with any null
pub fn normalize_frame(mut frame: Frame) -> PipelineResult<Frame> {
    for column in NUMERIC_COLUMNS {
        if frame.has_column(column) {
            frame.map_column(column, normalize_numeric)?;
        }
    }
    let before = frame.n_rows();
    frame.drop_null_rows();
    if frame.n_rows() < before {
        tracing::debug!(dropped = before - frame.n_rows(), "Dropped rows with missing values");
    }
    Ok(frame)
}
