//! Data quality gates run before training

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Columns the generic trainer needs
pub const BASIC_REQUIRED: [&str; 4] = ["age", "bp", "hr", "target"];

/// Rows inspected by the session gate
const SESSION_SAMPLE_ROWS: usize = 100;

/// Row issues collected before the session gate stops looking
const SESSION_MAX_ISSUES: usize = 10;

/// `(column, min, max)` bounds checked on session training rows
const SESSION_BOUNDS: [(&str, f64, Option<f64>); 12] = [
    ("sets", 0.0, None),
    ("reps", 0.0, None),
    ("rpe", 0.0, Some(10.0)),
    ("completed_pct", 0.0, Some(100.0)),
    ("volume", 0.0, None),
    ("density", 0.0, None),
    ("intensity", 0.0, Some(10.0)),
    ("nlp_fatigue", 0.0, None),
    ("nlp_pain_any", 0.0, None),
    ("nlp_sleep_poor", 0.0, None),
    ("nlp_mood_neg", 0.0, None),
    ("nlp_compliance_issues", 0.0, None),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

impl QualityReport {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            ok: issues.is_empty(),
            issues,
        }
    }

    /// `Err(DataQuality)` carrying the issues when the gate failed
    pub fn into_result(self) -> PipelineResult<()> {
        if self.ok {
            Ok(())
        } else {
            Err(PipelineError::DataQuality { issues: self.issues })
        }
    }
}

/// Required vitals columns present and `age ∈ [0, 120]`
pub fn basic_schema_check(frame: &Frame) -> QualityReport {
    let mut issues: Vec<String> = BASIC_REQUIRED
        .iter()
        .filter(|c| !frame.has_column(c))
        .map(|c| format!("missing column: {}", c))
        .collect();

    if let Some(age) = frame.column("age") {
        let out_of_bounds = age
            .iter()
            .filter_map(|cell| cell.as_f64())
            .any(|a| !(0.0..=120.0).contains(&a));
        if out_of_bounds {
            issues.push("age out of plausible bounds".to_string());
        }
    }

    QualityReport::from_issues(issues)
}

/// Bounds on the first rows of a session training frame
pub fn session_schema_check(frame: &Frame) -> QualityReport {
    let missing: Vec<String> = SESSION_BOUNDS
        .iter()
        .filter(|(c, _, _)| !frame.has_column(c))
        .map(|(c, _, _)| format!("missing column: {}", c))
        .collect();
    if !missing.is_empty() {
        return QualityReport::from_issues(missing);
    }

    let mut issues = Vec::new();
    for row in 0..frame.n_rows().min(SESSION_SAMPLE_ROWS) {
        let mut problems = Vec::new();
        for (name, min, max) in SESSION_BOUNDS {
            let cell = frame.column(name).map(|c| &c[row]);
            match cell.and_then(|c| c.as_f64()) {
                None => problems.push(format!("{} is not a number", name)),
                Some(v) if v < min => problems.push(format!("{} = {} is below {}", name, v, min)),
                Some(v) if max.is_some_and(|m| v > m) => problems.push(format!(
                    "{} = {} is above {}",
                    name,
                    v,
                    max.unwrap_or_default()
                )),
                Some(_) => {}
            }
        }
        if !problems.is_empty() {
            issues.push(format!("row {}: {}", row, problems.join(", ")));
            if issues.len() > SESSION_MAX_ISSUES {
                break;
            }
        }
    }

    QualityReport::from_issues(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Cell;

    #[test]
    fn test_basic_gate_reports_every_problem() {
        let frame = Frame::from_csv("age,bp\n130,120\n40,110\n".as_bytes()).unwrap();
        let report = basic_schema_check(&frame);
        assert!(!report.ok);
        assert_eq!(
            report.issues,
            vec![
                "missing column: hr".to_string(),
                "missing column: target".to_string(),
                "age out of plausible bounds".to_string(),
            ]
        );
        assert!(matches!(
            report.into_result(),
            Err(PipelineError::DataQuality { issues }) if issues.len() == 3
        ));
    }

    #[test]
    fn test_basic_gate_accepts_bounds() {
        let frame = Frame::from_csv("age,bp,hr,target\n0,120,60,0\n120,140,70,1\n".as_bytes()).unwrap();
        assert!(basic_schema_check(&frame).ok);
    }

    fn session_frame(rows: usize, rpe: f64) -> Frame {
        let columns = SESSION_BOUNDS
            .iter()
            .map(|(name, _, _)| {
                let v = if *name == "rpe" { rpe } else { 1.0 };
                (name.to_string(), vec![Cell::Num(v); rows])
            })
            .collect();
        Frame::from_columns(columns).unwrap()
    }

    #[test]
    fn test_session_gate_bounds_and_issue_cap() {
        assert!(session_schema_check(&session_frame(5, 7.0)).ok);

        let report = session_schema_check(&session_frame(50, 11.0));
        assert!(!report.ok);
        assert_eq!(report.issues.len(), SESSION_MAX_ISSUES + 1);
        assert!(report.issues[0].starts_with("row 0: rpe = 11 is above 10"));
    }

    #[test]
    fn test_session_gate_only_samples_leading_rows() {
        let mut frame = session_frame(150, 5.0);
        frame
            .insert_column(
                "rpe",
                (0..150).map(|i| Cell::Num(if i >= 100 { 20.0 } else { 5.0 })).collect(),
            )
            .unwrap();
        assert!(session_schema_check(&frame).ok);
    }

    #[test]
    fn test_session_gate_missing_columns() {
        let frame = Frame::from_csv("sets,reps\n1,2\n".as_bytes()).unwrap();
        let report = session_schema_check(&frame);
        assert_eq!(report.issues.len(), SESSION_BOUNDS.len() - 2);
    }
}
