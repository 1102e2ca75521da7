//! Orchestration job state machine
//!
//! States: `queued → running → {succeeded, failed}`. Transitions only move
//! forward; a queued job may also fail directly (interrupted before a worker
//! picked it up).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DeploymentManifest, RegistryPromotion, TrainingRun};

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named orchestrator pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Generic,
    InjuryRisk,
    SessionQuality,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Generic => "generic",
            PipelineKind::InjuryRisk => "injury_risk",
            PipelineKind::SessionQuality => "session_quality",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generic" => Some(PipelineKind::Generic),
            "injury_risk" => Some(PipelineKind::InjuryRisk),
            "session_quality" => Some(PipelineKind::SessionQuality),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job overrides of configured pipeline settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    /// Synthetic row count (generic)
    pub rows: Option<usize>,
    /// Split/synthesis seed
    pub seed: Option<u64>,
    /// Label horizon (injury risk)
    pub horizon_days: Option<i64>,
    /// Feature set version (injury risk, session quality)
    pub feature_version: Option<String>,
}

/// Result payload of a succeeded job, one variant per pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pipeline", rename_all = "snake_case")]
pub enum JobResult {
    Generic {
        run: TrainingRun,
        promoted: Option<RegistryPromotion>,
        manifest: DeploymentManifest,
    },
    InjuryRisk {
        features_built: usize,
        labels_built: usize,
        run: TrainingRun,
        promoted: Option<RegistryPromotion>,
        manifest: DeploymentManifest,
    },
    SessionQuality {
        run: TrainingRun,
        manifest: DeploymentManifest,
    },
}

impl JobResult {
    pub fn run(&self) -> &TrainingRun {
        match self {
            JobResult::Generic { run, .. }
            | JobResult::InjuryRisk { run, .. }
            | JobResult::SessionQuality { run, .. } => run,
        }
    }

    pub fn manifest(&self) -> &DeploymentManifest {
        match self {
            JobResult::Generic { manifest, .. }
            | JobResult::InjuryRisk { manifest, .. }
            | JobResult::SessionQuality { manifest, .. } => manifest,
        }
    }
}

/// One orchestration invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: PipelineKind,
    pub status: JobStatus,
    pub params: TrainParams,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub traceback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// New job in `queued`
    pub fn new(kind: PipelineKind, params: TrainParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Queued,
            params,
            result: None,
            error: None,
            traceback: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `next`, stamping start/finish times
    pub fn transition_to(&mut self, next: JobStatus) -> mhd_common::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(mhd_common::Error::InvalidInput(format!(
                "Invalid job transition {} -> {} for job {}",
                self.status, next, self.id
            )));
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Succeeded | JobStatus::Failed => self.finished_at = Some(now),
            JobStatus::Queued => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn succeed(&mut self, result: JobResult) -> mhd_common::Result<()> {
        self.transition_to(JobStatus::Succeeded)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: String, traceback: String) -> mhd_common::Result<()> {
        self.transition_to(JobStatus::Failed)?;
        self.error = Some(error);
        self.traceback = Some(traceback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new(PipelineKind::Generic, TrainParams::default());
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_forward_transitions_stamp_times() {
        let mut job = Job::new(PipelineKind::SessionQuality, TrainParams::default());
        job.transition_to(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());

        job.fail("boom".into(), "boom\n\nCaused by: io".into()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_backward_and_skipping_transitions_rejected() {
        let mut job = Job::new(PipelineKind::Generic, TrainParams::default());
        assert!(job.transition_to(JobStatus::Succeeded).is_err());

        job.transition_to(JobStatus::Running).unwrap();
        assert!(job.transition_to(JobStatus::Queued).is_err());

        job.transition_to(JobStatus::Failed).unwrap();
        assert!(job.transition_to(JobStatus::Running).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_pipeline_kind_names() {
        for kind in [
            PipelineKind::Generic,
            PipelineKind::InjuryRisk,
            PipelineKind::SessionQuality,
        ] {
            assert_eq!(PipelineKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PipelineKind::parse("nightly"), None);
    }
}
