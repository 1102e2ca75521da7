//! Shared setup for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mhd_common::config::PipelineConfig;
use mhd_pipeline::jobs::JobQueue;
use mhd_pipeline::models::{Job, JobStatus};
use mhd_pipeline::pipeline::PipelineContext;
use mhd_pipeline::tracking::LocalTracker;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pipeline context rooted in a temp folder, in-memory database, local tracker
pub struct TestEnv {
    pub dir: TempDir,
    pub ctx: PipelineContext,
    pub tracker: Arc<LocalTracker>,
}

pub async fn test_env() -> TestEnv {
    test_env_with(|_| {}).await
}

pub async fn test_env_with(adjust: impl FnOnce(&mut PipelineConfig)) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = PipelineConfig::rooted_at(dir.path());
    adjust(&mut config);

    let db = mhd_common::db::init_in_memory()
        .await
        .expect("Failed to create in-memory database");
    let tracker = Arc::new(LocalTracker::new(db.clone(), "integration"));
    let ctx = PipelineContext::with_tracker(config, db, tracker.clone());
    TestEnv { dir, ctx, tracker }
}

/// Job queue with one worker over `ctx`
pub fn start_queue(ctx: &PipelineContext) -> (JobQueue, CancellationToken) {
    let cancel = CancellationToken::new();
    let queue = JobQueue::start(ctx.clone(), 1, cancel.clone());
    (queue, cancel)
}

/// Poll a job until it reaches a terminal state
pub async fn wait_for_job(queue: &JobQueue, id: Uuid) -> Job {
    for _ in 0..600 {
        let job = queue
            .registry()
            .get_job(id)
            .await
            .expect("Failed to read job")
            .expect("Job disappeared");
        if matches!(job.status, JobStatus::Succeeded | JobStatus::Failed) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Job {} did not finish within 30s", id);
}
