//! Job queue and worker pool
//!
//! `submit` persists a queued job and sends its id down an mpsc channel.
//! `workers` tasks share the receiver; each runs one pipeline at a time in
//! its own task so a panic fails the job instead of the worker. With one
//! worker, orchestrator runs are serialised.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::jobs::registry::JobRegistry;
use crate::models::{Job, PipelineKind, TrainParams};
use crate::pipeline::PipelineContext;

const QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct JobQueue {
    registry: JobRegistry,
    sender: mpsc::Sender<Uuid>,
    cancel: CancellationToken,
    last_error: Arc<RwLock<Option<String>>>,
}

impl JobQueue {
    /// Start `workers` workers (at least one) draining the queue
    pub fn start(ctx: PipelineContext, workers: usize, cancel: CancellationToken) -> Self {
        let registry = JobRegistry::new(ctx.db.clone());
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));
        let last_error = Arc::new(RwLock::new(None));

        for worker in 0..workers.max(1) {
            let worker_ctx = ctx.clone();
            let worker_registry = registry.clone();
            let worker_receiver = receiver.clone();
            let worker_cancel = cancel.clone();
            let worker_last_error = last_error.clone();
            tokio::spawn(async move {
                tracing::debug!(worker, "Job worker started");
                loop {
                    let next = tokio::select! {
                        _ = worker_cancel.cancelled() => None,
                        id = async { worker_receiver.lock().await.recv().await } => id,
                    };
                    let Some(job_id) = next else { break };
                    run_job(&worker_ctx, &worker_registry, &worker_last_error, job_id).await;
                }
                tracing::debug!(worker, "Job worker stopped");
            });
        }

        Self {
            registry,
            sender,
            cancel,
            last_error,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Most recent job failure, for health reporting
    pub fn last_error(&self) -> Arc<RwLock<Option<String>>> {
        self.last_error.clone()
    }

    /// Persist a queued job and hand it to the workers
    pub async fn submit(&self, kind: PipelineKind, params: TrainParams) -> PipelineResult<Job> {
        let job = self.registry.create_job(kind, params).await?;
        let rejected = match self.sender.try_send(job.id) {
            Ok(()) => return Ok(job),
            Err(mpsc::error::TrySendError::Full(_)) => "job queue is full",
            Err(mpsc::error::TrySendError::Closed(_)) => "job queue is shut down",
        };
        tracing::warn!(job_id = %job.id, reason = rejected, "Job rejected");
        self.registry
            .mark_failed(job.id, rejected.to_string(), rejected.to_string())
            .await?;
        Err(PipelineError::QueueUnavailable(rejected.to_string()))
    }

    /// Stop workers once their current job finishes
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run_job(
    ctx: &PipelineContext,
    registry: &JobRegistry,
    last_error: &RwLock<Option<String>>,
    job_id: Uuid,
) {
    let job = match registry.mark_running(job_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Could not start job");
            return;
        }
    };
    tracing::info!(job_id = %job_id, kind = %job.kind, "Job running");

    let task_ctx = ctx.clone();
    let kind = job.kind;
    let params = job.params.clone();
    let outcome = tokio::spawn(async move { task_ctx.run(kind, &params).await }).await;

    let recorded = match outcome {
        Ok(Ok(result)) => {
            tracing::info!(job_id = %job_id, run_id = %result.run().run_id, "Job succeeded");
            registry.mark_succeeded(job_id, result).await
        }
        Ok(Err(err)) => {
            let error = err.to_string();
            let traceback = format!("{:?}", anyhow::Error::new(err));
            tracing::error!(job_id = %job_id, error = %traceback, "Job failed");
            *last_error.write().await = Some(format!("job {}: {}", job_id, error));
            registry.mark_failed(job_id, error, traceback).await
        }
        Err(join_err) => {
            let error = format!("pipeline task aborted: {}", join_err);
            tracing::error!(job_id = %job_id, error = %error, "Job panicked");
            *last_error.write().await = Some(format!("job {}: {}", job_id, error));
            registry.mark_failed(job_id, error.clone(), format!("{:?}", join_err)).await
        }
    };
    if let Err(e) = recorded {
        tracing::error!(job_id = %job_id, error = %e, "Could not record job outcome");
    }
}
