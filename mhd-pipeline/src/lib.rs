//! mhd-pipeline library interface
//!
//! Model lifecycle for the MHD athlete platform: feature and label
//! builders, tracked training, promotion, serving and monitoring rollups.
//! Exposed as a library for the binary and for integration tests.

pub mod api;
pub mod artifacts;
pub mod db;
pub mod error;
pub mod features;
pub mod frame;
pub mod jobs;
pub mod labeling;
pub mod ml;
pub mod models;
pub mod monitoring;
pub mod pipeline;
pub mod seed;
pub mod storage;
pub mod tracking;

pub use crate::error::{ApiError, ApiResult, PipelineError, PipelineResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::jobs::JobQueue;
use crate::pipeline::PipelineContext;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Pipeline collaborators (config, database, tracker, stores)
    pub ctx: PipelineContext,
    /// Training job queue
    pub queue: JobQueue,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Most recent job failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(ctx: PipelineContext, queue: JobQueue) -> Self {
        let last_error = queue.last_error();
        Self {
            ctx,
            queue,
            startup_time: Utc::now(),
            last_error,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::pipeline_routes())
        .merge(api::predict_routes())
        .merge(api::model_routes())
        .merge(api::metrics_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
