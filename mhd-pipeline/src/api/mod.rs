//! HTTP API handlers for mhd-pipeline

pub mod health;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod predict;

pub use health::health_routes;
pub use metrics::metrics_routes;
pub use models::model_routes;
pub use pipeline::pipeline_routes;
pub use predict::predict_routes;
