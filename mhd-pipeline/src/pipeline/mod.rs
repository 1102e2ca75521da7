//! Model lifecycle pipeline
//!
//! Steps, leaf-first:
//! - `synth`, `deid`, `normalize`: tabular preparation for the generic pipeline
//! - `dataset`: training frames joined from the feature store
//! - `quality`: schema and range gates
//! - `trainer`, `validator`: tracked fitting and the promotion threshold
//! - `deploy`, `loader`: manifest/registry promotion and model resolution
//! - `orchestrator`: the three named pipelines

pub mod dataset;
pub mod deid;
pub mod deploy;
pub mod loader;
pub mod normalize;
pub mod orchestrator;
pub mod quality;
pub mod synth;
pub mod trainer;
pub mod validator;

pub use deploy::Deployer;
pub use loader::{ModelInfo, ModelLoader, ModelSource};
pub use orchestrator::{BlobTraining, FeatureSet, PipelineContext};
pub use quality::QualityReport;
pub use trainer::Trainer;
pub use validator::validate_metrics;
