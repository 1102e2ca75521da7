//! Orchestration jobs: persistent registry and worker queue

pub mod queue;
pub mod registry;

pub use queue::JobQueue;
pub use registry::{JobRegistry, INTERRUPTED_ERROR};
