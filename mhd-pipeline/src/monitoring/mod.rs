//! Monitoring rollups over served predictions

pub mod aggregate;
pub mod drift;
pub mod precision;
pub mod scheduler;

pub use aggregate::{aggregate_daily, endpoint_for};
pub use drift::{compute_daily_drift, psi};
pub use precision::compute_precision_at_k;
pub use scheduler::{monitoring_loop, run_monitoring_once};
