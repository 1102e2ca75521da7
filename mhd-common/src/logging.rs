//! Tracing subscriber initialisation

use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber
///
/// `RUST_LOG` wins when set; otherwise `level` (from `[logging]`) applies to
/// the pipeline crates and `tower_http`.
pub fn init(level: &str) -> Result<()> {
    let fallback = format!("mhd_pipeline={level},mhd_common={level},tower_http={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Config(format!("Logging already initialised: {}", e)))
}
