//! mhd-pipeline - Model lifecycle service
//!
//! `serve` runs the HTTP API, the training job workers and the monitoring
//! loop. The other commands run a single step and exit.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mhd_common::config::{ConfigSources, PipelineConfig};
use mhd_common::time::now;
use mhd_pipeline::jobs::{JobQueue, JobRegistry};
use mhd_pipeline::models::{PipelineKind, TrainParams};
use mhd_pipeline::monitoring::{aggregate_daily, compute_daily_drift, compute_precision_at_k, monitoring_loop};
use mhd_pipeline::pipeline::{FeatureSet, PipelineContext};
use mhd_pipeline::AppState;

#[derive(Debug, Parser)]
#[command(name = "mhd-pipeline", version, about = "MHD model lifecycle pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "MHD_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for the database, manifests, artifacts and blobs
    #[arg(long, env = "MHD_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PipelineArg {
    Generic,
    InjuryRisk,
    SessionQuality,
}

impl From<PipelineArg> for PipelineKind {
    fn from(arg: PipelineArg) -> Self {
        match arg {
            PipelineArg::Generic => PipelineKind::Generic,
            PipelineArg::InjuryRisk => PipelineKind::InjuryRisk,
            PipelineArg::SessionQuality => PipelineKind::SessionQuality,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FeatureSetArg {
    Risk,
    Session,
}

impl From<FeatureSetArg> for FeatureSet {
    fn from(arg: FeatureSetArg) -> Self {
        match arg {
            FeatureSetArg::Risk => FeatureSet::Risk,
            FeatureSetArg::Session => FeatureSet::Session,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API, job workers and monitoring loop
    Serve,
    /// Run one pipeline in the foreground
    Train {
        #[arg(long, value_enum, default_value = "generic")]
        pipeline: PipelineArg,
        /// Override the configured random seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Build a feature set
    BuildFeatures {
        #[arg(long, value_enum)]
        set: FeatureSetArg,
    },
    /// Label the configured risk feature version
    BuildLabels {
        #[arg(long)]
        horizon_days: Option<i64>,
    },
    /// Compute feature drift over served inputs
    Drift,
    /// Compute precision@k for a day (default yesterday) and today's aggregates
    Rollup {
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// Insert synthetic athletes, sessions, vitals and injuries
    SeedDemo {
        #[arg(long, default_value_t = 40)]
        athletes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(&ConfigSources {
        config_file: cli.config.clone(),
        root_folder: cli.root_folder.clone(),
    })?;
    mhd_common::logging::init(&config.logging.level)?;

    info!("Starting mhd-pipeline {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", config.root().display());

    let db_path = config.database_path();
    let db = mhd_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let ctx = PipelineContext::new(config, db)?;

    match cli.command {
        Command::Serve => serve(ctx).await?,
        Command::Train { pipeline, seed } => {
            let params = TrainParams {
                seed,
                ..Default::default()
            };
            let result = ctx.run(pipeline.into(), &params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::BuildFeatures { set } => {
            let written = ctx.build_features(set.into()).await?;
            info!(written, "Feature vectors written");
        }
        Command::BuildLabels { horizon_days } => {
            let written = ctx.build_labels(horizon_days).await?;
            info!(written, "Labels written");
        }
        Command::Drift => {
            let m = &ctx.config.monitoring;
            match compute_daily_drift(&ctx.db, &m.drift_feature, m.drift_ref_days, m.drift_cur_days, now()).await? {
                Some(psi) => println!("{}: psi={:.6}", m.drift_feature, psi),
                None => println!("{}: not enough served values", m.drift_feature),
            }
        }
        Command::Rollup { day } => {
            let at = now();
            let day = day.unwrap_or_else(|| at.date_naive() - chrono::Duration::days(1));
            match compute_precision_at_k(&ctx.db, day, ctx.config.monitoring.precision_k_pct).await? {
                Some(metric) => println!("{}", serde_json::to_string_pretty(&metric)?),
                None => println!("{}: no injury-risk predictions", day),
            }
            let aggregates = aggregate_daily(&ctx.db, at).await?;
            println!("{}", serde_json::to_string_pretty(&aggregates)?);
        }
        Command::SeedDemo { athletes } => {
            let summary =
                mhd_pipeline::seed::seed_demo(&ctx.db, athletes, ctx.config.pipeline.random_seed, now()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

async fn serve(ctx: PipelineContext) -> Result<()> {
    let cancel = CancellationToken::new();

    let interrupted = JobRegistry::new(ctx.db.clone()).fail_stale_jobs().await?;
    if interrupted > 0 {
        info!(interrupted, "Failed jobs left over from a previous run");
    }
    let queue = JobQueue::start(ctx.clone(), ctx.config.pipeline.max_concurrent_jobs, cancel.clone());

    if ctx.config.monitoring.enabled {
        tokio::spawn(monitoring_loop(
            ctx.db.clone(),
            ctx.config.monitoring.clone(),
            cancel.clone(),
        ));
    }

    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let app = mhd_pipeline::build_router(AppState::new(ctx, queue));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
