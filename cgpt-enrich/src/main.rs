//! cgpt-enrich - batch enrichment worker
//!
//! Launched by cgpt-api as the enrichment stage. Progress goes to stdout as
//! `PROGRESS:` lines; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cgpt_common::config::{load_toml_or_default, resolve_work_dir, LoggingConfig, WORK_DIR_ENV};
use cgpt_common::ProgressReporter;
use cgpt_enrich::{BatchResumeManager, EnrichConfig, GeminiClient};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cgpt-enrich
#[derive(Parser, Debug)]
#[command(name = "cgpt-enrich")]
#[command(about = "CreatorGPT resumable batch enrichment worker")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CGPT_ENRICH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the workload and batch artifacts
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Workload file name inside the work directory (overrides config)
    #[arg(short, long)]
    input: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Ok(true) when every batch is completed
async fn run() -> Result<bool> {
    // GEMINI_API_KEY may live in a .env file next to the worker
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let loaded: Result<EnrichConfig> =
        load_toml_or_default(args.config.as_deref()).context("Failed to load configuration");

    // Installed before the config error is returned so it still gets logged
    let level = match &loaded {
        Ok(config) => config.logging.level.clone(),
        Err(_) => LoggingConfig::default().level,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = loaded?;
    if let Some(input) = args.input {
        config.input_file = Some(input);
    }

    info!("Starting cgpt-enrich (batch enrichment worker)");

    let work_dir = resolve_work_dir(
        args.work_dir.as_deref(),
        WORK_DIR_ENV,
        config.work_dir.as_deref(),
    );
    info!("Work directory: {}", work_dir.display());

    let reporter = ProgressReporter::stdout();
    reporter.emit("initialization", "Initializing batch processor...", 0);

    let client = GeminiClient::from_env(config.gemini.clone()).context("Cannot create Gemini client")?;
    info!(model = %config.gemini.model, "Gemini client ready");

    let workload = work_dir.join(config.input_file());
    let manager = BatchResumeManager::new(work_dir.clone(), config.batch.clone(), client, reporter);
    let report = manager
        .run(&workload)
        .await
        .context("Batch processing failed")?;

    info!(
        completed = ?report.completed_batches(),
        failed = ?report.failed,
        "Enrichment finished"
    );
    Ok(report.all_completed())
}
