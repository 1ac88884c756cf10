use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use redundancy::save_results;
use redundancy_runner::config::RunnerConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the runner TOML config (overrides REDUNDANCY_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of jobs to generate (overrides the config)
    #[arg(long)]
    jobs: Option<usize>,

    /// Seed for job generation, sampling and tie-breaks (overrides the config)
    #[arg(long)]
    seed: Option<u64>,

    /// Where to write the per-job results as JSON (overrides the config)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = RunnerConfig::load(args.config.as_deref())?;
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.output.is_some() {
        config.output = args.output;
    }

    let output = redundancy_runner::run(&config).await?;
    for container in &output.summary.containers {
        info!(
            container = %container.container,
            jobs = container.jobs,
            accepted = container.accepted,
            aggregate_correct = container.aggregate_correct,
            closest_correct = container.closest_correct,
            avg_channel_position = ?container.avg_channel_position,
            "Container summary"
        );
    }

    if let Some(path) = &config.output {
        save_results(path, &output.persisted)
            .context(format!("Failed to write results to {}", path.display()))?;
        info!(path = %path.display(), results = output.persisted.len(), "Results saved");
    }

    println!("{}", serde_json::to_string_pretty(&output.summary)?);
    Ok(())
}
