//! Redundancy Runner
//!
//! Builds the configured patterns, runs generated jobs through them on a simulated
//! backend and evaluates each aggregate against the job's ideal state.

pub mod config;
pub mod simulator;
pub mod summary;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use redundancy::persistence::{snapshot, PersistedResult};
use redundancy::{ExperimentResult, FaultTolerantContainer, Job, Orchestrator};

use config::RunnerConfig;
use simulator::{ideal_state, SimulatedBackend};
use summary::{summarize, RunSummary};

/// `count` jobs with distinct programs, reproducible from `seed`.
pub fn generate_jobs(count: usize, width: u32, seed: u64) -> Vec<Job> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let nonce: u64 = rng.gen();
            Job::new(
                format!("job{}-{}", i, seed),
                format!("random-circuit width={} nonce={:016x}", width, nonce),
            )
        })
        .collect()
}

pub fn build_containers(config: &RunnerConfig) -> Result<Vec<FaultTolerantContainer>> {
    config
        .pattern_configs()?
        .into_iter()
        .map(|pattern| {
            let id = pattern.id().to_string();
            pattern
                .build()
                .context(format!("Failed to build pattern {}", id))
        })
        .collect()
}

/// Everything one run produced.
pub struct RunOutput {
    pub summary: RunSummary,
    pub experiments: Vec<ExperimentResult>,
    pub persisted: Vec<PersistedResult>,
}

pub async fn run(config: &RunnerConfig) -> Result<RunOutput> {
    let started_at = Utc::now();
    let containers = build_containers(config)?;
    let backend = Arc::new(SimulatedBackend::from_config(config));
    let jobs = generate_jobs(config.jobs, config.width, config.seed);
    info!(
        jobs = jobs.len(),
        containers = containers.len(),
        devices = config.devices.len(),
        shots = config.shots,
        "Starting run"
    );

    let mut orchestrator = Orchestrator::new(backend, containers);
    orchestrator
        .orchestrate_executions(&jobs)
        .await
        .context("Orchestration failed")?;

    let mut experiments = Vec::new();
    for job in &jobs {
        let truth = ideal_state(&job.program, config.width);
        for container in orchestrator.containers() {
            let result = orchestrator.get_result_for(&job.id, container.id())?;
            experiments.push(ExperimentResult::new(
                job.id.clone(),
                container.id().clone(),
                truth.clone(),
                result,
            ));
        }
    }

    Ok(RunOutput {
        summary: RunSummary {
            started_at,
            finished_at: Utc::now(),
            jobs: jobs.len(),
            containers: summarize(&experiments),
        },
        persisted: snapshot(orchestrator.results()),
        experiments,
    })
}
