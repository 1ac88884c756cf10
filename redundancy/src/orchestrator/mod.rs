//! Capacity-aware orchestration of jobs across fault-tolerant containers.
//!
//! One call to [`Orchestrator::orchestrate_executions`] runs in three phases:
//!
//! 1. **Partition**: every container broadcasts every job to its channels; the
//!    resulting variants are grouped by device with duplicates removed.
//! 2. **Dispatch**: devices run concurrently, each device's variants in sequential
//!    chunks no larger than the backend's capacity for it.
//! 3. **Aggregate**: each container's channel records are rebuilt from the outcomes
//!    and reconciled by the container's aggregator, then stored per (job, container).

pub mod backend;
pub mod results;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::channel::{ContainerId, DeviceId, Job, JobId, JobVariant, VariantId};
use crate::container::FaultTolerantContainer;
use crate::error::{RedundancyError, RedundancyResult};
use crate::record::{Counts, MeasurementRecord};

pub use backend::{ExecutionBackend, ResultSet};
pub use results::{OrchestratedResult, ResultManager};

/// Outcomes of every chunk dispatched to one device.
#[derive(Debug, Default)]
struct DeviceOutcome {
    chunks: Vec<ResultSet>,
    chunk_of: HashMap<VariantId, usize>,
}

impl DeviceOutcome {
    /// The dispatching chunk first, then every other chunk.
    fn counts_for(&self, variant: &VariantId) -> RedundancyResult<&Counts> {
        let home = self.chunk_of.get(variant).copied();
        if let Some(set) = home.and_then(|i| self.chunks.get(i)) {
            if set.contains(variant) {
                return set.counts_for(variant);
            }
        }
        self.chunks
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != home)
            .find_map(|(_, set)| set.counts_for(variant).ok())
            .ok_or_else(|| RedundancyError::lookup(format!("no outcome for variant {}", variant)))
    }
}

/// Runs jobs through a set of containers on one execution backend.
pub struct Orchestrator<B: ExecutionBackend> {
    backend: Arc<B>,
    containers: Vec<FaultTolerantContainer>,
    results: ResultManager,
}

impl<B: ExecutionBackend> Orchestrator<B> {
    /// Containers with a repeated id are dropped after the first.
    pub fn new(
        backend: Arc<B>,
        containers: impl IntoIterator<Item = FaultTolerantContainer>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for container in containers {
            if seen.insert(container.id().clone()) {
                unique.push(container);
            } else {
                warn!(container = %container.id(), "Duplicate container ignored");
            }
        }
        Self {
            backend,
            containers: unique,
            results: ResultManager::new(),
        }
    }

    pub fn containers(&self) -> &[FaultTolerantContainer] {
        &self.containers
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn results(&self) -> &ResultManager {
        &self.results
    }

    /// Run `jobs` through every container and store one aggregate per pair.
    ///
    /// Every pair's records are resolved before any aggregator runs, so a missing
    /// outcome fails the call without touching stored results or switch state.
    /// Results are stored only once every pair has aggregated. Jobs are aggregated
    /// in the order given, so stateful aggregators (sparing) observe them in that
    /// order.
    pub async fn orchestrate_executions(&mut self, jobs: &[Job]) -> RedundancyResult<()> {
        let partitions = self.partition(jobs);
        let variants: usize = partitions.values().map(Vec::len).sum();
        info!(
            jobs = jobs.len(),
            containers = self.containers.len(),
            devices = partitions.len(),
            variants,
            "Dispatching job variants"
        );

        let backend = self.backend.as_ref();
        let dispatches = partitions
            .iter()
            .map(|(device, variants)| dispatch_device(backend, device, variants));
        let outcomes = try_join_all(dispatches).await?;
        let by_device: HashMap<&DeviceId, DeviceOutcome> =
            partitions.keys().zip(outcomes).collect();

        let mut resolved = Vec::with_capacity(jobs.len() * self.containers.len());
        for job in jobs {
            for container in &self.containers {
                let records = resolve_records(&by_device, job, container)?;
                resolved.push((job, container, records));
            }
        }

        let mut staged = Vec::with_capacity(resolved.len());
        for (job, container, records) in resolved {
            let aggregate = container.aggregate(&records)?;
            debug!(
                job = %job.id,
                container = %container.id(),
                accepted = aggregate.accepted(),
                "Aggregated job"
            );
            staged.push((
                job.id.clone(),
                container.id().clone(),
                OrchestratedResult {
                    aggregate,
                    channels: records,
                },
            ));
        }

        for (job, container, result) in staged {
            self.results.insert(job, container, result);
        }
        Ok(())
    }

    /// Stored result for `job` under `container`.
    pub fn get_result_for(
        &self,
        job: &JobId,
        container: &ContainerId,
    ) -> RedundancyResult<&OrchestratedResult> {
        self.results.get(job, container)
    }

    fn partition(&self, jobs: &[Job]) -> BTreeMap<DeviceId, Vec<JobVariant>> {
        let mut seen = HashSet::new();
        let mut partitions: BTreeMap<DeviceId, Vec<JobVariant>> = BTreeMap::new();
        for job in jobs {
            for container in &self.containers {
                for variant in container.broadcast_and_apply(job) {
                    if seen.insert(variant.id.clone()) {
                        partitions
                            .entry(variant.device.clone())
                            .or_default()
                            .push(variant);
                    }
                }
            }
        }
        partitions
    }
}

/// One record per channel of `container` for `job`, in channel order.
fn resolve_records(
    by_device: &HashMap<&DeviceId, DeviceOutcome>,
    job: &Job,
    container: &FaultTolerantContainer,
) -> RedundancyResult<Vec<MeasurementRecord>> {
    container
        .channels()
        .iter()
        .map(|channel| -> RedundancyResult<MeasurementRecord> {
            let variant = channel.variant_id_for(&job.id);
            let outcome = by_device.get(channel.device()).ok_or_else(|| {
                RedundancyError::lookup(format!(
                    "no outcome for variant {}: device {} was not dispatched",
                    variant,
                    channel.device()
                ))
            })?;
            let counts = outcome.counts_for(&variant)?;
            Ok(MeasurementRecord::from_channel(
                channel.id().clone(),
                counts.clone(),
            ))
        })
        .collect()
}

async fn dispatch_device<B: ExecutionBackend>(
    backend: &B,
    device: &DeviceId,
    variants: &[JobVariant],
) -> RedundancyResult<DeviceOutcome> {
    let size = match backend.max_job_size_for(device) {
        Some(limit) if limit > 0 => limit,
        _ => variants.len().max(1),
    };
    let mut outcome = DeviceOutcome::default();
    for (index, chunk) in variants.chunks(size).enumerate() {
        debug!(
            device = %device,
            chunk = index,
            variants = chunk.len(),
            "Executing chunk"
        );
        for variant in chunk {
            outcome.chunk_of.insert(variant.id.clone(), index);
        }
        outcome.chunks.push(backend.execute_batch(device, chunk).await?);
    }
    Ok(outcome)
}
