//! Aggregated results per (job, container).

use std::collections::HashMap;

use crate::channel::{ContainerId, JobId};
use crate::error::{RedundancyError, RedundancyResult};
use crate::record::MeasurementRecord;

/// Aggregate of one job under one container, with the channel records it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratedResult {
    pub aggregate: MeasurementRecord,
    pub channels: Vec<MeasurementRecord>,
}

#[derive(Debug, Default)]
pub struct ResultManager {
    results: HashMap<(JobId, ContainerId), OrchestratedResult>,
}

impl ResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result, replacing any earlier one for the same pair.
    pub fn insert(&mut self, job: JobId, container: ContainerId, result: OrchestratedResult) {
        self.results.insert((job, container), result);
    }

    pub fn get(&self, job: &JobId, container: &ContainerId) -> RedundancyResult<&OrchestratedResult> {
        self.results
            .get(&(job.clone(), container.clone()))
            .ok_or_else(|| {
                RedundancyError::lookup(format!(
                    "no result for job {} under container {}",
                    job, container
                ))
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &ContainerId, &OrchestratedResult)> {
        self.results.iter().map(|((j, c), r)| (j, c, r))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
