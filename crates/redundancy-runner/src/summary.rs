//! Per-container run summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use redundancy::evaluation::{compare_positions, count_correct, PositionComparison};
use redundancy::{ContainerId, ExperimentResult};

#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub container: ContainerId,
    pub jobs: usize,
    pub accepted: usize,
    /// Jobs whose aggregate ranked the expected state first.
    pub aggregate_correct: usize,
    /// Jobs where at least one channel ranked the expected state first.
    pub closest_correct: usize,
    pub avg_channel_position: Option<f64>,
    /// Aggregate position against the best single channel.
    pub aggregate_vs_closest: Option<PositionComparison>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: usize,
    pub containers: Vec<ContainerSummary>,
}

/// Group `results` by container, in container id order.
pub fn summarize(results: &[ExperimentResult]) -> Vec<ContainerSummary> {
    let mut grouped: BTreeMap<&ContainerId, Vec<&ExperimentResult>> = BTreeMap::new();
    for result in results {
        grouped.entry(&result.container).or_default().push(result);
    }

    grouped
        .into_iter()
        .map(|(container, results)| {
            let aggregate: Vec<Option<usize>> =
                results.iter().map(|r| r.position_of_aggregate()).collect();
            let closest: Vec<Option<usize>> =
                results.iter().map(|r| r.position_of_closest()).collect();
            let averages: Vec<f64> = results.iter().filter_map(|r| r.avg_position()).collect();
            ContainerSummary {
                container: container.clone(),
                jobs: results.len(),
                accepted: results.iter().filter(|r| r.accepted).count(),
                aggregate_correct: count_correct(&aggregate),
                closest_correct: count_correct(&closest),
                avg_channel_position: (!averages.is_empty())
                    .then(|| averages.iter().sum::<f64>() / averages.len() as f64),
                aggregate_vs_closest: compare_positions(&closest, &aggregate),
            }
        })
        .collect()
}
