//! Ground-truth evaluation of orchestrated results.
//!
//! Positions are 0-based indices of the expected state in a record's rank, so a
//! position of 0 means the record's most likely state was correct.

use serde::{Deserialize, Serialize};

use crate::channel::{ContainerId, JobId};
use crate::orchestrator::OrchestratedResult;
use crate::record::MeasurementRecord;

/// Position of `ground_truth` in the rank of `record`, `None` if never observed.
pub fn position_of(ground_truth: &str, record: &MeasurementRecord) -> Option<usize> {
    record.rank().iter().position(|state| state.as_str() == ground_truth)
}

/// Positions of one job's expected state under one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub job: JobId,
    pub container: ContainerId,
    pub ground_truth: String,
    /// Per channel, in container channel order.
    pub channel_positions: Vec<Option<usize>>,
    pub aggregate_position: Option<usize>,
    pub accepted: bool,
}

impl ExperimentResult {
    pub fn new(
        job: JobId,
        container: ContainerId,
        ground_truth: impl Into<String>,
        result: &OrchestratedResult,
    ) -> Self {
        let ground_truth = ground_truth.into();
        Self {
            channel_positions: result
                .channels
                .iter()
                .map(|r| position_of(&ground_truth, r))
                .collect(),
            aggregate_position: position_of(&ground_truth, &result.aggregate),
            accepted: result.aggregate.accepted(),
            job,
            container,
            ground_truth,
        }
    }

    /// Mean position over the channels that observed the expected state.
    pub fn avg_position(&self) -> Option<f64> {
        let found: Vec<usize> = self.channel_positions.iter().flatten().copied().collect();
        if found.is_empty() {
            return None;
        }
        Some(found.iter().sum::<usize>() as f64 / found.len() as f64)
    }

    /// Best position reached by any single channel.
    pub fn position_of_closest(&self) -> Option<usize> {
        self.channel_positions.iter().flatten().copied().min()
    }

    pub fn position_of_aggregate(&self) -> Option<usize> {
        self.aggregate_position
    }
}

/// Number of results whose expected state ranked first.
pub fn count_correct(positions: &[Option<usize>]) -> usize {
    positions.iter().filter(|p| **p == Some(0)).count()
}

/// Number of results ranked within their own limit (inclusive).
pub fn count_within(positions: &[Option<usize>], limits: &[usize]) -> usize {
    positions
        .iter()
        .zip(limits)
        .filter(|(p, limit)| p.is_some_and(|p| p <= **limit))
        .count()
}

/// How often a candidate ranks the expected state better than, equal to or worse
/// than a baseline, as fractions of the compared results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionComparison {
    pub better: f64,
    pub equal: f64,
    pub worse: f64,
}

/// Compare `candidate` against `baseline` pairwise. Pairs where either side never
/// observed the expected state are skipped; `None` if nothing was comparable.
pub fn compare_positions(
    baseline: &[Option<usize>],
    candidate: &[Option<usize>],
) -> Option<PositionComparison> {
    let (mut better, mut equal, mut worse) = (0usize, 0usize, 0usize);
    for (base, cand) in baseline.iter().zip(candidate) {
        let (Some(base), Some(cand)) = (base, cand) else {
            continue;
        };
        match cand.cmp(base) {
            std::cmp::Ordering::Less => better += 1,
            std::cmp::Ordering::Equal => equal += 1,
            std::cmp::Ordering::Greater => worse += 1,
        }
    }
    let total = better + equal + worse;
    if total == 0 {
        return None;
    }
    let total = total as f64;
    Some(PositionComparison {
        better: better as f64 / total,
        equal: equal as f64 / total,
        worse: worse as f64 / total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;
    use crate::record::counts_from;

    fn result() -> OrchestratedResult {
        OrchestratedResult {
            aggregate: MeasurementRecord::synthesized(counts_from([("00", 70), ("01", 30)])),
            channels: vec![
                MeasurementRecord::from_channel(ChannelId::new("a"), counts_from([("00", 40), ("01", 60)])),
                MeasurementRecord::from_channel(ChannelId::new("b"), counts_from([("00", 90), ("01", 10)])),
                MeasurementRecord::from_channel(ChannelId::new("c"), counts_from([("01", 10)])),
            ],
        }
    }

    #[test]
    fn test_position_of() {
        let record = MeasurementRecord::synthesized(counts_from([("00", 5), ("10", 9), ("11", 1)]));
        assert_eq!(position_of("10", &record), Some(0));
        assert_eq!(position_of("11", &record), Some(2));
        assert_eq!(position_of("01", &record), None);
    }

    #[test]
    fn test_experiment_result_positions() {
        let r = ExperimentResult::new(JobId::new("j"), ContainerId::new("C"), "00", &result());
        assert_eq!(r.channel_positions, vec![Some(1), Some(0), None]);
        assert_eq!(r.avg_position(), Some(0.5));
        assert_eq!(r.position_of_closest(), Some(0));
        assert_eq!(r.position_of_aggregate(), Some(0));
        assert!(r.accepted);
    }

    #[test]
    fn test_counting_metrics() {
        let positions = [Some(0), Some(3), None, Some(0), Some(1)];
        assert_eq!(count_correct(&positions), 2);
        assert_eq!(count_within(&positions, &[0, 2, 5, 0, 1]), 3);
    }

    #[test]
    fn test_compare_positions() {
        let cmp = compare_positions(&[Some(1), Some(0), Some(2), None], &[Some(0), Some(0), Some(3), Some(0)])
            .unwrap();
        assert!((cmp.better - 1.0 / 3.0).abs() < 1e-9);
        assert!((cmp.equal - 1.0 / 3.0).abs() < 1e-9);
        assert!((cmp.worse - 1.0 / 3.0).abs() < 1e-9);
        assert!(compare_positions(&[None], &[Some(0)]).is_none());
    }
}
