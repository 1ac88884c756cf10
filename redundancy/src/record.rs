//! Measurement records: per-state outcome counts from one channel or one aggregation.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// A measured state, written as a fixed-width bit string (e.g. `"0110"`).
pub type State = String;

/// Outcome counts keyed by state.
pub type Counts = BTreeMap<State, u64>;

/// Outcome of one execution, or a synthesized aggregate when `origin` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    origin: Option<ChannelId>,
    counts: Counts,
    accepted: bool,
}

impl MeasurementRecord {
    /// Record produced by `channel`.
    pub fn from_channel(channel: ChannelId, counts: Counts) -> Self {
        Self {
            origin: Some(channel),
            counts,
            accepted: true,
        }
    }

    /// Record synthesized by an aggregator.
    pub fn synthesized(counts: Counts) -> Self {
        Self {
            origin: None,
            counts,
            accepted: true,
        }
    }

    /// Aggregate with no states at all.
    pub fn empty() -> Self {
        Self::synthesized(Counts::new())
    }

    pub fn with_accepted(mut self, accepted: bool) -> Self {
        self.accepted = accepted;
        self
    }

    pub fn set_accepted(&mut self, accepted: bool) {
        self.accepted = accepted;
    }

    pub fn origin(&self) -> Option<&ChannelId> {
        self.origin.as_ref()
    }

    /// Whether this record came from `channel`.
    pub fn is_from(&self, channel: &ChannelId) -> bool {
        self.origin.as_ref() == Some(channel)
    }

    pub fn counts(&self) -> &Counts {
        &self.counts
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count_for(&self, state: &str) -> u64 {
        self.counts.get(state).copied().unwrap_or(0)
    }

    /// Share of the total observed for `state`; 0 for an empty record.
    pub fn probability_for(&self, state: &str) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.count_for(state) as f64 / total as f64
    }

    /// Probabilities in ascending state order.
    pub fn probabilities(&self) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts
            .values()
            .map(|c| *c as f64 / total as f64)
            .collect()
    }

    /// States by descending count. Equal counts keep ascending state order.
    pub fn rank(&self) -> Vec<&State> {
        let mut states: Vec<(&State, u64)> = self.counts.iter().map(|(s, c)| (s, *c)).collect();
        states.sort_by_key(|(_, count)| Reverse(*count));
        states.into_iter().map(|(s, _)| s).collect()
    }

    pub fn num_distinct_states(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Build a [`Counts`] map from `(state, count)` pairs.
pub fn counts_from<S: Into<State>>(pairs: impl IntoIterator<Item = (S, u64)>) -> Counts {
    pairs.into_iter().map(|(s, c)| (s.into(), c)).collect()
}
