//! Comparison gate: accept a primary record only when a comparator agrees on its top-N.

use tracing::debug;

use super::conformal::{top_n_for, ConformalSet};
use super::Aggregator;
use crate::channel::ChannelId;
use crate::error::{ConfigIssue, RedundancyError, RedundancyResult};
use crate::record::MeasurementRecord;

/// Fraction of the primary record's distinct states compared when no explicit
/// match count is configured.
pub const DEFAULT_TOP_N_RATE: f64 = 0.25;

/// Full top-N agreement check between two named channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonGate {
    primary: ChannelId,
    comparator: ChannelId,
    top_n: Option<usize>,
}

impl ComparisonGate {
    pub fn new(primary: ChannelId, comparator: ChannelId) -> Self {
        Self {
            primary,
            comparator,
            top_n: None,
        }
    }

    /// Compare exactly `top_n` states. Zero is rejected.
    pub fn with_top_n(mut self, top_n: usize) -> RedundancyResult<Self> {
        if top_n == 0 {
            return Err(RedundancyError::config(ConfigIssue::InvalidValue {
                pattern: "comparison",
                field: "top_n",
                reason: "must be greater than zero".to_string(),
            }));
        }
        self.top_n = Some(top_n);
        Ok(self)
    }

    pub fn primary(&self) -> &ChannelId {
        &self.primary
    }

    pub fn comparator(&self) -> &ChannelId {
        &self.comparator
    }

    pub fn channels(&self) -> [&ChannelId; 2] {
        [&self.primary, &self.comparator]
    }

    /// The primary and comparator records, in that order. Records from any other
    /// channel are ignored.
    pub fn locate<'a>(
        &self,
        records: &'a [MeasurementRecord],
    ) -> RedundancyResult<(&'a MeasurementRecord, &'a MeasurementRecord)> {
        let find = |channel: &ChannelId, role: &str| {
            let mut matching = records.iter().filter(|r| r.is_from(channel));
            match (matching.next(), matching.next()) {
                (Some(record), None) => Ok(record),
                (None, _) => Err(RedundancyError::consistency(format!(
                    "comparison has no record from {} channel {}",
                    role, channel
                ))),
                (Some(_), Some(_)) => Err(RedundancyError::consistency(format!(
                    "comparison received several records from {} channel {}",
                    role, channel
                ))),
            }
        };
        Ok((find(&self.primary, "primary")?, find(&self.comparator, "comparator")?))
    }

    /// Accept iff both top-N sets have the same size and fully intersect.
    pub fn accept(&self, records: &[MeasurementRecord]) -> RedundancyResult<bool> {
        let (primary, comparator) = self.locate(records)?;
        let n = self
            .top_n
            .unwrap_or_else(|| top_n_for(DEFAULT_TOP_N_RATE, primary.num_distinct_states()));

        let ours = ConformalSet::top_n_of(primary, n)?;
        let theirs = ConformalSet::top_n_of(comparator, n)?;
        let matches = ours.intersection(&theirs).len();
        let accepted = ours.len() == theirs.len() && matches == ours.len();

        debug!(
            primary = %self.primary,
            comparator = %self.comparator,
            top_n = n,
            matches,
            accepted,
            "Comparison gate evaluated"
        );
        Ok(accepted)
    }
}

/// Container aggregation that returns the primary record, marked accepted only when
/// the comparator agrees with it.
#[derive(Debug, Clone)]
pub struct ComparisonAggregator {
    gate: ComparisonGate,
}

impl ComparisonAggregator {
    pub fn new(gate: ComparisonGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &ComparisonGate {
        &self.gate
    }
}

impl Aggregator for ComparisonAggregator {
    fn combine(&self, records: &[MeasurementRecord]) -> RedundancyResult<MeasurementRecord> {
        let accepted = self.gate.accept(records)?;
        let (primary, _) = self.gate.locate(records)?;
        Ok(primary.clone().with_accepted(accepted))
    }
}
