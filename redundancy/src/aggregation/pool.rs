//! Linear opinion pool over raw counts.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::Aggregator;
use crate::channel::ChannelId;
use crate::error::{ConfigIssue, RedundancyError, RedundancyResult};
use crate::record::{Counts, MeasurementRecord};

/// Weighted sum of per-channel counts.
///
/// Pooled values are rounded half away from zero, so `0.5` pools to `1`.
#[derive(Debug, Clone)]
pub struct LinearOpinionPool {
    weights: HashMap<ChannelId, f64>,
}

impl LinearOpinionPool {
    /// Pool with explicit weights. Weights must be finite and non-negative.
    pub fn new(weights: HashMap<ChannelId, f64>) -> RedundancyResult<Self> {
        if weights.is_empty() {
            return Err(RedundancyError::config(ConfigIssue::MissingField {
                pattern: "opinion_pool",
                field: "weights",
            }));
        }
        if let Some((channel, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(RedundancyError::config(ConfigIssue::InvalidValue {
                pattern: "opinion_pool",
                field: "weights",
                reason: format!("weight {} for channel {} is not a non-negative number", w, channel),
            }));
        }
        Ok(Self { weights })
    }

    /// Every channel weighted `1/n`.
    pub fn uniform<'a>(channels: impl IntoIterator<Item = &'a ChannelId>) -> Self {
        let ids: HashSet<&ChannelId> = channels.into_iter().collect();
        let n = ids.len().max(1) as f64;
        let weights = ids.into_iter().map(|id| (id.clone(), 1.0 / n)).collect();
        Self { weights }
    }

    pub fn weight_for(&self, channel: &ChannelId) -> Option<f64> {
        self.weights.get(channel).copied()
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelId> {
        self.weights.keys()
    }

    /// The records must come from exactly the weighted channels, one record each.
    fn check_channels(&self, records: &[MeasurementRecord]) -> RedundancyResult<()> {
        let mut seen: HashSet<&ChannelId> = HashSet::with_capacity(records.len());
        for record in records {
            let origin = record.origin().ok_or_else(|| {
                RedundancyError::consistency("opinion pool received a synthesized record")
            })?;
            if !self.weights.contains_key(origin) {
                return Err(RedundancyError::consistency(format!(
                    "opinion pool has no weight for channel {}",
                    origin
                )));
            }
            if !seen.insert(origin) {
                return Err(RedundancyError::consistency(format!(
                    "opinion pool received more than one record from channel {}",
                    origin
                )));
            }
        }
        if seen.len() != self.weights.len() {
            return Err(RedundancyError::consistency(format!(
                "opinion pool expected records from {} channels, got {}",
                self.weights.len(),
                seen.len()
            )));
        }
        Ok(())
    }
}

impl Aggregator for LinearOpinionPool {
    fn combine(&self, records: &[MeasurementRecord]) -> RedundancyResult<MeasurementRecord> {
        self.check_channels(records)?;

        let states: BTreeSet<&String> = records.iter().flat_map(|r| r.counts().keys()).collect();

        let mut pooled = Counts::new();
        for state in states {
            let value: f64 = records
                .iter()
                .filter_map(|r| {
                    let weight = r.origin().and_then(|c| self.weights.get(c))?;
                    Some(weight * r.count_for(state) as f64)
                })
                .sum();
            pooled.insert(state.clone(), value.round().max(0.0) as u64);
        }

        debug!(
            channels = records.len(),
            states = pooled.len(),
            "Pooled channel records"
        );

        Ok(MeasurementRecord::synthesized(pooled))
    }
}
