//! Comparison-based fault detection.

use super::FaultDetector;
use crate::aggregation::ComparisonGate;
use crate::channel::ChannelId;
use crate::error::RedundancyResult;
use crate::record::MeasurementRecord;

/// Faulty whenever the wrapped gate rejects.
///
/// The gate names its own channels, so the unit's primary is not consulted.
#[derive(Debug, Clone)]
pub struct ComparisonDetector {
    gate: ComparisonGate,
}

impl ComparisonDetector {
    pub fn new(gate: ComparisonGate) -> Self {
        Self { gate }
    }

    pub fn between(primary: ChannelId, comparator: ChannelId) -> Self {
        Self::new(ComparisonGate::new(primary, comparator))
    }

    pub fn gate(&self) -> &ComparisonGate {
        &self.gate
    }
}

impl FaultDetector for ComparisonDetector {
    fn is_faulty(
        &self,
        _primary: &ChannelId,
        records: &[MeasurementRecord],
    ) -> RedundancyResult<bool> {
        Ok(!self.gate.accept(records)?)
    }

    fn required_channels(&self, _primary: &ChannelId) -> Vec<ChannelId> {
        self.gate.channels().into_iter().cloned().collect()
    }
}
