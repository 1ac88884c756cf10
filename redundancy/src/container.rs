//! Fault-tolerant containers: an id, the channels to run, and how to reconcile them.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::aggregation::Aggregator;
use crate::channel::{Channel, ContainerId, DeviceId, Job, JobVariant};
use crate::error::RedundancyResult;
use crate::record::MeasurementRecord;

/// Immutable bundle produced by a pattern builder.
///
/// Equality and hashing use the id only. Clones share the aggregator, so a sparing
/// container's switch state is shared between clones.
#[derive(Debug, Clone)]
pub struct FaultTolerantContainer {
    id: ContainerId,
    channels: Vec<Channel>,
    aggregator: Arc<dyn Aggregator>,
}

impl FaultTolerantContainer {
    /// Pattern builders validate `channels` before calling this.
    pub(crate) fn new(
        id: ContainerId,
        channels: Vec<Channel>,
        aggregator: Arc<dyn Aggregator>,
    ) -> Self {
        Self {
            id,
            channels,
            aggregator,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn aggregator(&self) -> &Arc<dyn Aggregator> {
        &self.aggregator
    }

    pub fn aggregate(&self, records: &[MeasurementRecord]) -> RedundancyResult<MeasurementRecord> {
        self.aggregator.combine(records)
    }

    /// One variant of `job` per channel, in channel order.
    pub fn broadcast_and_apply(&self, job: &Job) -> Vec<JobVariant> {
        self.channels.iter().map(|c| c.apply(job)).collect()
    }

    /// Every device any channel runs on.
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.channels.iter().map(|c| c.device().clone()).collect()
    }
}

impl PartialEq for FaultTolerantContainer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FaultTolerantContainer {}

impl Hash for FaultTolerantContainer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
