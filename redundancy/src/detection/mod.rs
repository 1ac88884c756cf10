//! Fault detectors: predicates that flag a channel's records as untrustworthy.
//!
//! - [`DivergenceDetector`] measures how close the primary record is to a uniform
//!   distribution over the same states and rejects records that are too close
//! - [`ComparisonDetector`] rejects when a comparator channel disagrees

pub mod comparison;
pub mod divergence;

use crate::channel::ChannelId;
use crate::error::RedundancyResult;
use crate::record::MeasurementRecord;

pub use comparison::ComparisonDetector;
pub use divergence::{
    bhattacharyya, cross_entropy, hellinger, jensen_shannon, kl_divergence, shannon_entropy,
    uniform_reference, Divergence, DivergenceDetector,
};

/// Decides whether the records attached to a switch unit indicate a fault.
///
/// `primary` names the unit's primary channel; `records` are every record the unit's
/// channels produced for the current job.
pub trait FaultDetector: Send + Sync + std::fmt::Debug {
    fn is_faulty(&self, primary: &ChannelId, records: &[MeasurementRecord])
        -> RedundancyResult<bool>;

    /// Channels whose records the detector reads for a unit led by `primary`.
    fn required_channels(&self, primary: &ChannelId) -> Vec<ChannelId> {
        vec![primary.clone()]
    }
}
