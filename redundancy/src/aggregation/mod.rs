//! Aggregators: reconcile per-channel records into one record.
//!
//! # Families
//!
//! - **Opinion pool**: weighted linear pooling of raw counts ([`LinearOpinionPool`])
//! - **Conformal agreement**: pairwise agreement of top-N sets, either as a majority
//!   vote ([`ConformalVotingAggregator`]) or as agreement-weighted pooling
//!   ([`WeightedConformalAggregation`])
//! - **Comparison**: accept the primary record only when a comparator fully agrees
//!   with it ([`ComparisonAggregator`])
//!
//! The failover family lives in [`crate::switch`] and is exposed through the same
//! [`Aggregator`] trait by [`crate::switch::SparingAggregator`].

pub mod comparison;
pub mod conformal;
pub mod pool;

use crate::error::RedundancyResult;
use crate::record::MeasurementRecord;

pub use comparison::{ComparisonAggregator, ComparisonGate, DEFAULT_TOP_N_RATE};
pub use conformal::{
    agreement_threshold_for, conformity_score, logistic, pairs, top_n_for, ConformalDefaults,
    ConformalMode, ConformalSet, ConformalVotingAggregator, MajorityVoting, Pairs,
    WeightedConformalAggregation,
};
pub use pool::LinearOpinionPool;

/// Combines the records of one job's channels into a single record.
///
/// Implementations must fail rather than produce a partial aggregate when the records
/// do not match the channels they were configured for.
pub trait Aggregator: Send + Sync + std::fmt::Debug {
    fn combine(&self, records: &[MeasurementRecord]) -> RedundancyResult<MeasurementRecord>;
}
