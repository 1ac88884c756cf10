//! Per-pattern configuration values.
//!
//! Each struct collects what one pattern kind needs. Nothing is checked here;
//! [`super::validate`] turns a configuration into a container or a list of issues.

use std::sync::Arc;

use crate::aggregation::{Aggregator, ConformalMode};
use crate::channel::Channel;
use crate::detection::{ComparisonDetector, FaultDetector};
use crate::switch::SwitchPolicy;

/// Pool every channel's records with one aggregator.
#[derive(Debug, Clone, Default)]
pub struct CombinerConfig {
    pub id: String,
    pub channels: Vec<Channel>,
    pub aggregator: Option<Arc<dyn Aggregator>>,
    /// Use a uniform linear opinion pool when no aggregator is set.
    pub uniform_weights: bool,
}

impl CombinerConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn add_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn add_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels.extend(channels);
        self
    }

    pub fn combine_with(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn combine_uniformly(mut self) -> Self {
        self.uniform_weights = true;
        self
    }
}

/// One switch unit before validation.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub primary: Channel,
    pub secondaries: Vec<Channel>,
    pub detector: Option<Arc<dyn FaultDetector>>,
}

impl UnitSpec {
    pub fn new(primary: Channel) -> Self {
        Self {
            primary,
            secondaries: Vec::new(),
            detector: None,
        }
    }

    pub fn with_secondary(mut self, channel: Channel) -> Self {
        self.secondaries.push(channel);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn FaultDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Pair the primary with `comparator` and judge the unit by their agreement.
    pub fn compared_with(self, comparator: Channel) -> Self {
        let detector = ComparisonDetector::between(self.primary.id().clone(), comparator.id().clone());
        self.with_secondary(comparator).with_detector(Arc::new(detector))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }
}

/// Primary/spare failover.
///
/// Detectors are either all per-unit or one shared detector for every unit.
#[derive(Debug, Clone, Default)]
pub struct SparingConfig {
    pub id: String,
    pub operational: Option<UnitSpec>,
    pub spares: Vec<UnitSpec>,
    pub shared_detector: Option<Arc<dyn FaultDetector>>,
    pub switch_policy: Option<Arc<dyn SwitchPolicy>>,
    /// Seed for the random spare fallback; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl SparingConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_operational(mut self, unit: UnitSpec) -> Self {
        self.operational = Some(unit);
        self
    }

    pub fn and_spare(mut self, unit: UnitSpec) -> Self {
        self.spares.push(unit);
        self
    }

    pub fn using_shared_detector(mut self, detector: Arc<dyn FaultDetector>) -> Self {
        self.shared_detector = Some(detector);
        self
    }

    pub fn using_switch_policy(mut self, policy: Arc<dyn SwitchPolicy>) -> Self {
        self.switch_policy = Some(policy);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Operational unit followed by the spares.
    pub fn units(&self) -> impl Iterator<Item = &UnitSpec> {
        self.operational.iter().chain(self.spares.iter())
    }
}

/// Primary accepted only when a comparator agrees on the top-N states.
#[derive(Debug, Clone, Default)]
pub struct ComparisonConfig {
    pub id: String,
    pub primary: Option<Channel>,
    pub comparator: Option<Channel>,
    /// Match count; derived from the primary record when unset.
    pub top_n: Option<usize>,
}

impl ComparisonConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_primary(mut self, channel: Channel) -> Self {
        self.primary = Some(channel);
        self
    }

    pub fn with_comparator(mut self, channel: Channel) -> Self {
        self.comparator = Some(channel);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }
}

/// Majority voting (or agreement-weighted pooling) over conformal sets.
#[derive(Debug, Clone, Default)]
pub struct ConformalVotingConfig {
    pub id: String,
    pub channels: Vec<Channel>,
    pub top_n_rate: Option<f64>,
    pub agreement_multiplier: Option<f64>,
    pub conformity_threshold: Option<f64>,
    pub mode: ConformalMode,
    /// Seed for the random tie-break; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl ConformalVotingConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn add_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn add_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels.extend(channels);
        self
    }

    pub fn with_top_n_rate(mut self, rate: f64) -> Self {
        self.top_n_rate = Some(rate);
        self
    }

    pub fn with_agreement_multiplier(mut self, multiplier: f64) -> Self {
        self.agreement_multiplier = Some(multiplier);
        self
    }

    pub fn with_conformity_threshold(mut self, threshold: f64) -> Self {
        self.conformity_threshold = Some(threshold);
        self
    }

    pub fn with_mode(mut self, mode: ConformalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
