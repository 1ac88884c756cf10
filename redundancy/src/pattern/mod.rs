//! Pattern builders.
//!
//! A pattern is described by a tagged [`PatternConfig`] and validated by one free
//! function per kind. Validation either yields a [`FaultTolerantContainer`] or the
//! full list of [`ConfigIssue`](crate::error::ConfigIssue)s, each naming its field.
//!
//! | Kind | Aggregation |
//! |------|-------------|
//! | Combiner | linear opinion pool or a caller-supplied aggregator |
//! | Sparing | redundancy switch over operational and spare units |
//! | Comparison | primary accepted on full top-N agreement with a comparator |
//! | Conformal voting | majority vote or weighted pooling over conformal sets, gated by conformity |
//!
//! # Usage
//!
//! ```ignore
//! let container = PatternConfig::Combiner(
//!     CombinerConfig::new("C_seed")
//!         .add_channel(Channel::varying_seed("fake_brooklyn", 11))
//!         .add_channel(Channel::varying_seed("fake_brooklyn", 12))
//!         .combine_uniformly(),
//! )
//! .build()?;
//! ```

pub mod config;
pub mod validate;

pub use config::{
    CombinerConfig, ComparisonConfig, ConformalVotingConfig, SparingConfig, UnitSpec,
};
pub use validate::{
    validate_combiner, validate_comparison, validate_conformal_voting, validate_sparing,
};

use crate::container::FaultTolerantContainer;
use crate::error::{ConfigErrors, RedundancyResult};

/// Configuration of one pattern, tagged by kind.
#[derive(Debug, Clone)]
pub enum PatternConfig {
    Combiner(CombinerConfig),
    Sparing(SparingConfig),
    Comparison(ComparisonConfig),
    ConformalVoting(ConformalVotingConfig),
}

impl PatternConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Combiner(_) => "combiner",
            Self::Sparing(_) => "sparing",
            Self::Comparison(_) => "comparison",
            Self::ConformalVoting(_) => "conformal_voting",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Combiner(c) => &c.id,
            Self::Sparing(c) => &c.id,
            Self::Comparison(c) => &c.id,
            Self::ConformalVoting(c) => &c.id,
        }
    }

    pub fn build(self) -> RedundancyResult<FaultTolerantContainer> {
        Ok(build_pattern(self)?)
    }
}

/// Validate `config` and wire its container.
pub fn build_pattern(config: PatternConfig) -> Result<FaultTolerantContainer, ConfigErrors> {
    match config {
        PatternConfig::Combiner(c) => validate_combiner(c),
        PatternConfig::Sparing(c) => validate_sparing(c),
        PatternConfig::Comparison(c) => validate_comparison(c),
        PatternConfig::ConformalVoting(c) => validate_conformal_voting(c),
    }
}
