//! Redundancy Library
//!
//! Runs each job through several redundant execution channels and reconciles what
//! they return.
//!
//! # Features
//!
//! ## Aggregation
//! - Linear opinion pooling of outcome counts
//! - Conformal voting: top-N agreement between channels, majority vote, conformity gate
//! - Comparison gate: accept a primary only when a comparator fully agrees
//!
//! ## Fault handling
//! - Divergence-based and comparison-based fault detectors
//! - Redundancy switch: operational/spare failover that persists across jobs
//!
//! ## Orchestration
//! - Pattern builders that validate a configuration into a container
//! - Capacity-aware dispatch of job variants per device through an [`ExecutionBackend`]
//! - Result lookup per (job, container), JSON persistence and ground-truth evaluation
//!
//! # Usage
//!
//! ```ignore
//! let container = PatternConfig::Combiner(
//!     CombinerConfig::new("C_seed")
//!         .add_channel(Channel::varying_seed("fake_brooklyn", 1))
//!         .add_channel(Channel::varying_seed("fake_brooklyn", 2))
//!         .combine_uniformly(),
//! )
//! .build()?;
//!
//! let mut orchestrator = Orchestrator::new(Arc::new(backend), [container.clone()]);
//! orchestrator.orchestrate_executions(&jobs).await?;
//! let result = orchestrator.get_result_for(&jobs[0].id, container.id())?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod aggregation;
pub mod channel;
pub mod container;
pub mod detection;
pub mod error;
pub mod evaluation;
pub mod orchestrator;
pub mod pattern;
pub mod persistence;
pub mod record;
pub mod switch;

// Re-export key types
pub use aggregation::{
    Aggregator, ComparisonAggregator, ComparisonGate, ConformalDefaults, ConformalMode,
    ConformalVotingAggregator, LinearOpinionPool,
};
pub use channel::{
    Channel, ChannelId, ChannelVariation, ContainerId, DeviceId, Job, JobId, JobVariant,
    VariantId,
};
pub use container::FaultTolerantContainer;
pub use detection::{ComparisonDetector, Divergence, DivergenceDetector, FaultDetector};
pub use error::{ConfigErrors, ConfigIssue, RedundancyError, RedundancyResult};
pub use evaluation::ExperimentResult;
pub use orchestrator::{
    ExecutionBackend, OrchestratedResult, Orchestrator, ResultManager, ResultSet,
};
pub use pattern::{
    build_pattern, CombinerConfig, ComparisonConfig, ConformalVotingConfig, PatternConfig,
    SparingConfig, UnitSpec,
};
pub use persistence::{load_results, save_results, PersistedRecord, PersistedResult};
pub use record::{counts_from, Counts, MeasurementRecord, State};
pub use switch::{FirstHealthySpare, RedundancySwitch, SparingAggregator, SwitchPolicy, SwitchUnit};
