//! Validation and wiring of pattern configurations into containers.
//!
//! Every function collects all issues it finds before returning, so a caller sees
//! the full list of problems with a configuration at once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::config::{
    CombinerConfig, ComparisonConfig, ConformalVotingConfig, SparingConfig, UnitSpec,
};
use crate::aggregation::{
    ComparisonAggregator, ComparisonGate, ConformalDefaults, ConformalVotingAggregator,
    LinearOpinionPool,
};
use crate::channel::{Channel, ChannelId, ContainerId};
use crate::container::FaultTolerantContainer;
use crate::detection::FaultDetector;
use crate::error::{ConfigErrors, ConfigIssue};
use crate::switch::{RedundancySwitch, SparingAggregator, SwitchUnit};

fn check_id(pattern: &'static str, id: &str, errors: &mut ConfigErrors) {
    if id.trim().is_empty() {
        errors.push(ConfigIssue::MissingField { pattern, field: "id" });
    }
}

fn check_unique<'a>(
    pattern: &'static str,
    field: &'static str,
    channels: impl IntoIterator<Item = &'a Channel>,
    errors: &mut ConfigErrors,
) {
    let mut seen = HashSet::new();
    for channel in channels {
        if !seen.insert(channel.id()) {
            errors.push(ConfigIssue::InvalidValue {
                pattern,
                field,
                reason: format!("channel {} appears more than once", channel.id()),
            });
        }
    }
}

fn check_fraction(
    pattern: &'static str,
    field: &'static str,
    value: Option<f64>,
    allow_zero: bool,
    errors: &mut ConfigErrors,
) {
    let Some(value) = value else {
        return;
    };
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !lower_ok || value > 1.0 {
        let range = if allow_zero { "[0, 1]" } else { "(0, 1]" };
        errors.push(ConfigIssue::InvalidValue {
            pattern,
            field,
            reason: format!("{} is outside {}", value, range),
        });
    }
}

/// Combiner: at least one channel, and an aggregator or uniform pooling.
pub fn validate_combiner(config: CombinerConfig) -> Result<FaultTolerantContainer, ConfigErrors> {
    const PATTERN: &str = "combiner";
    let mut errors = ConfigErrors::new();
    check_id(PATTERN, &config.id, &mut errors);
    if config.channels.is_empty() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "channels",
        });
    }
    check_unique(PATTERN, "channels", &config.channels, &mut errors);
    if config.aggregator.is_none() && !config.uniform_weights {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "aggregator",
        });
    }
    errors.into_result()?;

    let aggregator = match config.aggregator {
        Some(aggregator) => aggregator,
        None => Arc::new(LinearOpinionPool::uniform(
            config.channels.iter().map(Channel::id),
        )),
    };
    debug!(id = %config.id, channels = config.channels.len(), "Built combiner pattern");
    Ok(FaultTolerantContainer::new(
        ContainerId::new(config.id),
        config.channels,
        aggregator,
    ))
}

/// Sparing: operational unit, at least one spare, a switch policy, and detectors
/// assigned either to every unit or to none (with one shared detector).
pub fn validate_sparing(config: SparingConfig) -> Result<FaultTolerantContainer, ConfigErrors> {
    const PATTERN: &str = "sparing";
    let mut errors = ConfigErrors::new();
    check_id(PATTERN, &config.id, &mut errors);
    if config.operational.is_none() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "operational",
        });
    }
    if config.spares.is_empty() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "spares",
        });
    }
    if config.switch_policy.is_none() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "switch_policy",
        });
    }

    let units = config.units().count();
    let assigned = config.units().filter(|u| u.detector.is_some()).count();
    let shared = config.shared_detector.is_some();
    let fully_shared = assigned == 0 && shared;
    let fully_assigned = assigned == units && !shared;
    if units > 0 && !(fully_shared || fully_assigned) {
        errors.push(ConfigIssue::InconsistentDetectors {
            assigned,
            units,
            shared,
        });
    }
    for unit in config.units() {
        let Some(detector) = unit.detector.as_ref().or(config.shared_detector.as_ref()) else {
            continue;
        };
        let unit_channels: HashSet<&ChannelId> = unit.channels().map(Channel::id).collect();
        for required in detector.required_channels(unit.primary.id()) {
            if !unit_channels.contains(&required) {
                errors.push(ConfigIssue::InvalidValue {
                    pattern: PATTERN,
                    field: "detector",
                    reason: format!(
                        "detector of unit {} reads channel {} outside the unit",
                        unit.primary.id(),
                        required
                    ),
                });
            }
        }
    }
    check_unique(
        PATTERN,
        "spares",
        config.units().flat_map(UnitSpec::channels),
        &mut errors,
    );

    let SparingConfig {
        id,
        operational,
        spares,
        shared_detector,
        switch_policy,
        seed,
    } = config;
    let (operational, policy) = match (operational, switch_policy) {
        (Some(operational), Some(policy)) if errors.is_empty() => (operational, policy),
        _ => return Err(errors),
    };

    let to_unit = |spec: UnitSpec| -> Result<SwitchUnit, ConfigErrors> {
        let detector: Arc<dyn FaultDetector> = spec
            .detector
            .or_else(|| shared_detector.clone())
            .ok_or_else(|| {
                ConfigErrors(vec![ConfigIssue::MissingField {
                    pattern: PATTERN,
                    field: "detector",
                }])
            })?;
        Ok(SwitchUnit::new(spec.primary, detector).with_secondaries(spec.secondaries))
    };
    let operational = to_unit(operational)?;
    let spares = spares
        .into_iter()
        .map(to_unit)
        .collect::<Result<Vec<_>, _>>()?;

    let switch = RedundancySwitch::new(operational, spares, policy, seed);
    let channels = switch.channels();
    debug!(
        id = %id,
        units,
        channels = channels.len(),
        shared_detector = shared,
        "Built sparing pattern"
    );
    Ok(FaultTolerantContainer::new(
        ContainerId::new(id),
        channels,
        Arc::new(SparingAggregator::new(switch)),
    ))
}

/// Comparison: a primary, a distinct comparator and a positive match count if given.
pub fn validate_comparison(
    config: ComparisonConfig,
) -> Result<FaultTolerantContainer, ConfigErrors> {
    const PATTERN: &str = "comparison";
    let mut errors = ConfigErrors::new();
    check_id(PATTERN, &config.id, &mut errors);
    if config.primary.is_none() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "primary",
        });
    }
    if config.comparator.is_none() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "comparator",
        });
    }
    if let (Some(p), Some(c)) = (&config.primary, &config.comparator) {
        if p == c {
            errors.push(ConfigIssue::InvalidValue {
                pattern: PATTERN,
                field: "comparator",
                reason: "comparator must differ from the primary channel".to_string(),
            });
        }
    }
    if config.top_n == Some(0) {
        errors.push(ConfigIssue::InvalidValue {
            pattern: PATTERN,
            field: "top_n",
            reason: "must be greater than zero".to_string(),
        });
    }

    let (primary, comparator) = match (config.primary, config.comparator) {
        (Some(primary), Some(comparator)) if errors.is_empty() => (primary, comparator),
        _ => return Err(errors),
    };
    let mut gate = ComparisonGate::new(primary.id().clone(), comparator.id().clone());
    if let Some(top_n) = config.top_n {
        gate = gate.with_top_n(top_n).map_err(|_| {
            ConfigErrors(vec![ConfigIssue::InvalidValue {
                pattern: PATTERN,
                field: "top_n",
                reason: "must be greater than zero".to_string(),
            }])
        })?;
    }
    debug!(id = %config.id, top_n = ?config.top_n, "Built comparison pattern");
    Ok(FaultTolerantContainer::new(
        ContainerId::new(config.id),
        vec![primary, comparator],
        Arc::new(ComparisonAggregator::new(gate)),
    ))
}

/// Conformal voting: at least one channel; unset constants fall back to
/// [`ConformalDefaults`].
pub fn validate_conformal_voting(
    config: ConformalVotingConfig,
) -> Result<FaultTolerantContainer, ConfigErrors> {
    const PATTERN: &str = "conformal_voting";
    let mut errors = ConfigErrors::new();
    check_id(PATTERN, &config.id, &mut errors);
    if config.channels.is_empty() {
        errors.push(ConfigIssue::MissingField {
            pattern: PATTERN,
            field: "channels",
        });
    }
    check_unique(PATTERN, "channels", &config.channels, &mut errors);
    check_fraction(PATTERN, "top_n_rate", config.top_n_rate, false, &mut errors);
    check_fraction(
        PATTERN,
        "agreement_multiplier",
        config.agreement_multiplier,
        false,
        &mut errors,
    );
    check_fraction(
        PATTERN,
        "conformity_threshold",
        config.conformity_threshold,
        true,
        &mut errors,
    );
    errors.into_result()?;

    let defaults = ConformalDefaults::default();
    let settings = ConformalDefaults {
        top_n_rate: config.top_n_rate.unwrap_or(defaults.top_n_rate),
        agreement_multiplier: config
            .agreement_multiplier
            .unwrap_or(defaults.agreement_multiplier),
        conformity_threshold: config
            .conformity_threshold
            .unwrap_or(defaults.conformity_threshold),
    };
    let ids = config.channels.iter().map(|c| c.id().clone()).collect();
    debug!(
        id = %config.id,
        channels = config.channels.len(),
        top_n_rate = settings.top_n_rate,
        conformity_threshold = settings.conformity_threshold,
        mode = ?config.mode,
        "Built conformal voting pattern"
    );
    let aggregator =
        ConformalVotingAggregator::new(ids, settings, config.seed).with_mode(config.mode);
    Ok(FaultTolerantContainer::new(
        ContainerId::new(config.id),
        config.channels,
        Arc::new(aggregator),
    ))
}
