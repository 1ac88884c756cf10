//! Runner configuration, loaded from TOML.
//!
//! The path comes from `--config`, then `REDUNDANCY_CONFIG`; with neither set the
//! embedded default is used.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use redundancy::{
    Channel, ChannelId, ChannelVariation, CombinerConfig, ComparisonConfig, ConformalMode,
    ConformalVotingConfig, DeviceId, Divergence, DivergenceDetector, FaultDetector,
    FirstHealthySpare, PatternConfig, SparingConfig, UnitSpec,
};

pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// A simulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    /// Probability that a shot lands on a uniformly random state.
    pub noise: f64,
    /// Largest batch the device accepts; unset means unbounded.
    #[serde(default)]
    pub max_job_size: Option<usize>,
}

/// One channel. At most one of `seed` and `opt_level` may be set; with neither the
/// channel runs the job unchanged on its device.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub device: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub opt_level: Option<u8>,
}

impl ChannelSpec {
    pub fn to_channel(&self) -> Result<Channel> {
        let variation = match (self.seed, self.opt_level) {
            (Some(seed), None) => ChannelVariation::TranspilationSeed { seed },
            (None, Some(level)) => ChannelVariation::OptimizationLevel { level },
            (None, None) => ChannelVariation::HeterogeneousDevice,
            (Some(_), Some(_)) => bail!(
                "channel on {} sets both seed and opt_level",
                self.device
            ),
        };
        let id = match &self.id {
            Some(id) => ChannelId::new(id.as_str()),
            None => ChannelId::generate(),
        };
        Ok(Channel::new(id, DeviceId::new(self.device.as_str()), variation))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorSpec {
    Divergence { measure: Divergence, threshold: f64 },
}

impl DetectorSpec {
    pub fn to_detector(&self) -> Arc<dyn FaultDetector> {
        match self {
            Self::Divergence { measure, threshold } => {
                Arc::new(DivergenceDetector::new(*measure, *threshold))
            }
        }
    }
}

/// Switch unit of a sparing pattern. A comparator turns the unit into a comparison
/// unit judged by agreement with its primary.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    pub primary: ChannelSpec,
    #[serde(default)]
    pub comparator: Option<ChannelSpec>,
    #[serde(default)]
    pub detector: Option<DetectorSpec>,
}

impl UnitConfig {
    fn to_unit(&self) -> Result<UnitSpec> {
        let mut unit = UnitSpec::new(self.primary.to_channel()?);
        if let Some(comparator) = &self.comparator {
            unit = unit.compared_with(comparator.to_channel()?);
        }
        if let Some(detector) = &self.detector {
            unit = unit.with_detector(detector.to_detector());
        }
        Ok(unit)
    }

    fn channels(&self) -> impl Iterator<Item = &ChannelSpec> {
        std::iter::once(&self.primary).chain(self.comparator.iter())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternSpec {
    Combiner {
        id: String,
        channels: Vec<ChannelSpec>,
    },
    Sparing {
        id: String,
        operational: UnitConfig,
        spares: Vec<UnitConfig>,
        #[serde(default)]
        detector: Option<DetectorSpec>,
        #[serde(default)]
        seed: Option<u64>,
    },
    Comparison {
        id: String,
        primary: ChannelSpec,
        comparator: ChannelSpec,
        #[serde(default)]
        top_n: Option<usize>,
    },
    ConformalVoting {
        id: String,
        channels: Vec<ChannelSpec>,
        #[serde(default)]
        top_n_rate: Option<f64>,
        #[serde(default)]
        agreement_multiplier: Option<f64>,
        #[serde(default)]
        conformity_threshold: Option<f64>,
        #[serde(default)]
        mode: ConformalMode,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl PatternSpec {
    pub fn id(&self) -> &str {
        match self {
            Self::Combiner { id, .. }
            | Self::Sparing { id, .. }
            | Self::Comparison { id, .. }
            | Self::ConformalVoting { id, .. } => id,
        }
    }

    fn channels(&self) -> Vec<&ChannelSpec> {
        match self {
            Self::Combiner { channels, .. } | Self::ConformalVoting { channels, .. } => {
                channels.iter().collect()
            }
            Self::Sparing {
                operational,
                spares,
                ..
            } => std::iter::once(operational)
                .chain(spares.iter())
                .flat_map(UnitConfig::channels)
                .collect(),
            Self::Comparison {
                primary,
                comparator,
                ..
            } => vec![primary, comparator],
        }
    }

    /// Library configuration for this pattern. Unseeded patterns use `default_seed`.
    pub fn to_pattern(&self, default_seed: u64) -> Result<PatternConfig> {
        let pattern = match self {
            Self::Combiner { id, channels } => PatternConfig::Combiner(
                CombinerConfig::new(id.as_str())
                    .add_channels(to_channels(channels)?)
                    .combine_uniformly(),
            ),
            Self::Sparing {
                id,
                operational,
                spares,
                detector,
                seed,
            } => {
                let mut config = SparingConfig::new(id.as_str())
                    .with_operational(operational.to_unit()?)
                    .using_switch_policy(Arc::new(FirstHealthySpare))
                    .with_seed(seed.unwrap_or(default_seed));
                for spare in spares {
                    config = config.and_spare(spare.to_unit()?);
                }
                if let Some(detector) = detector {
                    config = config.using_shared_detector(detector.to_detector());
                }
                PatternConfig::Sparing(config)
            }
            Self::Comparison {
                id,
                primary,
                comparator,
                top_n,
            } => {
                let mut config = ComparisonConfig::new(id.as_str())
                    .with_primary(primary.to_channel()?)
                    .with_comparator(comparator.to_channel()?);
                config.top_n = *top_n;
                PatternConfig::Comparison(config)
            }
            Self::ConformalVoting {
                id,
                channels,
                top_n_rate,
                agreement_multiplier,
                conformity_threshold,
                mode,
                seed,
            } => {
                let mut config = ConformalVotingConfig::new(id.as_str())
                    .add_channels(to_channels(channels)?)
                    .with_mode(*mode)
                    .with_seed(seed.unwrap_or(default_seed));
                config.top_n_rate = *top_n_rate;
                config.agreement_multiplier = *agreement_multiplier;
                config.conformity_threshold = *conformity_threshold;
                PatternConfig::ConformalVoting(config)
            }
        };
        Ok(pattern)
    }
}

fn to_channels(specs: &[ChannelSpec]) -> Result<Vec<Channel>> {
    specs.iter().map(ChannelSpec::to_channel).collect()
}

fn default_shots() -> u64 {
    1024
}

fn default_width() -> u32 {
    3
}

fn default_jobs() -> usize {
    10
}

/// Top-level runner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_shots")]
    pub shots: u64,
    /// Bits per measured state.
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default)]
    pub output: Option<PathBuf>,
    pub devices: Vec<DeviceSpec>,
    pub patterns: Vec<PatternSpec>,
}

impl RunnerConfig {
    /// Load from `path`, else from `REDUNDANCY_CONFIG`, else the embedded default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("REDUNDANCY_CONFIG").ok().map(PathBuf::from));
        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::from_toml(DEFAULT_CONFIG).context("Failed to parse embedded config")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).context(format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Structural checks the library cannot make: known devices, usable numbers.
    pub fn validate(&self) -> Result<()> {
        if self.shots == 0 {
            bail!("shots must be greater than zero");
        }
        if self.width == 0 || self.width > 16 {
            bail!("width must be between 1 and 16, got {}", self.width);
        }
        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                bail!("device {} is declared more than once", device.name);
            }
            if !(0.0..=1.0).contains(&device.noise) {
                bail!("device {} has noise {} outside [0, 1]", device.name, device.noise);
            }
        }
        for pattern in &self.patterns {
            for channel in pattern.channels() {
                if !names.contains(channel.device.as_str()) {
                    bail!(
                        "pattern {} uses undeclared device {}",
                        pattern.id(),
                        channel.device
                    );
                }
            }
        }
        Ok(())
    }

    pub fn pattern_configs(&self) -> Result<Vec<PatternConfig>> {
        self.patterns
            .iter()
            .map(|p| {
                p.to_pattern(self.seed)
                    .context(format!("Invalid pattern {}", p.id()))
            })
            .collect()
    }
}
