//! Identities, jobs and redundancy channels.
//!
//! A [`Channel`] is one redundant execution path. It turns a base [`Job`] into a
//! [`JobVariant`] bound to one device; the variant id embeds both the job id and the
//! channel id so returned outcomes can be traced back to the channel that produced them.
//!
//! Channel identity is the opaque [`ChannelId`] only. The [`ChannelVariation`] and the
//! device are descriptive and never take part in equality.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Opaque channel identity. Serializes as its id string.
    ChannelId
);
string_id!(
    /// Name of the execution device a channel is bound to.
    DeviceId
);
string_id!(
    /// Identity of a base job.
    JobId
);
string_id!(
    /// Identity of a channel-specific job variant.
    VariantId
);
string_id!(
    /// Identity of a fault-tolerant container (the pattern name).
    ContainerId
);

impl ChannelId {
    /// Fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// A unit of work to run redundantly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque program text handed to the execution substrate.
    pub program: String,
}

impl Job {
    pub fn new(id: impl Into<JobId>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
        }
    }
}

/// How a channel derives its variant from the base job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChannelVariation {
    /// Same device, different compilation seed.
    TranspilationSeed { seed: u64 },
    /// A different device with the default compilation settings.
    HeterogeneousDevice,
    /// Same device, different optimization level.
    OptimizationLevel { level: u8 },
}

impl std::fmt::Display for ChannelVariation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TranspilationSeed { seed } => write!(f, "seed-{}", seed),
            Self::HeterogeneousDevice => write!(f, "device"),
            Self::OptimizationLevel { level } => write!(f, "opt-{}", level),
        }
    }
}

/// A job as prepared by one channel for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVariant {
    pub id: VariantId,
    pub source: JobId,
    pub channel: ChannelId,
    pub device: DeviceId,
    pub variation: ChannelVariation,
    pub program: String,
}

/// One redundant execution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    id: ChannelId,
    device: DeviceId,
    variation: ChannelVariation,
}

impl Channel {
    pub fn new(id: ChannelId, device: DeviceId, variation: ChannelVariation) -> Self {
        Self {
            id,
            device,
            variation,
        }
    }

    /// Channel that recompiles the job with a different seed on `device`.
    pub fn varying_seed(device: impl Into<DeviceId>, seed: u64) -> Self {
        Self::new(
            ChannelId::generate(),
            device.into(),
            ChannelVariation::TranspilationSeed { seed },
        )
    }

    /// Channel that runs the job unchanged on another device.
    pub fn heterogeneous_device(device: impl Into<DeviceId>) -> Self {
        Self::new(
            ChannelId::generate(),
            device.into(),
            ChannelVariation::HeterogeneousDevice,
        )
    }

    /// Channel that compiles the job at `level` on `device`.
    pub fn optimization_level(device: impl Into<DeviceId>, level: u8) -> Self {
        Self::new(
            ChannelId::generate(),
            device.into(),
            ChannelVariation::OptimizationLevel { level },
        )
    }

    /// Replace the generated id with a fixed one.
    pub fn with_id(mut self, id: impl Into<ChannelId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn variation(&self) -> ChannelVariation {
        self.variation
    }

    /// Variant id this channel produces for `job`.
    pub fn variant_id_for(&self, job: &JobId) -> VariantId {
        VariantId(format!("{}::{}", job, self.id))
    }

    /// Derive this channel's variant of `job`.
    pub fn apply(&self, job: &Job) -> JobVariant {
        JobVariant {
            id: self.variant_id_for(&job.id),
            source: job.id.clone(),
            channel: self.id.clone(),
            device: self.device.clone(),
            variation: self.variation,
            program: job.program.clone(),
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.id, self.device, self.variation)
    }
}
