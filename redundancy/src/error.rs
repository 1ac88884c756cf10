//! Error types shared by every redundancy component.
//!
//! Three families matter to callers:
//! - configuration errors are raised while building a pattern, before anything runs
//! - consistency errors mean an aggregator or switch was handed records that do not
//!   line up with how it was configured
//! - lookup errors mean a result or outcome was requested that was never produced
//!
//! None of them are retried internally.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for redundancy operations
pub type RedundancyResult<T> = Result<T, RedundancyError>;

/// A single violated precondition found while validating a pattern configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    /// A required field was never set.
    #[error("{pattern}: missing required field `{field}`")]
    MissingField {
        pattern: &'static str,
        field: &'static str,
    },

    /// A field was set to a value outside its valid range.
    #[error("{pattern}: invalid value for `{field}`: {reason}")]
    InvalidValue {
        pattern: &'static str,
        field: &'static str,
        reason: String,
    },

    /// Some switch units carry their own detector and others do not.
    #[error(
        "sparing: inconsistent detector assignment ({assigned} of {units} units pre-assigned, shared detector supplied: {shared})"
    )]
    InconsistentDetectors {
        assigned: usize,
        units: usize,
        shared: bool,
    },
}

/// Every issue found while validating one pattern configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigErrors(pub Vec<ConfigIssue>);

impl ConfigErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, issue: ConfigIssue) {
        self.0.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn issues(&self) -> &[ConfigIssue] {
        &self.0
    }

    /// Whether any issue names `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.0.iter().any(|issue| match issue {
            ConfigIssue::MissingField { field: f, .. } | ConfigIssue::InvalidValue { field: f, .. } => {
                *f == field
            }
            ConfigIssue::InconsistentDetectors { .. } => field == "detector",
        })
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ConfigErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ConfigErrors {}

/// Errors that can occur while aggregating, switching or orchestrating
#[derive(Debug, Error)]
pub enum RedundancyError {
    /// Pattern preconditions unmet at build time
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigErrors),

    /// Records handed to a component do not match its configuration
    #[error("Consistency violation: {message}")]
    Consistency { message: String },

    /// A result or outcome that was never produced was requested
    #[error("Lookup failed: {message}")]
    Lookup { message: String },

    /// The execution backend reported a failure for a device
    #[error("Backend failure on {device}: {message}")]
    Backend { device: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RedundancyError {
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }

    pub fn backend(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Wrap a single configuration issue.
    pub fn config(issue: ConfigIssue) -> Self {
        Self::Configuration(ConfigErrors(vec![issue]))
    }

    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
