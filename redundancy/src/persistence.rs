//! JSON persistence of orchestrated results.
//!
//! Every persisted record carries an explicit `kind` so channel records and
//! aggregates read back unambiguously.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelId, ContainerId, JobId};
use crate::error::{RedundancyError, RedundancyResult};
use crate::orchestrator::{OrchestratedResult, ResultManager};
use crate::record::{Counts, MeasurementRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistedRecord {
    Channel {
        channel: ChannelId,
        counts: Counts,
        accepted: bool,
    },
    Aggregate {
        counts: Counts,
        accepted: bool,
    },
}

impl From<&MeasurementRecord> for PersistedRecord {
    fn from(record: &MeasurementRecord) -> Self {
        match record.origin() {
            Some(channel) => Self::Channel {
                channel: channel.clone(),
                counts: record.counts().clone(),
                accepted: record.accepted(),
            },
            None => Self::Aggregate {
                counts: record.counts().clone(),
                accepted: record.accepted(),
            },
        }
    }
}

impl From<PersistedRecord> for MeasurementRecord {
    fn from(record: PersistedRecord) -> Self {
        match record {
            PersistedRecord::Channel {
                channel,
                counts,
                accepted,
            } => MeasurementRecord::from_channel(channel, counts).with_accepted(accepted),
            PersistedRecord::Aggregate { counts, accepted } => {
                MeasurementRecord::synthesized(counts).with_accepted(accepted)
            }
        }
    }
}

/// One (job, container) result as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedResult {
    pub job: JobId,
    pub container: ContainerId,
    pub aggregate: PersistedRecord,
    pub channels: Vec<PersistedRecord>,
    pub recorded_at: DateTime<Utc>,
}

impl PersistedResult {
    pub fn new(job: JobId, container: ContainerId, result: &OrchestratedResult) -> Self {
        Self {
            job,
            container,
            aggregate: PersistedRecord::from(&result.aggregate),
            channels: result.channels.iter().map(PersistedRecord::from).collect(),
            recorded_at: Utc::now(),
        }
    }

    pub fn to_result(&self) -> OrchestratedResult {
        OrchestratedResult {
            aggregate: self.aggregate.clone().into(),
            channels: self.channels.iter().cloned().map(Into::into).collect(),
        }
    }

    pub fn to_json(&self) -> RedundancyResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> RedundancyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Snapshot every stored result, ordered by job then container.
pub fn snapshot(results: &ResultManager) -> Vec<PersistedResult> {
    let mut snapshot: Vec<PersistedResult> = results
        .iter()
        .map(|(job, container, result)| PersistedResult::new(job.clone(), container.clone(), result))
        .collect();
    snapshot.sort_by(|a, b| (&a.job, &a.container).cmp(&(&b.job, &b.container)));
    snapshot
}

pub fn save_results(path: &Path, results: &[PersistedResult]) -> RedundancyResult<()> {
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json).map_err(|source| RedundancyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_results(path: &Path) -> RedundancyResult<Vec<PersistedResult>> {
    let json = std::fs::read_to_string(path).map_err(|source| RedundancyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}
