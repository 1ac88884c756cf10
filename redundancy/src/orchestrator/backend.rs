//! Execution substrate boundary.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::channel::{DeviceId, JobVariant, VariantId};
use crate::error::{RedundancyError, RedundancyResult};
use crate::record::Counts;

/// Runs batches of job variants on named devices.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `variants` on `device` as one batch and return the counts per variant.
    async fn execute_batch(
        &self,
        device: &DeviceId,
        variants: &[JobVariant],
    ) -> RedundancyResult<ResultSet>;

    /// Largest batch `device` accepts; `None` means unbounded.
    fn max_job_size_for(&self, device: &DeviceId) -> Option<usize>;
}

/// Outcomes of one batch, keyed by variant id.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    outcomes: HashMap<VariantId, Counts>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variant: VariantId, counts: Counts) {
        self.outcomes.insert(variant, counts);
    }

    pub fn contains(&self, variant: &VariantId) -> bool {
        self.outcomes.contains_key(variant)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn counts_for(&self, variant: &VariantId) -> RedundancyResult<&Counts> {
        self.outcomes
            .get(variant)
            .ok_or_else(|| RedundancyError::lookup(format!("no outcome for variant {}", variant)))
    }
}

impl FromIterator<(VariantId, Counts)> for ResultSet {
    fn from_iter<I: IntoIterator<Item = (VariantId, Counts)>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}
