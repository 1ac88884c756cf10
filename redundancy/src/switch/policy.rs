//! Spare selection policies.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::warn;

use super::SwitchUnit;
use crate::error::{RedundancyError, RedundancyResult};

/// Chooses which spare replaces a faulty operational unit.
///
/// Returns an index into `spares`. Spares already carry the current job's records.
pub trait SwitchPolicy: Send + Sync + std::fmt::Debug {
    fn select(&self, spares: &[SwitchUnit], rng: &mut StdRng) -> RedundancyResult<usize>;
}

/// First spare whose own detector reports no fault, in list order.
///
/// When every spare is faulty one is picked uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstHealthySpare;

impl SwitchPolicy for FirstHealthySpare {
    fn select(&self, spares: &[SwitchUnit], rng: &mut StdRng) -> RedundancyResult<usize> {
        if spares.is_empty() {
            return Err(RedundancyError::consistency("redundancy switch has no spares"));
        }
        for (index, spare) in spares.iter().enumerate() {
            if !spare.fault_detected()? {
                return Ok(index);
            }
        }
        let index = rng.gen_range(0..spares.len());
        warn!(
            spares = spares.len(),
            chosen = %spares[index].primary().id(),
            "Every spare is faulty; choosing at random"
        );
        Ok(index)
    }
}
