//! Divergence-based noise detection against a uniform reference distribution.
//!
//! All distance functions take index-aligned distributions: position `i` of both
//! slices must describe the same state. Terms with a zero probability in the
//! weighting distribution contribute nothing.

use serde::{Deserialize, Serialize};

use super::FaultDetector;
use crate::channel::ChannelId;
use crate::error::{RedundancyError, RedundancyResult};
use crate::record::MeasurementRecord;

fn check_aligned(p: &[f64], q: &[f64]) -> RedundancyResult<()> {
    if p.len() != q.len() {
        return Err(RedundancyError::consistency(format!(
            "distributions are not aligned: {} vs {} states",
            p.len(),
            q.len()
        )));
    }
    Ok(())
}

/// `-Σ p ln p`.
pub fn shannon_entropy(p: &[f64]) -> f64 {
    -p.iter().filter(|pi| **pi > 0.0).map(|pi| pi * pi.ln()).sum::<f64>()
}

/// `Σ p ln(p/q)`.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> RedundancyResult<f64> {
    check_aligned(p, q)?;
    Ok(p.iter()
        .zip(q)
        .filter(|(pi, _)| **pi > 0.0)
        .map(|(pi, qi)| pi * (pi / qi).ln())
        .sum())
}

/// `-Σ p ln q`.
pub fn cross_entropy(p: &[f64], q: &[f64]) -> RedundancyResult<f64> {
    check_aligned(p, q)?;
    Ok(-p
        .iter()
        .zip(q)
        .filter(|(pi, _)| **pi > 0.0)
        .map(|(pi, qi)| pi * qi.ln())
        .sum::<f64>())
}

/// `½ KL(p‖m) + ½ KL(q‖m)` with `m = (p + q) / 2`.
pub fn jensen_shannon(p: &[f64], q: &[f64]) -> RedundancyResult<f64> {
    check_aligned(p, q)?;
    let m: Vec<f64> = p.iter().zip(q).map(|(pi, qi)| (pi + qi) / 2.0).collect();
    Ok(0.5 * kl_divergence(p, &m)? + 0.5 * kl_divergence(q, &m)?)
}

/// `-ln Σ √(p q)`.
pub fn bhattacharyya(p: &[f64], q: &[f64]) -> RedundancyResult<f64> {
    check_aligned(p, q)?;
    let bc: f64 = p.iter().zip(q).map(|(pi, qi)| (pi * qi).sqrt()).sum();
    Ok(-bc.ln())
}

/// `√(½ Σ (√p - √q)²)`, in `[0, 1]`.
pub fn hellinger(p: &[f64], q: &[f64]) -> RedundancyResult<f64> {
    check_aligned(p, q)?;
    let sum: f64 = p
        .iter()
        .zip(q)
        .map(|(pi, qi)| (pi.sqrt() - qi.sqrt()).powi(2))
        .sum();
    Ok((sum / 2.0).sqrt())
}

/// Uniform distribution over `n` states.
pub fn uniform_reference(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// Distance used to compare a record against the uniform reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// Entropy of the record itself; the reference is ignored.
    ShannonEntropy,
    KlDivergence,
    CrossEntropy,
    JensenShannon,
    Bhattacharyya,
    Hellinger,
}

impl Divergence {
    pub fn all() -> &'static [Divergence] {
        &[
            Divergence::ShannonEntropy,
            Divergence::KlDivergence,
            Divergence::CrossEntropy,
            Divergence::JensenShannon,
            Divergence::Bhattacharyya,
            Divergence::Hellinger,
        ]
    }

    pub fn compute(&self, p: &[f64], q: &[f64]) -> RedundancyResult<f64> {
        match self {
            Self::ShannonEntropy => {
                check_aligned(p, q)?;
                Ok(shannon_entropy(p))
            }
            Self::KlDivergence => kl_divergence(p, q),
            Self::CrossEntropy => cross_entropy(p, q),
            Self::JensenShannon => jensen_shannon(p, q),
            Self::Bhattacharyya => bhattacharyya(p, q),
            Self::Hellinger => hellinger(p, q),
        }
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShannonEntropy => write!(f, "shannon_entropy"),
            Self::KlDivergence => write!(f, "kl_divergence"),
            Self::CrossEntropy => write!(f, "cross_entropy"),
            Self::JensenShannon => write!(f, "jensen_shannon"),
            Self::Bhattacharyya => write!(f, "bhattacharyya"),
            Self::Hellinger => write!(f, "hellinger"),
        }
    }
}

/// Rejects a record whose closeness to uniform falls below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceDetector {
    pub divergence: Divergence,
    pub threshold: f64,
}

impl DivergenceDetector {
    pub fn new(divergence: Divergence, threshold: f64) -> Self {
        Self {
            divergence,
            threshold,
        }
    }

    pub fn shannon_entropy(threshold: f64) -> Self {
        Self::new(Divergence::ShannonEntropy, threshold)
    }

    pub fn kl_divergence(threshold: f64) -> Self {
        Self::new(Divergence::KlDivergence, threshold)
    }

    pub fn cross_entropy(threshold: f64) -> Self {
        Self::new(Divergence::CrossEntropy, threshold)
    }

    pub fn jensen_shannon(threshold: f64) -> Self {
        Self::new(Divergence::JensenShannon, threshold)
    }

    pub fn bhattacharyya(threshold: f64) -> Self {
        Self::new(Divergence::Bhattacharyya, threshold)
    }

    pub fn hellinger(threshold: f64) -> Self {
        Self::new(Divergence::Hellinger, threshold)
    }

    /// Distance between `record` and the uniform distribution over its states.
    pub fn closeness(&self, record: &MeasurementRecord) -> RedundancyResult<f64> {
        let p = record.probabilities();
        let q = uniform_reference(p.len());
        self.divergence.compute(&p, &q)
    }

    pub fn reject(&self, record: &MeasurementRecord) -> RedundancyResult<bool> {
        Ok(self.closeness(record)? < self.threshold)
    }

    pub fn accept(&self, record: &MeasurementRecord) -> RedundancyResult<bool> {
        Ok(!self.reject(record)?)
    }
}

impl FaultDetector for DivergenceDetector {
    fn is_faulty(
        &self,
        primary: &ChannelId,
        records: &[MeasurementRecord],
    ) -> RedundancyResult<bool> {
        let record = records.iter().find(|r| r.is_from(primary)).ok_or_else(|| {
            RedundancyError::consistency(format!(
                "divergence detector has no record from primary channel {}",
                primary
            ))
        })?;
        self.reject(record)
    }
}
