//! Deterministic noisy sampler standing in for real devices.
//!
//! Every job program has one ideal state, taken from the blake3 hash of its text. A
//! shot returns that state, or with the device's noise probability a uniformly random
//! state. Each variant is sampled from its own RNG seeded by its id and the run seed,
//! so a run is reproducible regardless of batching or dispatch order.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use redundancy::{
    ChannelVariation, Counts, DeviceId, ExecutionBackend, JobVariant, RedundancyError,
    RedundancyResult, ResultSet,
};

use crate::config::{DeviceSpec, RunnerConfig};

fn hash_u64(text: &str) -> u64 {
    let hash = blake3::hash(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

fn format_state(value: u64, width: u32) -> String {
    format!("{:0width$b}", value, width = width as usize)
}

/// The noise-free outcome of `program` as a `width`-bit state.
pub fn ideal_state(program: &str, width: u32) -> String {
    format_state(hash_u64(program) % (1u64 << width), width)
}

/// Noise after the channel's compilation choices: seeds jitter it slightly, higher
/// optimization levels reduce it.
fn effective_noise(noise: f64, variation: ChannelVariation) -> f64 {
    let factor = match variation {
        ChannelVariation::TranspilationSeed { seed } => 0.9 + (seed % 5) as f64 * 0.05,
        ChannelVariation::HeterogeneousDevice => 1.0,
        ChannelVariation::OptimizationLevel { level } => 1.0 - f64::from(level.min(3)) * 0.1,
    };
    (noise * factor).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    devices: HashMap<DeviceId, DeviceSpec>,
    shots: u64,
    width: u32,
    seed: u64,
}

impl SimulatedBackend {
    pub fn new(devices: impl IntoIterator<Item = DeviceSpec>, shots: u64, width: u32, seed: u64) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|d| (DeviceId::new(d.name.as_str()), d))
                .collect(),
            shots,
            width,
            seed,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.devices.iter().cloned(), config.shots, config.width, config.seed)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    fn sample(&self, device: &DeviceSpec, variant: &JobVariant) -> Counts {
        let ideal = ideal_state(&variant.program, self.width);
        let noise = effective_noise(device.noise, variant.variation);
        let states = 1u64 << self.width;
        let mut rng = StdRng::seed_from_u64(hash_u64(variant.id.as_str()) ^ self.seed);

        let mut counts = Counts::new();
        for _ in 0..self.shots {
            let state = if rng.gen::<f64>() < noise {
                format_state(rng.gen_range(0..states), self.width)
            } else {
                ideal.clone()
            };
            *counts.entry(state).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn execute_batch(
        &self,
        device: &DeviceId,
        variants: &[JobVariant],
    ) -> RedundancyResult<ResultSet> {
        let spec = self
            .devices
            .get(device)
            .ok_or_else(|| RedundancyError::backend(device.as_str(), "unknown device"))?;
        if let Some(limit) = spec.max_job_size.filter(|l| *l > 0) {
            if variants.len() > limit {
                return Err(RedundancyError::backend(
                    device.as_str(),
                    format!("batch of {} exceeds capacity {}", variants.len(), limit),
                ));
            }
        }
        debug!(device = %device, variants = variants.len(), "Simulating batch");
        Ok(variants
            .iter()
            .map(|v| (v.id.clone(), self.sample(spec, v)))
            .collect())
    }

    fn max_job_size_for(&self, device: &DeviceId) -> Option<usize> {
        self.devices.get(device).and_then(|d| d.max_job_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redundancy::{Channel, Job};

    fn device(name: &str, noise: f64, max_job_size: Option<usize>) -> DeviceSpec {
        DeviceSpec {
            name: name.to_string(),
            noise,
            max_job_size,
        }
    }

    #[test]
    fn test_ideal_state_is_stable_and_sized() {
        let a = ideal_state("prog-1", 4);
        assert_eq!(a.len(), 4);
        assert!(a.chars().all(|c| c == '0' || c == '1'));
        assert_eq!(a, ideal_state("prog-1", 4));
    }

    #[tokio::test]
    async fn test_noiseless_device_returns_ideal_state_only() {
        let backend = SimulatedBackend::new([device("dev", 0.0, None)], 100, 3, 1);
        let variant = Channel::heterogeneous_device("dev").apply(&Job::new("j", "prog"));
        let set = backend
            .execute_batch(&DeviceId::new("dev"), &[variant.clone()])
            .await
            .unwrap();
        let counts = set.counts_for(&variant.id).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&ideal_state("prog", 3)], 100);
    }

    #[tokio::test]
    async fn test_sampling_is_reproducible() {
        let backend = SimulatedBackend::new([device("dev", 0.5, None)], 200, 3, 9);
        let variant = Channel::varying_seed("dev", 2).apply(&Job::new("j", "prog"));
        let dev = DeviceId::new("dev");
        let first = backend.execute_batch(&dev, &[variant.clone()]).await.unwrap();
        let second = backend.execute_batch(&dev, &[variant.clone()]).await.unwrap();
        assert_eq!(
            first.counts_for(&variant.id).unwrap(),
            second.counts_for(&variant.id).unwrap()
        );
        let total: u64 = first.counts_for(&variant.id).unwrap().values().sum();
        assert_eq!(total, 200);
    }

    #[tokio::test]
    async fn test_unknown_device_and_oversized_batch_fail() {
        let backend = SimulatedBackend::new([device("dev", 0.1, Some(1))], 10, 2, 0);
        let job = Job::new("j", "p");
        let variants = vec![
            Channel::varying_seed("dev", 1).apply(&job),
            Channel::varying_seed("dev", 2).apply(&job),
        ];
        assert!(backend
            .execute_batch(&DeviceId::new("other"), &variants[..1])
            .await
            .is_err());
        assert!(backend
            .execute_batch(&DeviceId::new("dev"), &variants)
            .await
            .is_err());
        assert_eq!(backend.max_job_size_for(&DeviceId::new("dev")), Some(1));
    }
}
