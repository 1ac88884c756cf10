//! End-to-end orchestration against an in-memory backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use redundancy::{
    counts_from, load_results, persistence, save_results, Channel, CombinerConfig,
    ComparisonConfig, ConformalVotingConfig, ContainerId, Counts, DeviceId, DivergenceDetector,
    ExecutionBackend, FirstHealthySpare, Job, JobId, JobVariant, Orchestrator, PatternConfig,
    RedundancyResult, ResultSet, SparingConfig, UnitSpec, VariantId,
};

/// Returns preset counts per (job, channel) and records every batch it receives.
#[derive(Default)]
struct FakeBackend {
    outcomes: HashMap<(String, String), Counts>,
    fallback: Option<Counts>,
    limits: HashMap<DeviceId, usize>,
    calls: Mutex<Vec<(DeviceId, Vec<VariantId>)>>,
}

impl FakeBackend {
    fn with_outcome(mut self, job: &str, channel: &str, counts: Counts) -> Self {
        self.outcomes
            .insert((job.to_string(), channel.to_string()), counts);
        self
    }

    fn with_fallback(mut self, counts: Counts) -> Self {
        self.fallback = Some(counts);
        self
    }

    fn with_limit(mut self, device: &str, limit: usize) -> Self {
        self.limits.insert(DeviceId::new(device), limit);
        self
    }

    fn batch_sizes(&self, device: &str) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d.as_str() == device)
            .map(|(_, v)| v.len())
            .collect()
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn execute_batch(
        &self,
        device: &DeviceId,
        variants: &[JobVariant],
    ) -> RedundancyResult<ResultSet> {
        self.calls.lock().unwrap().push((
            device.clone(),
            variants.iter().map(|v| v.id.clone()).collect(),
        ));
        Ok(variants
            .iter()
            .filter_map(|v| {
                self.outcomes
                    .get(&(v.source.to_string(), v.channel.to_string()))
                    .or(self.fallback.as_ref())
                    .map(|c| (v.id.clone(), c.clone()))
            })
            .collect())
    }

    fn max_job_size_for(&self, device: &DeviceId) -> Option<usize> {
        self.limits.get(device).copied()
    }
}

fn seed_channel(device: &str, id: &str) -> Channel {
    Channel::varying_seed(device, 1).with_id(id)
}

fn combiner(id: &str, channels: &[(&str, &str)]) -> redundancy::FaultTolerantContainer {
    PatternConfig::Combiner(
        CombinerConfig::new(id)
            .add_channels(channels.iter().map(|(d, c)| seed_channel(d, c)))
            .combine_uniformly(),
    )
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_combiner_end_to_end() {
    let backend = FakeBackend::default()
        .with_outcome("j1", "a", counts_from([("00", 80), ("01", 20)]))
        .with_outcome("j1", "b", counts_from([("00", 60), ("01", 40)]));
    let container = combiner("C_seed", &[("fake_brooklyn", "a"), ("fake_brooklyn", "b")]);

    let mut orchestrator = Orchestrator::new(Arc::new(backend), [container.clone()]);
    orchestrator
        .orchestrate_executions(&[Job::new("j1", "prog")])
        .await
        .unwrap();

    let result = orchestrator
        .get_result_for(&JobId::new("j1"), container.id())
        .unwrap();
    assert_eq!(result.aggregate.counts(), &counts_from([("00", 70), ("01", 30)]));
    assert!(result.aggregate.origin().is_none());
    assert_eq!(result.channels.len(), 2);
}

#[tokio::test]
async fn test_variants_chunked_by_device_capacity() {
    let backend = Arc::new(
        FakeBackend::default()
            .with_fallback(counts_from([("0", 10)]))
            .with_limit("dev_a", 2)
            .with_limit("dev_b", 0),
    );
    let container = combiner(
        "C_back",
        &[("dev_a", "a1"), ("dev_a", "a2"), ("dev_a", "a3"), ("dev_b", "b1")],
    );
    let jobs: Vec<Job> = (0..3).map(|i| Job::new(format!("j{}", i), "p")).collect();

    let mut orchestrator = Orchestrator::new(backend.clone(), [container.clone()]);
    orchestrator.orchestrate_executions(&jobs).await.unwrap();

    // 9 variants on dev_a in chunks of at most 2; a zero limit means one batch.
    assert_eq!(backend.batch_sizes("dev_a"), vec![2, 2, 2, 2, 1]);
    assert_eq!(backend.batch_sizes("dev_b"), vec![3]);
    assert_eq!(orchestrator.results().len(), 3);
}

#[tokio::test]
async fn test_shared_channels_dispatched_once() {
    let backend = Arc::new(FakeBackend::default().with_fallback(counts_from([("0", 1)])));
    let channels = [("dev", "a"), ("dev", "b")];
    let first = combiner("C1", &channels);
    let second = combiner("C2", &channels);
    let duplicate = combiner("C1", &[("dev", "z")]);

    let mut orchestrator = Orchestrator::new(backend.clone(), [first, second, duplicate]);
    assert_eq!(orchestrator.containers().len(), 2);
    orchestrator
        .orchestrate_executions(&[Job::new("j", "p")])
        .await
        .unwrap();
    assert_eq!(backend.batch_sizes("dev"), vec![2]);
}

#[tokio::test]
async fn test_missing_outcome_is_lookup_error() {
    let backend =
        FakeBackend::default().with_outcome("j1", "a", counts_from([("00", 1)]));
    let container = combiner("C", &[("dev", "a"), ("dev", "b")]);

    let mut orchestrator = Orchestrator::new(Arc::new(backend), [container]);
    let err = orchestrator
        .orchestrate_executions(&[Job::new("j1", "p")])
        .await
        .unwrap_err();
    assert!(err.is_lookup());
    assert!(err.to_string().contains("no outcome"));
}

#[tokio::test]
async fn test_missing_outcome_leaves_results_and_switch_untouched() {
    let good = counts_from([("0", 95), ("1", 5)]);
    let noisy = counts_from([("0", 50), ("1", 50)]);
    let sparing = PatternConfig::Sparing(
        SparingConfig::new("S")
            .with_operational(UnitSpec::new(seed_channel("dev", "op")))
            .and_spare(UnitSpec::new(seed_channel("dev", "s1")))
            .using_shared_detector(Arc::new(DivergenceDetector::hellinger(0.1)))
            .using_switch_policy(Arc::new(FirstHealthySpare))
            .with_seed(3),
    )
    .build()
    .unwrap();
    let pooled = combiner("A", &[("dev", "a"), ("dev", "b")]);

    // j2::b never comes back; every j1 pair would resolve.
    let incomplete = FakeBackend::default()
        .with_outcome("j1", "a", good.clone())
        .with_outcome("j1", "b", good.clone())
        .with_outcome("j1", "op", noisy.clone())
        .with_outcome("j1", "s1", good.clone())
        .with_outcome("j2", "a", good.clone())
        .with_outcome("j2", "op", good.clone())
        .with_outcome("j2", "s1", good.clone());
    let jobs = [Job::new("j1", "p"), Job::new("j2", "p")];
    let mut orchestrator =
        Orchestrator::new(Arc::new(incomplete), [pooled.clone(), sparing.clone()]);
    let err = orchestrator.orchestrate_executions(&jobs).await.unwrap_err();
    assert!(err.is_lookup());
    assert!(orchestrator.results().is_empty());
    assert!(orchestrator
        .get_result_for(&jobs[0].id, pooled.id())
        .is_err());

    // The noisy j1 outcome was never shown to the switch, so op is still operational.
    let complete = FakeBackend::default().with_fallback(good);
    let mut retry = Orchestrator::new(Arc::new(complete), [sparing.clone()]);
    retry.orchestrate_executions(&jobs[..1]).await.unwrap();
    let result = retry.get_result_for(&jobs[0].id, sparing.id()).unwrap();
    assert_eq!(result.aggregate.origin().unwrap().as_str(), "op");
}

#[tokio::test]
async fn test_unorchestrated_pair_is_lookup_error() {
    let backend = FakeBackend::default().with_fallback(counts_from([("0", 1)]));
    let container = combiner("C", &[("dev", "a")]);

    let mut orchestrator = Orchestrator::new(Arc::new(backend), [container.clone()]);
    orchestrator
        .orchestrate_executions(&[Job::new("j1", "p")])
        .await
        .unwrap();

    let err = orchestrator
        .get_result_for(&JobId::new("j2"), container.id())
        .unwrap_err();
    assert!(err.is_lookup());
    assert!(err.to_string().contains("no result"));
    assert!(orchestrator
        .get_result_for(&JobId::new("j1"), &ContainerId::new("other"))
        .is_err());
}

#[tokio::test]
async fn test_sparing_switch_persists_across_jobs() {
    let good = counts_from([("0", 95), ("1", 5)]);
    let noisy = counts_from([("0", 50), ("1", 50)]);
    let backend = FakeBackend::default()
        .with_outcome("j1", "op", noisy.clone())
        .with_outcome("j1", "s1", good.clone())
        .with_outcome("j1", "s2", good.clone())
        .with_outcome("j2", "op", good.clone())
        .with_outcome("j2", "s1", good.clone())
        .with_outcome("j2", "s2", good.clone());
    let container = PatternConfig::Sparing(
        SparingConfig::new("S_noise")
            .with_operational(UnitSpec::new(seed_channel("dev", "op")))
            .and_spare(UnitSpec::new(seed_channel("dev", "s1")))
            .and_spare(UnitSpec::new(seed_channel("dev", "s2")))
            .using_shared_detector(Arc::new(DivergenceDetector::hellinger(0.1)))
            .using_switch_policy(Arc::new(FirstHealthySpare))
            .with_seed(11),
    )
    .build()
    .unwrap();

    let mut orchestrator = Orchestrator::new(Arc::new(backend), [container.clone()]);
    let jobs = [Job::new("j1", "p"), Job::new("j2", "p")];
    orchestrator.orchestrate_executions(&jobs).await.unwrap();

    let first = orchestrator
        .get_result_for(&jobs[0].id, container.id())
        .unwrap();
    assert_eq!(first.aggregate.origin().unwrap().as_str(), "s1");
    assert!(first.aggregate.accepted());

    // The recovered unit is a spare now; s1 stays operational.
    let second = orchestrator
        .get_result_for(&jobs[1].id, container.id())
        .unwrap();
    assert_eq!(second.aggregate.origin().unwrap().as_str(), "s1");
}

#[tokio::test]
async fn test_conformal_and_comparison_containers() {
    let agreeing = counts_from([("00", 60), ("01", 20), ("10", 15), ("11", 5)]);
    let disagreeing = counts_from([("00", 10), ("01", 20), ("10", 15), ("11", 55)]);
    let backend = FakeBackend::default()
        .with_outcome("j", "m1", agreeing.clone())
        .with_outcome("j", "m2", agreeing.clone())
        .with_outcome("j", "m3", agreeing.clone())
        .with_outcome("j", "p", agreeing.clone())
        .with_outcome("j", "c", disagreeing);

    let voting = PatternConfig::ConformalVoting(
        ConformalVotingConfig::new("M_seed")
            .add_channels(["m1", "m2", "m3"].map(|c| seed_channel("dev", c)))
            .with_conformity_threshold(0.7)
            .with_seed(3),
    )
    .build()
    .unwrap();
    let comparison = PatternConfig::Comparison(
        ComparisonConfig::new("K_seed")
            .with_primary(seed_channel("dev", "p"))
            .with_comparator(seed_channel("dev", "c")),
    )
    .build()
    .unwrap();

    let mut orchestrator =
        Orchestrator::new(Arc::new(backend), [voting.clone(), comparison.clone()]);
    orchestrator
        .orchestrate_executions(&[Job::new("j", "p")])
        .await
        .unwrap();

    let voted = orchestrator
        .get_result_for(&JobId::new("j"), voting.id())
        .unwrap();
    assert_eq!(voted.aggregate.count_for("00"), 3);
    assert!(voted.aggregate.accepted());

    let compared = orchestrator
        .get_result_for(&JobId::new("j"), comparison.id())
        .unwrap();
    assert_eq!(compared.aggregate.origin().unwrap().as_str(), "p");
    assert!(!compared.aggregate.accepted());
}

#[tokio::test]
async fn test_results_persist_to_file() {
    let backend = FakeBackend::default().with_fallback(counts_from([("00", 9), ("11", 1)]));
    let container = combiner("C", &[("dev", "a"), ("dev", "b")]);
    let mut orchestrator = Orchestrator::new(Arc::new(backend), [container.clone()]);
    orchestrator
        .orchestrate_executions(&[Job::new("j1", "p"), Job::new("j2", "p")])
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    let snapshot = persistence::snapshot(orchestrator.results());
    save_results(&path, &snapshot).unwrap();

    let loaded = load_results(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].job.as_str(), "j1");
    assert_eq!(
        &loaded[1].to_result(),
        orchestrator
            .get_result_for(&JobId::new("j2"), container.id())
            .unwrap()
    );
}
