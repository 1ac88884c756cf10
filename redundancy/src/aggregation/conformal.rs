//! Conformal-set agreement: majority voting, agreement-weighted pooling and the
//! conformity score.
//!
//! A conformal set is the top-N states of one record. Two channels agree when their
//! sets intersect in at least `agreement_threshold` states.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pool::LinearOpinionPool;
use super::Aggregator;
use crate::channel::ChannelId;
use crate::error::{ConfigIssue, RedundancyError, RedundancyResult};
use crate::record::{Counts, MeasurementRecord, State};

/// Probability-mass ties closer than this are treated as equal.
const MASS_EPSILON: f64 = 1e-12;

/// Tunable constants for conformal agreement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConformalDefaults {
    /// Fraction of the distinct states kept in each conformal set.
    pub top_n_rate: f64,
    /// Agreement threshold as a fraction of the set size.
    pub agreement_multiplier: f64,
    /// Minimum conformity score for an aggregate to be accepted.
    pub conformity_threshold: f64,
}

impl Default for ConformalDefaults {
    fn default() -> Self {
        Self {
            top_n_rate: 0.25,
            agreement_multiplier: 0.5,
            conformity_threshold: 0.8,
        }
    }
}

/// `max(1, floor(rate * distinct_states))`.
pub fn top_n_for(rate: f64, distinct_states: usize) -> usize {
    ((rate * distinct_states as f64).floor() as usize).max(1)
}

/// `max(1, ceil(multiplier * top_n))`.
pub fn agreement_threshold_for(multiplier: f64, top_n: usize) -> usize {
    ((multiplier * top_n as f64).ceil() as usize).max(1)
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// The top-N states of one record, in rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformalSet {
    states: Vec<State>,
    origin: Option<ChannelId>,
}

impl ConformalSet {
    /// Keep the first `n` of `ranked`. `n` larger than the candidates keeps them all.
    pub fn new(ranked: Vec<State>, n: usize) -> RedundancyResult<Self> {
        if n == 0 {
            return Err(RedundancyError::config(ConfigIssue::InvalidValue {
                pattern: "conformal_set",
                field: "top_n",
                reason: "must be greater than zero".to_string(),
            }));
        }
        let mut states = ranked;
        states.truncate(n);
        Ok(Self {
            states,
            origin: None,
        })
    }

    pub fn top_n_of(record: &MeasurementRecord, n: usize) -> RedundancyResult<Self> {
        let ranked = record.rank().into_iter().cloned().collect();
        let mut set = Self::new(ranked, n)?;
        set.origin = record.origin().cloned();
        Ok(set)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn origin(&self) -> Option<&ChannelId> {
        self.origin.as_ref()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// States present in both sets, in this set's rank order.
    pub fn intersection(&self, other: &ConformalSet) -> Vec<State> {
        let theirs: HashSet<&State> = other.states.iter().collect();
        self.states
            .iter()
            .filter(|s| theirs.contains(s))
            .cloned()
            .collect()
    }
}

/// Upper-triangular walk over every unordered pair `(i, j)` with `i < j`.
#[derive(Debug, Clone)]
pub struct Pairs<'a, T> {
    items: &'a [T],
    i: usize,
    j: usize,
}

impl<'a, T> Iterator for Pairs<'a, T> {
    type Item = (&'a T, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.j >= self.items.len() {
            self.i += 1;
            self.j = self.i + 1;
        }
        if self.j >= self.items.len() {
            return None;
        }
        let pair = (&self.items[self.i], &self.items[self.j]);
        self.j += 1;
        Some(pair)
    }
}

pub fn pairs<T>(items: &[T]) -> Pairs<'_, T> {
    Pairs { items, i: 0, j: 1 }
}

/// Mean pairwise agreement `2*|intersection|/top_n - 1`, squashed by the logistic
/// function into `[0, 1]`. No pairs scores 0 before squashing.
pub fn conformity_score(sets: &[ConformalSet], top_n: usize) -> f64 {
    let top_n = top_n.max(1) as f64;
    let (sum, count) = pairs(sets).fold((0.0, 0usize), |(sum, count), (a, b)| {
        let matches = a.intersection(b).len() as f64;
        (sum + (2.0 * matches / top_n) - 1.0, count + 1)
    });
    let mean = if count == 0 { 0.0 } else { sum / count as f64 };
    logistic(mean)
}

/// Majority voting over pairwise agreement of conformal sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MajorityVoting {
    pub agreement_threshold: usize,
}

impl MajorityVoting {
    pub fn new(agreement_threshold: usize) -> Self {
        Self {
            agreement_threshold,
        }
    }

    /// Raw votes: each agreeing pair gives one vote to every state it shares.
    /// Every state of every set appears, possibly with zero votes.
    pub fn tally(&self, sets: &[ConformalSet]) -> BTreeMap<State, u64> {
        let mut votes: BTreeMap<State, u64> = sets
            .iter()
            .flat_map(|s| s.states().iter().cloned())
            .map(|s| (s, 0))
            .collect();

        for (a, b) in pairs(sets) {
            let shared = a.intersection(b);
            if shared.len() >= self.agreement_threshold {
                for state in shared {
                    *votes.entry(state).or_insert(0) += 1;
                }
            }
        }
        votes
    }

    /// Tally and make the winner unique.
    ///
    /// States tied for the most votes are separated by their summed probability across
    /// `records`, then uniformly at random. The chosen state gets one extra vote.
    pub fn vote<R: Rng + ?Sized>(
        &self,
        sets: &[ConformalSet],
        records: &[MeasurementRecord],
        rng: &mut R,
    ) -> BTreeMap<State, u64> {
        let mut votes = self.tally(sets);
        let Some(max_votes) = votes.values().copied().max() else {
            return votes;
        };

        let tied: Vec<&State> = votes
            .iter()
            .filter(|(_, v)| **v == max_votes)
            .map(|(s, _)| s)
            .collect();
        if tied.len() < 2 {
            return votes;
        }

        let mass = |state: &str| -> f64 { records.iter().map(|r| r.probability_for(state)).sum() };
        let best_mass = tied
            .iter()
            .map(|s| mass(s))
            .fold(f64::NEG_INFINITY, f64::max);
        let heaviest: Vec<State> = tied
            .into_iter()
            .filter(|s| (mass(s) - best_mass).abs() < MASS_EPSILON)
            .cloned()
            .collect();

        let winner = if heaviest.len() == 1 {
            heaviest[0].clone()
        } else {
            let pick = rng.gen_range(0..heaviest.len());
            debug!(
                candidates = heaviest.len(),
                winner = %heaviest[pick],
                "Random tie-break between equally likely states"
            );
            heaviest[pick].clone()
        };

        if let Some(v) = votes.get_mut(&winner) {
            *v += 1;
        }
        votes
    }
}

/// Agreement-strength weighted pooling of agreeing pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedConformalAggregation {
    pub agreement_threshold: usize,
}

impl WeightedConformalAggregation {
    pub fn new(agreement_threshold: usize) -> Self {
        Self {
            agreement_threshold,
        }
    }

    /// Each agreeing pair becomes a pseudo-record holding the summed counts of its
    /// shared states, weighted by the number of shared states. No agreeing pair gives
    /// an empty record.
    pub fn aggregate(
        &self,
        records: &[MeasurementRecord],
        top_n: usize,
    ) -> RedundancyResult<MeasurementRecord> {
        let sets = records
            .iter()
            .map(|r| ConformalSet::top_n_of(r, top_n))
            .collect::<RedundancyResult<Vec<_>>>()?;

        let mut pseudo = Vec::new();
        let mut strengths = Vec::new();
        let indexed: Vec<usize> = (0..records.len()).collect();
        for (&i, &j) in pairs(&indexed) {
            let shared = sets[i].intersection(&sets[j]);
            if shared.len() < self.agreement_threshold {
                continue;
            }
            let counts: Counts = shared
                .iter()
                .map(|s| (s.clone(), records[i].count_for(s) + records[j].count_for(s)))
                .collect();
            let id = ChannelId::new(format!("agreement-{}-{}", i, j));
            strengths.push((id.clone(), shared.len() as f64));
            pseudo.push(MeasurementRecord::from_channel(id, counts));
        }

        if pseudo.is_empty() {
            debug!(records = records.len(), "No agreeing pairs; empty aggregate");
            return Ok(MeasurementRecord::empty());
        }

        let total: f64 = strengths.iter().map(|(_, w)| w).sum();
        let weights: HashMap<ChannelId, f64> =
            strengths.into_iter().map(|(id, w)| (id, w / total)).collect();
        LinearOpinionPool::new(weights)?.combine(&pseudo)
    }
}

/// How a conformal container turns agreeing sets into its output record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConformalMode {
    /// Votes per state from [`MajorityVoting`].
    #[default]
    MajorityVote,
    /// Pooled counts from [`WeightedConformalAggregation`].
    WeightedPooling,
}

/// Container aggregation over conformal sets.
///
/// The output record holds votes per state, or pooled counts in
/// [`ConformalMode::WeightedPooling`]. Either way it is accepted when the conformity
/// score of the input sets reaches `conformity_threshold`.
#[derive(Debug)]
pub struct ConformalVotingAggregator {
    channels: Vec<ChannelId>,
    settings: ConformalDefaults,
    mode: ConformalMode,
    rng: Mutex<StdRng>,
}

impl ConformalVotingAggregator {
    pub fn new(channels: Vec<ChannelId>, settings: ConformalDefaults, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            channels,
            settings,
            mode: ConformalMode::default(),
            rng: Mutex::new(rng),
        }
    }

    pub fn with_mode(mut self, mode: ConformalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn settings(&self) -> &ConformalDefaults {
        &self.settings
    }

    pub fn mode(&self) -> ConformalMode {
        self.mode
    }

    /// Top-N, agreement threshold and conformity score for `records`.
    pub fn evaluate(&self, records: &[MeasurementRecord]) -> RedundancyResult<(usize, usize, f64)> {
        let (top_n, threshold, sets) = self.sets_for(records)?;
        Ok((top_n, threshold, conformity_score(&sets, top_n)))
    }

    fn sets_for(
        &self,
        records: &[MeasurementRecord],
    ) -> RedundancyResult<(usize, usize, Vec<ConformalSet>)> {
        self.check_channels(records)?;
        let distinct: BTreeSet<&State> = records.iter().flat_map(|r| r.counts().keys()).collect();
        let top_n = top_n_for(self.settings.top_n_rate, distinct.len());
        let threshold = agreement_threshold_for(self.settings.agreement_multiplier, top_n);
        let sets = records
            .iter()
            .map(|r| ConformalSet::top_n_of(r, top_n))
            .collect::<RedundancyResult<Vec<_>>>()?;
        Ok((top_n, threshold, sets))
    }

    fn check_channels(&self, records: &[MeasurementRecord]) -> RedundancyResult<()> {
        let expected: HashSet<&ChannelId> = self.channels.iter().collect();
        let actual: HashSet<&ChannelId> = records.iter().filter_map(|r| r.origin()).collect();
        if records.len() != self.channels.len() || actual != expected {
            return Err(RedundancyError::consistency(format!(
                "conformal voting expected records from {} channels, got {} records from {} known channels",
                self.channels.len(),
                records.len(),
                actual.intersection(&expected).count()
            )));
        }
        Ok(())
    }
}

impl Aggregator for ConformalVotingAggregator {
    fn combine(&self, records: &[MeasurementRecord]) -> RedundancyResult<MeasurementRecord> {
        let (top_n, threshold, sets) = self.sets_for(records)?;
        let score = conformity_score(&sets, top_n);

        let output = match self.mode {
            ConformalMode::MajorityVote => {
                let voting = MajorityVoting::new(threshold);
                let votes = {
                    let mut rng = self
                        .rng
                        .lock()
                        .map_err(|_| RedundancyError::consistency("voting rng lock poisoned"))?;
                    voting.vote(&sets, records, &mut *rng)
                };
                MeasurementRecord::synthesized(votes)
            }
            ConformalMode::WeightedPooling => {
                WeightedConformalAggregation::new(threshold).aggregate(records, top_n)?
            }
        };

        let accepted = score >= self.settings.conformity_threshold;
        debug!(
            mode = ?self.mode,
            top_n,
            agreement_threshold = threshold,
            conformity = score,
            accepted,
            "Conformal aggregation complete"
        );
        Ok(output.with_accepted(accepted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::counts_from;

    fn set(states: &[&str]) -> ConformalSet {
        ConformalSet::new(states.iter().map(|s| s.to_string()).collect(), states.len()).unwrap()
    }

    fn record(channel: &str, pairs: &[(&str, u64)]) -> MeasurementRecord {
        MeasurementRecord::from_channel(ChannelId::new(channel), counts_from(pairs.iter().copied()))
    }

    #[test]
    fn test_top_n_larger_than_states_returns_all() {
        let r = record("a", &[("00", 5), ("01", 9), ("10", 1)]);
        let s = ConformalSet::top_n_of(&r, 10).unwrap();
        assert_eq!(s.states(), &["01".to_string(), "00".to_string(), "10".to_string()]);
        assert_eq!(s.origin(), Some(&ChannelId::new("a")));
    }

    #[test]
    fn test_top_n_zero_is_configuration_error() {
        let r = record("a", &[("0", 1)]);
        assert!(ConformalSet::top_n_of(&r, 0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_pairs_visits_each_unordered_pair_once() {
        for k in 0..7usize {
            let items: Vec<usize> = (0..k).collect();
            let visited: Vec<(usize, usize)> = pairs(&items).map(|(a, b)| (*a, *b)).collect();
            assert_eq!(visited.len(), k * k.saturating_sub(1) / 2, "k = {}", k);
            assert!(visited.iter().all(|(a, b)| a < b));
            let unique: HashSet<(usize, usize)> = visited.iter().copied().collect();
            assert_eq!(unique.len(), visited.len());
        }
    }

    #[test]
    fn test_single_set_has_no_pairs() {
        let items = [set(&["0"])];
        assert_eq!(pairs(&items).count(), 0);
    }

    #[test]
    fn test_majority_tally_counts_only_agreeing_pairs() {
        let a = set(&["00", "01"]);
        let b = set(&["01", "00"]);
        let c = set(&["10", "11"]);
        let votes = MajorityVoting::new(2).tally(&[a, b, c]);
        assert_eq!(votes["00"], 1);
        assert_eq!(votes["01"], 1);
        assert_eq!(votes["10"], 0);
        assert_eq!(votes["11"], 0);
    }

    #[test]
    fn test_majority_below_threshold_gives_no_votes() {
        let votes = MajorityVoting::new(2).tally(&[set(&["00", "01"]), set(&["00", "11"])]);
        assert!(votes.values().all(|v| *v == 0));
    }

    #[test]
    fn test_vote_breaks_tie_by_probability_mass() {
        let a = record("a", &[("00", 60), ("01", 40)]);
        let b = record("b", &[("00", 55), ("01", 45)]);
        let sets = vec![
            ConformalSet::top_n_of(&a, 2).unwrap(),
            ConformalSet::top_n_of(&b, 2).unwrap(),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let votes = MajorityVoting::new(2).vote(&sets, &[a, b], &mut rng);
        assert_eq!(votes["00"], 2);
        assert_eq!(votes["01"], 1);
    }

    #[test]
    fn test_vote_random_tiebreak_picks_a_tied_state() {
        let a = record("a", &[("00", 50), ("01", 50)]);
        let b = record("b", &[("00", 50), ("01", 50)]);
        let sets = vec![
            ConformalSet::top_n_of(&a, 2).unwrap(),
            ConformalSet::top_n_of(&b, 2).unwrap(),
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let votes = MajorityVoting::new(2).vote(&sets, &[a, b], &mut rng);
        let mut tallies: Vec<u64> = votes.values().copied().collect();
        tallies.sort_unstable();
        assert_eq!(tallies, vec![1, 2]);
    }

    #[test]
    fn test_conformity_of_identical_sets_is_logistic_one() {
        let sets = [set(&["00", "01", "10"]), set(&["00", "01", "10"])];
        let score = conformity_score(&sets, 3);
        assert!((score - logistic(1.0)).abs() < 1e-12);
        assert!((score - 0.731).abs() < 1e-3);
    }

    #[test]
    fn test_conformity_of_disjoint_sets_is_logistic_minus_one() {
        let sets = [set(&["00", "01"]), set(&["10", "11"])];
        assert!((conformity_score(&sets, 2) - logistic(-1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_default_sizes() {
        assert_eq!(top_n_for(0.25, 16), 4);
        assert_eq!(top_n_for(0.25, 3), 1);
        assert_eq!(agreement_threshold_for(0.5, 4), 2);
        assert_eq!(agreement_threshold_for(0.5, 3), 2);
        assert_eq!(agreement_threshold_for(0.5, 1), 1);
    }

    #[test]
    fn test_weighted_aggregation_pools_agreeing_pairs() {
        let a = record("a", &[("00", 60), ("01", 30), ("11", 10)]);
        let b = record("b", &[("00", 50), ("01", 40), ("10", 10)]);
        let c = record("c", &[("10", 70), ("11", 30)]);
        let out = WeightedConformalAggregation::new(2)
            .aggregate(&[a, b, c], 2)
            .unwrap();
        // Only the a-b pair agrees on both states.
        assert_eq!(out.counts(), &counts_from([("00", 110), ("01", 70)]));
        assert!(out.origin().is_none());
    }

    #[test]
    fn test_weighted_aggregation_without_agreement_is_empty() {
        let a = record("a", &[("00", 60), ("01", 40)]);
        let b = record("b", &[("10", 60), ("11", 40)]);
        let out = WeightedConformalAggregation::new(1)
            .aggregate(&[a, b], 2)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_voting_aggregator_accepts_above_threshold() {
        let settings = ConformalDefaults {
            top_n_rate: 0.5,
            agreement_multiplier: 0.5,
            conformity_threshold: 0.7,
        };
        let channels = vec![ChannelId::new("a"), ChannelId::new("b")];
        let agg = ConformalVotingAggregator::new(channels, settings, Some(7));
        let records = [
            record("a", &[("00", 70), ("01", 20), ("10", 5), ("11", 5)]),
            record("b", &[("00", 65), ("01", 25), ("10", 6), ("11", 4)]),
        ];
        let out = agg.combine(&records).unwrap();
        assert!(out.accepted());
        assert_eq!(out.rank()[0], "00");
    }

    #[test]
    fn test_voting_aggregator_rejects_unknown_channel() {
        let agg = ConformalVotingAggregator::new(
            vec![ChannelId::new("a"), ChannelId::new("b")],
            ConformalDefaults::default(),
            Some(1),
        );
        let err = agg
            .combine(&[record("a", &[("0", 1)]), record("z", &[("0", 1)])])
            .unwrap_err();
        assert!(err.is_consistency());
    }

    #[test]
    fn test_weighted_pooling_mode_returns_pooled_counts() {
        let settings = ConformalDefaults {
            top_n_rate: 0.5,
            agreement_multiplier: 0.5,
            conformity_threshold: 0.7,
        };
        let channels = vec![ChannelId::new("a"), ChannelId::new("b"), ChannelId::new("c")];
        let agg = ConformalVotingAggregator::new(channels, settings, Some(3))
            .with_mode(ConformalMode::WeightedPooling);
        assert_eq!(agg.mode(), ConformalMode::WeightedPooling);
        let records = [
            record("a", &[("00", 60), ("01", 30), ("11", 10)]),
            record("b", &[("00", 50), ("01", 40), ("10", 10)]),
            record("c", &[("10", 70), ("11", 30)]),
        ];
        // Four distinct states: top-2 sets, threshold 1. a-b share 00 and 01, a-c
        // share nothing, b-c share nothing.
        let out = agg.combine(&records).unwrap();
        assert_eq!(out.counts(), &counts_from([("00", 110), ("01", 70)]));
        assert!(!out.accepted());
    }

    #[test]
    fn test_conformal_mode_names() {
        let mode: ConformalMode = serde_json::from_str("\"weighted_pooling\"").unwrap();
        assert_eq!(mode, ConformalMode::WeightedPooling);
        assert_eq!(ConformalMode::default(), ConformalMode::MajorityVote);
    }
}
