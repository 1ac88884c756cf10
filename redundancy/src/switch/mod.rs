//! Primary/spare failover.
//!
//! A [`RedundancySwitch`] holds one operational [`SwitchUnit`] and an ordered list of
//! spares. Each call to [`RedundancySwitch::switch_if_necessary`] attaches the current
//! job's records to every unit, checks the operational unit, and on a fault promotes a
//! replacement chosen by the [`SwitchPolicy`]. The displaced unit moves to the tail of
//! the spare list.
//!
//! ```text
//! operational ──fault──▶ policy picks spare k
//!     │                        │
//!     └──▶ spares[tail]   spares[k] ──▶ operational
//! ```
//!
//! The switch is stateful across jobs. Exclusive access is enforced by `&mut self`;
//! [`SparingAggregator`] adds a mutex so a container can hold it.

pub mod policy;

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::aggregation::Aggregator;
use crate::channel::{Channel, ChannelId};
use crate::detection::FaultDetector;
use crate::error::{RedundancyError, RedundancyResult};
use crate::record::MeasurementRecord;

pub use policy::{FirstHealthySpare, SwitchPolicy};

/// A primary channel, optional secondary channels, and the detector that judges them.
#[derive(Debug, Clone)]
pub struct SwitchUnit {
    primary: Channel,
    secondaries: Vec<Channel>,
    detector: Arc<dyn FaultDetector>,
    records: Vec<MeasurementRecord>,
}

impl SwitchUnit {
    pub fn new(primary: Channel, detector: Arc<dyn FaultDetector>) -> Self {
        Self {
            primary,
            secondaries: Vec::new(),
            detector,
            records: Vec::new(),
        }
    }

    pub fn with_secondaries(mut self, secondaries: Vec<Channel>) -> Self {
        self.secondaries = secondaries;
        self
    }

    pub fn primary(&self) -> &Channel {
        &self.primary
    }

    pub fn secondaries(&self) -> &[Channel] {
        &self.secondaries
    }

    /// Primary first, then secondaries.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    pub fn owns(&self, channel: &ChannelId) -> bool {
        self.channels().any(|c| c.id() == channel)
    }

    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    /// Replace the attached records with those produced by this unit's channels.
    pub fn attach(&mut self, all_records: &[MeasurementRecord]) -> RedundancyResult<()> {
        let mine: Vec<MeasurementRecord> = all_records
            .iter()
            .filter(|r| r.origin().is_some_and(|origin| self.owns(origin)))
            .cloned()
            .collect();
        if mine.is_empty() {
            return Err(RedundancyError::consistency(format!(
                "switch unit {} received no records",
                self.primary.id()
            )));
        }
        self.records = mine;
        Ok(())
    }

    pub fn fault_detected(&self) -> RedundancyResult<bool> {
        self.detector.is_faulty(self.primary.id(), &self.records)
    }

    /// The attached record of the primary channel.
    pub fn primary_record(&self) -> RedundancyResult<&MeasurementRecord> {
        self.records
            .iter()
            .find(|r| r.is_from(self.primary.id()))
            .ok_or_else(|| {
                RedundancyError::consistency(format!(
                    "switch unit has no record from its primary channel {}",
                    self.primary.id()
                ))
            })
    }
}

/// Operational/spare failover state machine.
#[derive(Debug)]
pub struct RedundancySwitch {
    operational: SwitchUnit,
    spares: Vec<SwitchUnit>,
    policy: Arc<dyn SwitchPolicy>,
    rng: StdRng,
}

impl RedundancySwitch {
    /// Spares must be non-empty; pattern validation guarantees it.
    pub fn new(
        operational: SwitchUnit,
        spares: Vec<SwitchUnit>,
        policy: Arc<dyn SwitchPolicy>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            operational,
            spares,
            policy,
            rng,
        }
    }

    pub fn operational(&self) -> &SwitchUnit {
        &self.operational
    }

    pub fn spares(&self) -> &[SwitchUnit] {
        &self.spares
    }

    /// Every channel of every unit, operational first.
    pub fn channels(&self) -> Vec<Channel> {
        std::iter::once(&self.operational)
            .chain(self.spares.iter())
            .flat_map(|u| u.channels().cloned())
            .collect()
    }

    /// Attach `all_records`, fail over if the operational unit is faulty, and return
    /// the operational primary record marked with that unit's health.
    pub fn switch_if_necessary(
        &mut self,
        all_records: &[MeasurementRecord],
    ) -> RedundancyResult<MeasurementRecord> {
        self.operational.attach(all_records)?;
        for spare in &mut self.spares {
            spare.attach(all_records)?;
        }

        let mut healthy = !self.operational.fault_detected()?;
        if !healthy {
            let index = self.policy.select(&self.spares, &mut self.rng)?;
            if index >= self.spares.len() {
                return Err(RedundancyError::consistency(format!(
                    "switch policy selected spare {} of {}",
                    index,
                    self.spares.len()
                )));
            }
            let replacement = self.spares.remove(index);
            let displaced = std::mem::replace(&mut self.operational, replacement);
            info!(
                from = %displaced.primary().id(),
                to = %self.operational.primary().id(),
                spares = self.spares.len() + 1,
                "Operational unit faulty; switched to spare"
            );
            self.spares.push(displaced);
            healthy = !self.operational.fault_detected()?;
        } else {
            debug!(operational = %self.operational.primary().id(), "Operational unit healthy");
        }

        Ok(self.operational.primary_record()?.clone().with_accepted(healthy))
    }
}

/// Container aggregation backed by a redundancy switch.
#[derive(Debug)]
pub struct SparingAggregator {
    switch: Mutex<RedundancySwitch>,
}

impl SparingAggregator {
    pub fn new(switch: RedundancySwitch) -> Self {
        Self {
            switch: Mutex::new(switch),
        }
    }

    /// Primary channel of the current operational unit.
    pub fn operational_channel(&self) -> RedundancyResult<ChannelId> {
        let switch = self
            .switch
            .lock()
            .map_err(|_| RedundancyError::consistency("redundancy switch lock poisoned"))?;
        Ok(switch.operational().primary().id().clone())
    }
}

impl Aggregator for SparingAggregator {
    fn combine(&self, records: &[MeasurementRecord]) -> RedundancyResult<MeasurementRecord> {
        let mut switch = self
            .switch
            .lock()
            .map_err(|_| RedundancyError::consistency("redundancy switch lock poisoned"))?;
        switch.switch_if_necessary(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::counts_from;

    /// Faulty iff the primary record's most likely state is `"1"`.
    #[derive(Debug)]
    struct TopStateIsOne;

    impl FaultDetector for TopStateIsOne {
        fn is_faulty(
            &self,
            primary: &ChannelId,
            records: &[MeasurementRecord],
        ) -> RedundancyResult<bool> {
            let record = records
                .iter()
                .find(|r| r.is_from(primary))
                .ok_or_else(|| RedundancyError::consistency("missing"))?;
            Ok(record.rank().first().map(|s| s.as_str()) == Some("1"))
        }
    }

    fn unit(id: &str) -> SwitchUnit {
        SwitchUnit::new(
            Channel::heterogeneous_device("dev").with_id(id),
            Arc::new(TopStateIsOne),
        )
    }

    fn good(id: &str) -> MeasurementRecord {
        MeasurementRecord::from_channel(ChannelId::new(id), counts_from([("0", 90), ("1", 10)]))
    }

    fn bad(id: &str) -> MeasurementRecord {
        MeasurementRecord::from_channel(ChannelId::new(id), counts_from([("0", 10), ("1", 90)]))
    }

    fn switch() -> RedundancySwitch {
        RedundancySwitch::new(
            unit("op"),
            vec![unit("s1"), unit("s2")],
            Arc::new(FirstHealthySpare),
            Some(3),
        )
    }

    fn spare_ids(switch: &RedundancySwitch) -> Vec<String> {
        switch
            .spares()
            .iter()
            .map(|u| u.primary().id().to_string())
            .collect()
    }

    #[test]
    fn test_healthy_operational_stays() {
        let mut sw = switch();
        let out = sw
            .switch_if_necessary(&[good("op"), bad("s1"), good("s2")])
            .unwrap();
        assert!(out.is_from(&ChannelId::new("op")));
        assert!(out.accepted());
        assert_eq!(spare_ids(&sw), vec!["s1", "s2"]);
    }

    #[test]
    fn test_faulty_operational_promotes_first_healthy_spare() {
        let mut sw = switch();
        let out = sw
            .switch_if_necessary(&[bad("op"), good("s1"), good("s2")])
            .unwrap();
        assert!(out.is_from(&ChannelId::new("s1")));
        assert!(out.accepted());
        assert_eq!(sw.operational().primary().id().as_str(), "s1");
        assert_eq!(spare_ids(&sw), vec!["s2", "op"]);
    }

    #[test]
    fn test_demoted_unit_not_repromoted_ahead_of_healthy_spares() {
        let mut sw = switch();
        sw.switch_if_necessary(&[bad("op"), good("s1"), good("s2")])
            .unwrap();
        // s1 now fails; the demoted "op" has recovered but sits behind s2.
        let out = sw
            .switch_if_necessary(&[good("op"), bad("s1"), good("s2")])
            .unwrap();
        assert!(out.is_from(&ChannelId::new("s2")));
        assert_eq!(spare_ids(&sw), vec!["op", "s1"]);
    }

    #[test]
    fn test_all_spares_faulty_picks_one_and_marks_rejected() {
        let mut sw = switch();
        let out = sw
            .switch_if_necessary(&[bad("op"), bad("s1"), bad("s2")])
            .unwrap();
        let promoted = sw.operational().primary().id().as_str().to_string();
        assert!(promoted == "s1" || promoted == "s2");
        assert!(!out.accepted());
        assert_eq!(sw.spares().last().unwrap().primary().id().as_str(), "op");
        assert_eq!(sw.spares().len(), 2);
    }

    #[test]
    fn test_unit_without_records_is_consistency_error() {
        let mut sw = switch();
        let err = sw
            .switch_if_necessary(&[good("op"), good("s1")])
            .unwrap_err();
        assert!(err.is_consistency());
    }

    #[test]
    fn test_secondary_channel_records_attach_to_unit() {
        let mut u = unit("p").with_secondaries(vec![Channel::heterogeneous_device("dev").with_id("c")]);
        u.attach(&[good("p"), good("c"), good("other")]).unwrap();
        assert_eq!(u.records().len(), 2);
        assert!(!u.fault_detected().unwrap());
    }

    #[test]
    fn test_sparing_aggregator_persists_state_across_calls() {
        let agg = SparingAggregator::new(switch());
        agg.combine(&[bad("op"), good("s1"), good("s2")]).unwrap();
        assert_eq!(agg.operational_channel().unwrap().as_str(), "s1");
        let out = agg.combine(&[good("op"), good("s1"), good("s2")]).unwrap();
        assert!(out.is_from(&ChannelId::new("s1")));
    }
}
