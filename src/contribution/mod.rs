//! Source contributions at the outlet.
//!
//! Every timestep the particles sitting in the outlet's channel-front are
//! tallied by the link they originated at and the store they came from. The
//! per-timestep records form the series written at the end of a run.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::hydrology::HydraulicField;
use crate::network::LinkId;
use crate::particle::{LayerSource, Timestamp};
use crate::snapshot::DomainSnapshot;

/// Particle counts of one origin link, by source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTally {
    pub pond: u64,
    pub top_layer: u64,
    pub subsurface: u64,
    pub channel: u64,
    /// All rain particles, whatever event produced them.
    pub rain: u64,
    /// Rain particles per injection timestamp. Empty when rain is aggregated.
    pub rain_events: BTreeMap<Timestamp, u64>,
}

impl SourceTally {
    pub fn total(&self) -> u64 {
        self.pond + self.top_layer + self.subsurface + self.channel + self.rain
    }

    fn add(&mut self, source: LayerSource, split_rain: bool) {
        match source {
            LayerSource::Pond => self.pond += 1,
            LayerSource::TopLayer => self.top_layer += 1,
            LayerSource::Subsurface => self.subsurface += 1,
            LayerSource::Channel => self.channel += 1,
            LayerSource::Rain(t) => {
                self.rain += 1;
                if split_rain {
                    *self.rain_events.entry(t).or_insert(0) += 1;
                }
            }
        }
    }
}

/// What the outlet carries at one timestep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub outlet: LinkId,
    /// Outlet channel discharge [m³/s].
    pub discharge: f64,
    pub sources: BTreeMap<LinkId, SourceTally>,
}

impl ContributionRecord {
    /// Particles in the outlet channel.
    pub fn total(&self) -> u64 {
        self.sources.values().map(SourceTally::total).sum()
    }

    pub fn from_link(&self, link: LinkId) -> Option<&SourceTally> {
        self.sources.get(&link)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContributionAggregator {
    pub outlet: LinkId,
    /// Fold every rain event into `SourceTally::rain` only.
    pub aggregate_rain: bool,
}

impl ContributionAggregator {
    pub fn new(outlet: LinkId, aggregate_rain: bool) -> Self {
        Self { outlet, aggregate_rain }
    }

    /// Tallies the outlet's channel-front of `snapshot`. The discharge comes
    /// from `field`, the hydraulic state the snapshot was advanced with.
    pub fn record(&self, snapshot: &DomainSnapshot, field: &HydraulicField) -> Result<ContributionRecord> {
        let missing = || Error::MissingOutlet { outlet: self.outlet, timestamp: snapshot.timestamp };
        if snapshot.outlet != Some(self.outlet) {
            return Err(missing());
        }
        let inventory = snapshot.inventory(self.outlet).ok_or_else(missing)?;
        let state = field.get(self.outlet).ok_or_else(missing)?;

        let mut sources: BTreeMap<LinkId, SourceTally> = BTreeMap::new();
        for particle in &inventory.channel {
            sources
                .entry(particle.origin)
                .or_default()
                .add(particle.source, !self.aggregate_rain);
        }
        Ok(ContributionRecord { outlet: self.outlet, discharge: state.channel_discharge, sources })
    }
}

// ---------------------------------------------------------------------------
// Output series
// ---------------------------------------------------------------------------

/// Records keyed by timestamp; the run's output artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContributionSeries {
    records: BTreeMap<Timestamp, ContributionRecord>,
}

impl ContributionSeries {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, timestamp: Timestamp, record: ContributionRecord) {
        self.records.insert(timestamp, record);
    }

    pub fn get(&self, timestamp: Timestamp) -> Option<&ContributionRecord> {
        self.records.get(&timestamp)
    }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, &ContributionRecord)> {
        self.records.iter().map(|(&t, r)| (t, r))
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.records.keys().copied().collect()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .map_err(|source| Error::Codec { path: path.to_path_buf(), source })?;
        info!(path = %path.display(), records = self.len(), "contribution series written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        bincode::deserialize_from(BufReader::new(file))
            .map_err(|source| Error::Codec { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::HydraulicState;
    use crate::particle::ParticleIds;

    fn state(q: f64) -> HydraulicState {
        HydraulicState {
            channel_discharge: q,
            channel_volume: 1.0,
            pond_volume: 1.0,
            pond_to_channel: 0.0,
            pond_to_top_layer: 0.0,
            top_layer_volume: 1.0,
            top_layer_to_subsurface: 0.0,
            subsurface_volume: 1.0,
            subsurface_to_channel: 0.0,
            accumulated_rain_volume: 0.0,
        }
    }

    fn outlet_snapshot(ids: &mut ParticleIds) -> DomainSnapshot {
        let mut snap = DomainSnapshot::new([1, 2], 1200, Some(1));
        let channel = &mut snap.inventory_mut(1).unwrap().channel;
        channel.push(ids.issue(1, LayerSource::Channel));
        channel.push(ids.issue(2, LayerSource::Channel));
        channel.push(ids.issue(2, LayerSource::Subsurface));
        channel.push(ids.issue(2, LayerSource::Rain(600)));
        channel.push(ids.issue(2, LayerSource::Rain(600)));
        channel.push(ids.issue(2, LayerSource::Rain(1200)));
        // Not in the outlet channel: ignored.
        snap.inventory_mut(1).unwrap().pond.push(ids.issue(1, LayerSource::Pond));
        snap.inventory_mut(2).unwrap().channel.push(ids.issue(2, LayerSource::Channel));
        snap
    }

    fn field() -> HydraulicField {
        HydraulicField { timestamp: 1200, states: [(1, state(3.5)), (2, state(1.0))].into_iter().collect() }
    }

    #[test]
    fn test_tally_by_origin_and_source() {
        let snap = outlet_snapshot(&mut ParticleIds::new());
        let record = ContributionAggregator::new(1, true).record(&snap, &field()).unwrap();

        assert_eq!(record.outlet, 1);
        assert_eq!(record.discharge, 3.5);
        assert_eq!(record.total(), 6);
        assert_eq!(record.from_link(1).unwrap().channel, 1);
        let upstream = record.from_link(2).unwrap();
        assert_eq!((upstream.channel, upstream.subsurface, upstream.rain), (1, 1, 3));
        assert!(upstream.rain_events.is_empty());
    }

    #[test]
    fn test_rain_split_per_event() {
        let snap = outlet_snapshot(&mut ParticleIds::new());
        let record = ContributionAggregator::new(1, false).record(&snap, &field()).unwrap();
        let upstream = record.from_link(2).unwrap();
        assert_eq!(upstream.rain, 3);
        assert_eq!(upstream.rain_events.get(&600), Some(&2));
        assert_eq!(upstream.rain_events.get(&1200), Some(&1));
    }

    #[test]
    fn test_missing_outlet() {
        let snap = outlet_snapshot(&mut ParticleIds::new());
        let err = ContributionAggregator::new(3, true).record(&snap, &field()).unwrap_err();
        assert!(matches!(err, Error::MissingOutlet { outlet: 3, timestamp: 1200 }));

        // Outlet present in the snapshot but without a hydraulic row.
        let mut partial = field();
        partial.states.remove(&1);
        assert!(ContributionAggregator::new(1, true).record(&snap, &partial).is_err());
    }

    #[test]
    fn test_series_written_and_read_back() {
        let snap = outlet_snapshot(&mut ParticleIds::new());
        let mut series = ContributionSeries::new();
        series.insert(1200, ContributionAggregator::new(1, false).record(&snap, &field()).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        series.write_to(&path).unwrap();
        let back = ContributionSeries::read_from(&path).unwrap();
        assert_eq!(back, series);
        assert_eq!(back.timestamps(), vec![1200]);
    }
}
