//! Domain snapshots: where every particle is at one instant.
//!
//! A snapshot maps each link to its four front inventories (the particles
//! resident in that layer this timestep) and carries the per-link count of
//! rain particles generated so far. The transition engine reads one snapshot
//! and builds its successor; snapshots are never mutated once superseded.

mod seed;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::network::LinkId;
use crate::particle::{Layer, LayerSource, Particle, ParticleIds, Timestamp};

/// Front inventories of one link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkInventory {
    pub channel: Vec<Particle>,
    pub pond: Vec<Particle>,
    pub top_layer: Vec<Particle>,
    pub subsurface: Vec<Particle>,
}

impl LinkInventory {
    pub fn layer(&self, layer: Layer) -> &Vec<Particle> {
        match layer {
            Layer::Channel => &self.channel,
            Layer::Pond => &self.pond,
            Layer::TopLayer => &self.top_layer,
            Layer::Subsurface => &self.subsurface,
        }
    }

    pub fn layer_mut(&mut self, layer: Layer) -> &mut Vec<Particle> {
        match layer {
            Layer::Channel => &mut self.channel,
            Layer::Pond => &mut self.pond,
            Layer::TopLayer => &mut self.top_layer,
            Layer::Subsurface => &mut self.subsurface,
        }
    }

    pub fn len(&self) -> usize {
        self.channel.len() + self.pond.len() + self.top_layer.len() + self.subsurface.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.channel.iter().chain(&self.pond).chain(&self.top_layer).chain(&self.subsurface)
    }
}

/// Particle counts by originating store, over a whole snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCensus {
    pub pond: u64,
    pub top_layer: u64,
    pub subsurface: u64,
    pub channel: u64,
    pub rain: u64,
}

impl LayerCensus {
    pub fn total(&self) -> u64 {
        self.pond + self.top_layer + self.subsurface + self.channel + self.rain
    }

    fn count(&mut self, source: LayerSource) {
        match source {
            LayerSource::Pond => self.pond += 1,
            LayerSource::TopLayer => self.top_layer += 1,
            LayerSource::Subsurface => self.subsurface += 1,
            LayerSource::Channel => self.channel += 1,
            LayerSource::Rain(_) => self.rain += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainSnapshot {
    pub timestamp: Timestamp,
    pub outlet: Option<LinkId>,
    inventories: BTreeMap<LinkId, LinkInventory>,
    rain_counters: BTreeMap<LinkId, u64>,
}

impl DomainSnapshot {
    /// Empty inventories for every link in `links`.
    pub fn new(links: impl IntoIterator<Item = LinkId>, timestamp: Timestamp, outlet: Option<LinkId>) -> Self {
        Self {
            timestamp,
            outlet,
            inventories: links.into_iter().map(|l| (l, LinkInventory::default())).collect(),
            rain_counters: BTreeMap::new(),
        }
    }

    /// Empty snapshot over the same links, stamped `timestamp`, inheriting the
    /// outlet and the cumulative rain counters unchanged.
    pub fn successor(&self, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            outlet: self.outlet,
            inventories: self.inventories.keys().map(|&l| (l, LinkInventory::default())).collect(),
            rain_counters: self.rain_counters.clone(),
        }
    }

    pub fn contains(&self, link: LinkId) -> bool { self.inventories.contains_key(&link) }

    pub fn inventory(&self, link: LinkId) -> Option<&LinkInventory> { self.inventories.get(&link) }

    pub fn inventory_mut(&mut self, link: LinkId) -> Option<&mut LinkInventory> {
        self.inventories.get_mut(&link)
    }

    /// Inventories in ascending link order.
    pub fn inventories(&self) -> impl Iterator<Item = (LinkId, &LinkInventory)> {
        self.inventories.iter().map(|(&l, inv)| (l, inv))
    }

    pub fn link_ids(&self) -> impl Iterator<Item = LinkId> + '_ { self.inventories.keys().copied() }

    pub fn link_count(&self) -> usize { self.inventories.len() }

    pub fn count_particles(&self) -> u64 {
        self.inventories.values().map(|inv| inv.len() as u64).sum()
    }

    pub fn census(&self) -> LayerCensus {
        let mut census = LayerCensus::default();
        for p in self.inventories.values().flat_map(|inv| inv.particles()) {
            census.count(p.source);
        }
        census
    }

    /// Rain particles generated at `link` since the run started.
    pub fn rain_counter(&self, link: LinkId) -> u64 {
        self.rain_counters.get(&link).copied().unwrap_or(0)
    }

    /// Tops the pond-front of `link` up to `expected` rain particles generated
    /// overall, tagged with this snapshot's timestamp. Returns how many were
    /// added; never negative, and the counter never decreases.
    pub fn inject_rain(&mut self, link: LinkId, expected: u64, ids: &mut ParticleIds) -> u64 {
        let generated = self.rain_counter(link);
        if expected <= generated {
            return 0;
        }
        let Some(inventory) = self.inventories.get_mut(&link) else {
            return 0;
        };
        let to_add = expected - generated;
        let source = LayerSource::Rain(self.timestamp);
        inventory.pond.extend((0..to_add).map(|_| ids.issue(link, source)));
        self.rain_counters.insert(link, expected);
        to_add
    }
}
