//! Tracer particles and their provenance tags.
//!
//! A particle is an immutable token: where it was created and from which
//! store (or which rain event). Simulation only ever relocates particles
//! between inventories; it never edits or drops one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::LinkId;

/// Simulation time as encoded in snapshot file names.
pub type Timestamp = i64;

/// One of the four storage compartments of a hillslope-link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    Channel,
    Pond,
    TopLayer,
    Subsurface,
}

impl Layer {
    pub const ALL: [Layer; 4] = [Layer::Channel, Layer::Pond, Layer::TopLayer, Layer::Subsurface];

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Channel => "channel",
            Layer::Pond => "pond",
            Layer::TopLayer => "top-layer",
            Layer::Subsurface => "subsurface",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Origin of a particle's water: a storage layer, or a rain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerSource {
    Pond,
    TopLayer,
    Subsurface,
    Channel,
    /// Rain that fell during the step ending at this timestamp.
    Rain(Timestamp),
}

impl LayerSource {
    pub fn of_layer(layer: Layer) -> Self {
        match layer {
            Layer::Channel => LayerSource::Channel,
            Layer::Pond => LayerSource::Pond,
            Layer::TopLayer => LayerSource::TopLayer,
            Layer::Subsurface => LayerSource::Subsurface,
        }
    }

    /// Integer tag of the hydrological model's output conventions: -1 pond,
    /// -2 top layer, -3 subsurface, -4 channel, the timestamp for rain.
    pub fn tag(&self) -> i64 {
        match self {
            LayerSource::Pond => -1,
            LayerSource::TopLayer => -2,
            LayerSource::Subsurface => -3,
            LayerSource::Channel => -4,
            LayerSource::Rain(t) => *t,
        }
    }

    pub fn is_rain(&self) -> bool { matches!(self, LayerSource::Rain(_)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Particle {
    pub id: u64,
    pub origin: LinkId,
    pub source: LayerSource,
}

/// Sequential id allocator, one per run.
#[derive(Debug, Clone)]
pub struct ParticleIds {
    next: u64,
}

impl Default for ParticleIds {
    fn default() -> Self { Self { next: 1 } }
}

impl ParticleIds {
    pub fn new() -> Self { Self::default() }

    pub fn issue(&mut self, origin: LinkId, source: LayerSource) -> Particle {
        let id = self.next;
        self.next += 1;
        Particle { id, origin, source }
    }

    /// Particles created so far.
    pub fn issued(&self) -> u64 { self.next - 1 }
}
