//! Initial particle distributions.

use tracing::info;

use super::DomainSnapshot;
use crate::config::SeedingPolicy;
use crate::error::{Error, Result};
use crate::hydrology::HydraulicField;
use crate::network::{LinkId, Network};
use crate::particle::{Layer, LayerSource, ParticleIds, Timestamp};

impl DomainSnapshot {
    /// Builds the initial condition chosen by `policy`. `field` is the
    /// hydraulic state of the first frame and fixes the timestamp.
    pub fn seed(
        policy: SeedingPolicy,
        network: &Network,
        field: &HydraulicField,
        outlet: LinkId,
        ids: &mut ParticleIds,
    ) -> Result<Self> {
        let snapshot = match policy {
            SeedingPolicy::Uniform { per_layer } => {
                Self::seed_uniform(network, per_layer, field.timestamp, outlet, ids)
            }
            SeedingPolicy::Proportional { max_particles } => {
                Self::seed_proportional(network, field, max_particles, outlet, ids)?
            }
        };
        info!(
            links = snapshot.link_count(),
            particles = snapshot.count_particles(),
            ?policy,
            "initial condition seeded"
        );
        Ok(snapshot)
    }

    /// `per_layer` particles in every layer of every link, each tagged with
    /// the layer it starts in.
    pub fn seed_uniform(
        network: &Network,
        per_layer: u64,
        timestamp: Timestamp,
        outlet: LinkId,
        ids: &mut ParticleIds,
    ) -> Self {
        let mut snapshot = Self::new(network.link_ids().iter().copied(), timestamp, Some(outlet));
        for (&link, inventory) in snapshot.inventories.iter_mut() {
            for layer in Layer::ALL {
                let source = LayerSource::of_layer(layer);
                inventory
                    .layer_mut(layer)
                    .extend((0..per_layer).map(|_| ids.issue(link, source)));
            }
        }
        snapshot
    }

    /// Channel particles proportional to channel volume, scaled so the outlet
    /// receives `max_particles`.
    pub fn seed_proportional(
        network: &Network,
        field: &HydraulicField,
        max_particles: u64,
        outlet: LinkId,
        ids: &mut ParticleIds,
    ) -> Result<Self> {
        let outlet_state = field
            .get(outlet)
            .ok_or(Error::MissingOutlet { outlet, timestamp: field.timestamp })?;
        let outlet_volume = outlet_state.channel_volume;
        if !outlet_volume.is_finite() || outlet_volume <= 0.0 {
            return Err(Error::DegenerateHydraulicState {
                link: outlet,
                layer: Layer::Channel,
                timestamp: field.timestamp,
                detail: format!("outlet channel volume is {outlet_volume}, cannot scale seeding"),
            });
        }
        let ratio = max_particles as f64 / outlet_volume;

        let mut snapshot = Self::new(network.link_ids().iter().copied(), field.timestamp, Some(outlet));
        for (&link, state) in field.states.iter() {
            let volume = if state.channel_volume.is_finite() { state.channel_volume.max(0.0) } else { 0.0 };
            let count = (ratio * volume).floor() as u64;
            if let Some(inventory) = snapshot.inventories.get_mut(&link) {
                inventory
                    .channel
                    .extend((0..count).map(|_| ids.issue(link, LayerSource::Channel)));
            }
        }
        Ok(snapshot)
    }
}
