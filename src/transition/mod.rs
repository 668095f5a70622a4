// ============================================================================
// Transition Engine: one timestep of particle transport
//
//   old snapshot ──read only──▶ per-link outcomes ──merge──▶ new snapshot
//
// For every link of the old snapshot, every particle in every front
// inventory gets up to `delta_t` Bernoulli trials against its layer's leave
// probability:
//
//   channel     ──▶ downstream link's channel (stays put at the outlet)
//   subsurface  ──▶ own channel
//   top layer   ──▶ own subsurface
//   pond        ──▶ own channel   if U ≤ p_pc
//               ──▶ own top layer if U ≤ p_pc + p_pt
//
// A particle that exhausts its trials stays in its layer. Rain particles are
// injected straight into the new snapshot's pond-front before the moved
// particles land there, so they first take part in the following step.
//
// Per-link work never touches another link's state: outcomes are computed
// from the old snapshot only and merged afterwards, which is what lets the
// parallel path split the links across the rayon pool.
// ============================================================================

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PhysicalParams;
use crate::error::{Error, Result};
use crate::hydrology::{Degenerate, HydraulicField, HydraulicState, PondExits};
use crate::network::{LinkId, Network};
use crate::particle::{Layer, Particle, ParticleIds, Timestamp};
use crate::snapshot::{DomainSnapshot, LinkInventory};

/// A transfer path between stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    ChannelDownstream,
    PondToChannel,
    PondToTopLayer,
    /// Both pond exits taken together.
    PondTotal,
    TopLayerToSubsurface,
    SubsurfaceToChannel,
}

/// A leave probability outside [0, 1]. Not clamped; reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityAnomaly {
    pub link: LinkId,
    pub route: Route,
    pub value: f64,
}

/// Bookkeeping of one timestep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub timestamp: Timestamp,
    pub particles_before: u64,
    pub particles_after: u64,
    /// Rain particles added this step.
    pub injected: u64,
    /// Channel particles handed to the downstream link.
    pub moved_downstream: u64,
    /// Particles that changed layer within their link.
    pub moved_within: u64,
    /// Particles that exhausted their trials.
    pub retained: u64,
    /// Channel particles that left the last link of the domain (kept there).
    pub exits: u64,
    pub anomalies: Vec<ProbabilityAnomaly>,
}

/// Leave probabilities of the layers that hold particles.
#[derive(Debug, Clone, Copy, Default)]
struct LinkProbabilities {
    channel: Option<f64>,
    pond: Option<PondExits>,
    top_layer: Option<f64>,
    subsurface: Option<f64>,
}

/// What one link contributes to the new snapshot.
#[derive(Debug, Default)]
struct LinkOutcome {
    link: LinkId,
    /// Particles resident at this link after the step.
    local: LinkInventory,
    /// Channel particles bound for the downstream link.
    downstream: Option<(LinkId, Vec<Particle>)>,
    moved_within: u64,
    retained: u64,
    exits: u64,
    anomalies: Vec<ProbabilityAnomaly>,
}

pub struct TransitionEngine<'a> {
    network: &'a Network,
    params: &'a PhysicalParams,
    /// Rain volume per injected particle [m³]; 0 disables injection.
    volume_per_particle: f64,
}

impl<'a> TransitionEngine<'a> {
    pub fn new(network: &'a Network, params: &'a PhysicalParams, volume_per_particle: f64) -> Self {
        Self { network, params, volume_per_particle }
    }

    /// Advances `old` by one step with a single random stream, visiting links
    /// in ascending id order.
    pub fn advance<R: Rng + ?Sized>(
        &self,
        old: &DomainSnapshot,
        field: &HydraulicField,
        ids: &mut ParticleIds,
        rng: &mut R,
    ) -> Result<(DomainSnapshot, StepReport)> {
        let outcomes = old
            .inventories()
            .map(|(link, inventory)| self.transition_link(old, field, link, inventory, &mut *rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.assemble(old, field, ids, outcomes))
    }

    /// Same step with links partitioned across the rayon pool. Each link draws
    /// from its own stream derived from (`seed`, timestamp, link), so the
    /// result does not depend on scheduling.
    pub fn advance_parallel(
        &self,
        old: &DomainSnapshot,
        field: &HydraulicField,
        ids: &mut ParticleIds,
        seed: u64,
    ) -> Result<(DomainSnapshot, StepReport)> {
        let work: Vec<(LinkId, &LinkInventory)> = old.inventories().collect();
        let outcomes = work
            .par_iter()
            .map(|&(link, inventory)| {
                let mut rng = ChaCha8Rng::seed_from_u64(link_stream_seed(seed, field.timestamp, link));
                self.transition_link(old, field, link, inventory, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.assemble(old, field, ids, outcomes))
    }

    // ---------------------------------------------------------------------
    // Per link
    // ---------------------------------------------------------------------

    fn transition_link<R: Rng + ?Sized>(
        &self,
        old: &DomainSnapshot,
        field: &HydraulicField,
        link: LinkId,
        inventory: &LinkInventory,
        rng: &mut R,
    ) -> Result<LinkOutcome> {
        let mut outcome = LinkOutcome { link, ..Default::default() };
        if inventory.is_empty() {
            return Ok(outcome);
        }
        let state = field
            .get(link)
            .ok_or(Error::IncompleteFrame { link, timestamp: field.timestamp })?;
        let probs = probabilities_for(link, inventory, state, &mut outcome.anomalies)
            .map_err(|d| d.at(link, field.timestamp))?;

        let delta_t = self.params.delta_t;
        let downstream = self.network.downstream_of(link).filter(|d| old.contains(*d));
        let mut sent = Vec::new();

        if let Some(p) = probs.channel {
            for &particle in &inventory.channel {
                if bernoulli_trials(rng, delta_t, p) {
                    match downstream {
                        Some(_) => sent.push(particle),
                        None => {
                            outcome.exits += 1;
                            outcome.local.channel.push(particle);
                        }
                    }
                } else {
                    outcome.retained += 1;
                    outcome.local.channel.push(particle);
                }
            }
        }

        if let Some(p) = probs.subsurface {
            for &particle in &inventory.subsurface {
                if bernoulli_trials(rng, delta_t, p) {
                    outcome.moved_within += 1;
                    outcome.local.channel.push(particle);
                } else {
                    outcome.retained += 1;
                    outcome.local.subsurface.push(particle);
                }
            }
        }

        if let Some(p) = probs.top_layer {
            for &particle in &inventory.top_layer {
                if bernoulli_trials(rng, delta_t, p) {
                    outcome.moved_within += 1;
                    outcome.local.subsurface.push(particle);
                } else {
                    outcome.retained += 1;
                    outcome.local.top_layer.push(particle);
                }
            }
        }

        if let Some(exits) = probs.pond {
            for &particle in &inventory.pond {
                match pond_trials(rng, delta_t, &exits) {
                    Some(layer) => {
                        outcome.moved_within += 1;
                        outcome.local.layer_mut(layer).push(particle);
                    }
                    None => {
                        outcome.retained += 1;
                        outcome.local.pond.push(particle);
                    }
                }
            }
        }

        if let Some(target) = downstream {
            if !sent.is_empty() {
                outcome.downstream = Some((target, sent));
            }
        }
        Ok(outcome)
    }

    // ---------------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------------

    fn assemble(
        &self,
        old: &DomainSnapshot,
        field: &HydraulicField,
        ids: &mut ParticleIds,
        outcomes: Vec<LinkOutcome>,
    ) -> (DomainSnapshot, StepReport) {
        let mut next = old.successor(field.timestamp);
        let mut report = StepReport {
            timestamp: field.timestamp,
            particles_before: old.count_particles(),
            ..Default::default()
        };

        // Rain lands first so it sits ahead of this step's arrivals.
        if self.volume_per_particle > 0.0 {
            let links: Vec<LinkId> = next.link_ids().collect();
            for link in links {
                if let Some(state) = field.get(link) {
                    let expected = self.expected_rain_particles(state);
                    report.injected += next.inject_rain(link, expected, ids);
                }
            }
        }

        let mut transfers = Vec::new();
        for outcome in outcomes {
            report.moved_within += outcome.moved_within;
            report.retained += outcome.retained;
            report.exits += outcome.exits;
            report.anomalies.extend(outcome.anomalies);
            if let Some(inventory) = next.inventory_mut(outcome.link) {
                for layer in Layer::ALL {
                    inventory.layer_mut(layer).extend_from_slice(outcome.local.layer(layer));
                }
            }
            if let Some(transfer) = outcome.downstream {
                transfers.push(transfer);
            }
        }
        for (target, particles) in transfers {
            report.moved_downstream += particles.len() as u64;
            if let Some(inventory) = next.inventory_mut(target) {
                inventory.channel.extend(particles);
            }
        }

        for anomaly in &report.anomalies {
            warn!(
                link = anomaly.link,
                route = ?anomaly.route,
                value = anomaly.value,
                timestamp = field.timestamp,
                "leave probability outside [0, 1]"
            );
        }

        report.particles_after = next.count_particles();
        debug_assert_eq!(report.particles_after, report.particles_before + report.injected);
        debug!(
            timestamp = field.timestamp,
            before = report.particles_before,
            after = report.particles_after,
            injected = report.injected,
            downstream = report.moved_downstream,
            within = report.moved_within,
            retained = report.retained,
            "step advanced"
        );
        (next, report)
    }

    /// Rain particles that should exist at a link given its accumulated rain.
    fn expected_rain_particles(&self, state: &HydraulicState) -> u64 {
        let count = (state.accumulated_rain_volume / self.volume_per_particle).floor();
        if count.is_finite() && count > 0.0 { count as u64 } else { 0 }
    }
}

// ---------------------------------------------------------------------------
// Trials
// ---------------------------------------------------------------------------

/// Up to `delta_t` draws; true on the first U ≤ p.
fn bernoulli_trials<R: Rng + ?Sized>(rng: &mut R, delta_t: u32, p: f64) -> bool {
    (0..delta_t).any(|_| rng.gen::<f64>() <= p)
}

/// Up to `delta_t` draws against the two ordered pond thresholds.
fn pond_trials<R: Rng + ?Sized>(rng: &mut R, delta_t: u32, exits: &PondExits) -> Option<Layer> {
    let cumulative = exits.cumulative();
    for _ in 0..delta_t {
        let u = rng.gen::<f64>();
        if u <= exits.to_channel {
            return Some(Layer::Channel);
        } else if u <= cumulative {
            return Some(Layer::TopLayer);
        }
    }
    None
}

fn probabilities_for(
    link: LinkId,
    inventory: &LinkInventory,
    state: &HydraulicState,
    anomalies: &mut Vec<ProbabilityAnomaly>,
) -> std::result::Result<LinkProbabilities, Degenerate> {
    let mut check = |route: Route, value: f64| {
        if !(0.0..=1.0).contains(&value) {
            anomalies.push(ProbabilityAnomaly { link, route, value });
        }
    };

    let mut probs = LinkProbabilities::default();
    if !inventory.channel.is_empty() {
        let p = state.channel_probability()?;
        check(Route::ChannelDownstream, p);
        probs.channel = Some(p);
    }
    if !inventory.pond.is_empty() {
        let exits = state.pond_exits()?;
        check(Route::PondToChannel, exits.to_channel);
        check(Route::PondToTopLayer, exits.to_top_layer);
        check(Route::PondTotal, exits.cumulative());
        probs.pond = Some(exits);
    }
    if !inventory.top_layer.is_empty() {
        let p = state.top_layer_probability()?;
        check(Route::TopLayerToSubsurface, p);
        probs.top_layer = Some(p);
    }
    if !inventory.subsurface.is_empty() {
        let p = state.subsurface_probability()?;
        check(Route::SubsurfaceToChannel, p);
        probs.subsurface = Some(p);
    }
    Ok(probs)
}

/// SplitMix64 finalizer over the run seed, the step and the link.
fn link_stream_seed(seed: u64, timestamp: Timestamp, link: LinkId) -> u64 {
    let mut z = seed
        ^ (timestamp as u64).rotate_left(32)
        ^ u64::from(link).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
