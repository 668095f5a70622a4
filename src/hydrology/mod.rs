/// Hydrology Module
///
/// Turns one model snapshot into the per-link quantities the transition
/// engine needs:
///
/// - **Channel**: discharge Q and stored volume `τ·Q^(1-λ1)/(1-λ1)`
/// - **Pond**: volume `A_h·wc_p`, outflows to channel (`k2·V`) and top layer (`kt·V`)
/// - **Top layer**: volume `A_h·wc_t`, outflow to subsurface (`ki·V`)
/// - **Subsurface**: volume `A_h·wc_s`, outflow to channel (`k3·V`)
/// - **Rain**: accumulated rain volume over the upstream area
///
/// Only the current timestep's field is kept; it is rebuilt from every frame.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PhysicalParams;
use crate::error::{Error, Result};
use crate::input::{SnapshotFrame, SnapshotRow};
use crate::network::{LinkAttributes, LinkId, Network};
use crate::particle::{Layer, Timestamp};

/// km² → m²
const KM2_TO_M2: f64 = 1.0e6;

/// Per-link hydraulic state for one timestep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HydraulicState {
    /// Channel discharge [m³/s].
    pub channel_discharge: f64,
    /// Water stored in the channel reach [m³].
    pub channel_volume: f64,
    pub pond_volume: f64,
    /// Pond → channel discharge.
    pub pond_to_channel: f64,
    /// Pond → top layer discharge.
    pub pond_to_top_layer: f64,
    pub top_layer_volume: f64,
    /// Top layer → subsurface discharge.
    pub top_layer_to_subsurface: f64,
    pub subsurface_volume: f64,
    /// Subsurface → channel discharge.
    pub subsurface_to_channel: f64,
    /// Rain volume accumulated over the upstream area since the model start [m³].
    pub accumulated_rain_volume: f64,
}

/// Channel storage for discharge `q` on a link with `attrs`.
pub fn channel_volume(params: &PhysicalParams, attrs: &LinkAttributes, q: f64) -> f64 {
    let tau = params.channel_tau(attrs);
    tau * q.powf(1.0 - params.lambda_1) / (1.0 - params.lambda_1)
}

impl HydraulicState {
    pub fn from_row(params: &PhysicalParams, attrs: &LinkAttributes, row: &SnapshotRow) -> Self {
        let k2 = params.k2(attrs);
        let kt = params.kt(k2, row.pond_wc);

        let pond_volume = attrs.hillslope_area * row.pond_wc;
        let top_layer_volume = attrs.hillslope_area * row.top_layer_wc;
        let subsurface_volume = attrs.hillslope_area * row.subsurface_wc;

        Self {
            channel_discharge: row.discharge,
            channel_volume: channel_volume(params, attrs, row.discharge),
            pond_volume,
            pond_to_channel: k2 * pond_volume,
            pond_to_top_layer: kt * pond_volume,
            top_layer_volume,
            top_layer_to_subsurface: params.ki * top_layer_volume,
            subsurface_volume,
            subsurface_to_channel: params.k3 * subsurface_volume,
            accumulated_rain_volume: row.rain_wc * attrs.upstream_area * KM2_TO_M2,
        }
    }

    /// Per-subinterval probability that a channel particle moves downstream.
    pub fn channel_probability(&self) -> std::result::Result<f64, Degenerate> {
        leave_ratio(Layer::Channel, self.channel_discharge, self.channel_volume)
    }

    /// Both pond exits; trials test `to_channel` first, then the cumulative
    /// `to_channel + to_top_layer` threshold.
    pub fn pond_exits(&self) -> std::result::Result<PondExits, Degenerate> {
        Ok(PondExits {
            to_channel: leave_ratio(Layer::Pond, self.pond_to_channel, self.pond_volume)?,
            to_top_layer: leave_ratio(Layer::Pond, self.pond_to_top_layer, self.pond_volume)?,
        })
    }

    pub fn top_layer_probability(&self) -> std::result::Result<f64, Degenerate> {
        leave_ratio(Layer::TopLayer, self.top_layer_to_subsurface, self.top_layer_volume)
    }

    pub fn subsurface_probability(&self) -> std::result::Result<f64, Degenerate> {
        leave_ratio(Layer::Subsurface, self.subsurface_to_channel, self.subsurface_volume)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PondExits {
    pub to_channel: f64,
    pub to_top_layer: f64,
}

impl PondExits {
    /// Upper threshold of the top-layer branch.
    pub fn cumulative(&self) -> f64 { self.to_channel + self.to_top_layer }
}

/// A leave probability that cannot be formed for `layer`.
#[derive(Debug, Clone, PartialEq)]
pub struct Degenerate {
    pub layer: Layer,
    pub detail: String,
}

impl Degenerate {
    pub fn at(self, link: LinkId, timestamp: Timestamp) -> Error {
        Error::DegenerateHydraulicState { link, layer: self.layer, timestamp, detail: self.detail }
    }
}

fn leave_ratio(layer: Layer, outflow: f64, volume: f64) -> std::result::Result<f64, Degenerate> {
    if !volume.is_finite() || volume <= 0.0 {
        return Err(Degenerate { layer, detail: format!("stored volume is {volume}") });
    }
    let p = outflow / volume;
    if !p.is_finite() {
        return Err(Degenerate { layer, detail: format!("outflow {outflow} over volume {volume} is not finite") });
    }
    Ok(p)
}

// ---------------------------------------------------------------------------
// Field over the whole network
// ---------------------------------------------------------------------------

/// Hydraulic state of every link present in one frame.
#[derive(Debug, Clone, Default)]
pub struct HydraulicField {
    pub timestamp: Timestamp,
    pub states: BTreeMap<LinkId, HydraulicState>,
}

impl HydraulicField {
    /// Computes every row of `frame` in parallel. Rows naming links outside
    /// the network are rejected.
    pub fn compute(frame: &SnapshotFrame, network: &Network, params: &PhysicalParams) -> Result<Self> {
        let states = frame
            .rows
            .par_iter()
            .map(|row| {
                let attrs = network.attributes(row.link).ok_or_else(|| Error::UnknownLink {
                    link: row.link,
                    context: format!("snapshot row at t={}", frame.timestamp),
                })?;
                Ok((row.link, HydraulicState::from_row(params, attrs, row)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { timestamp: frame.timestamp, states: states.into_iter().collect() })
    }

    pub fn get(&self, link: LinkId) -> Option<&HydraulicState> { self.states.get(&link) }

    pub fn len(&self) -> usize { self.states.len() }

    pub fn is_empty(&self) -> bool { self.states.is_empty() }

    // --- Diagnostics ---

    pub fn max_discharge(&self) -> f64 {
        self.states.values().map(|s| s.channel_discharge).fold(0.0f64, f64::max)
    }

    pub fn total_channel_volume(&self) -> f64 {
        self.states.values().map(|s| s.channel_volume).filter(|v| v.is_finite()).sum()
    }
}
