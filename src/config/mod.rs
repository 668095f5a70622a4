// ============================================================================
// Tracking Configuration
//
// Two layers:
//   PhysicalParams   hillslope/channel constants of the hydrological model,
//                    an immutable value handed to the hydrology and the
//                    transition engine (no process-wide state)
//   TrackingConfig   inputs, outlet, seeding, randomness and output path
//                    of one run
//
// TrackingConfig comes either from CLI flags (see main.rs) or from a JSON
// file rooted at "asynch_parttrack_conf".
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::{LinkAttributes, LinkId};

// ---------------------------------------------------------------------------
// Physical constants
// ---------------------------------------------------------------------------

/// Constants of the hillslope-link model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParams {
    /// Overland flow velocity scale used in the pond → channel coefficient.
    pub vh: f64,
    /// Top layer → subsurface rate [1/s].
    pub ki: f64,
    /// Subsurface → channel rate [1/s].
    pub k3: f64,
    /// Saturation-excess infiltration term offset.
    pub a: f64,
    /// Saturation-excess infiltration term scale.
    pub b: f64,
    /// Pond saturation limit (water column, m).
    pub sl: f64,
    /// Saturation-excess exponent.
    pub alpha: f64,
    /// Channel routing discharge exponent.
    pub lambda_1: f64,
    /// Channel routing area exponent.
    pub lambda_2: f64,
    /// Reference channel velocity [m/s].
    pub vel_ref: f64,
    /// Bernoulli trials per particle per timestep (one per second of a 10 min step).
    pub delta_t: u32,
}

impl Default for PhysicalParams {
    fn default() -> Self {
        Self {
            vh:       0.02,
            ki:       0.02,
            k3:       2.0425e-6,
            a:        0.0,
            b:        99.0,
            sl:       0.1,
            alpha:    3.0,
            lambda_1: 0.2,
            lambda_2: -0.1,
            vel_ref:  0.33,
            delta_t:  600,
        }
    }
}

impl PhysicalParams {
    /// Pond → channel rate coefficient.
    pub fn k2(&self, attrs: &LinkAttributes) -> f64 {
        self.vh * (attrs.length / attrs.hillslope_area) * 60.0 * 0.001
    }

    /// Pond → top layer rate coefficient; falls off as the pond saturates.
    pub fn kt(&self, k2: f64, pond_water_column: f64) -> f64 {
        k2 * (self.a + self.b * (1.0 - pond_water_column / self.sl).powf(self.alpha))
    }

    /// Channel residence factor τ of `vol = τ·Q^(1-λ1)/(1-λ1)`.
    pub fn channel_tau(&self, attrs: &LinkAttributes) -> f64 {
        ((1.0 - self.lambda_1) * attrs.length * 1000.0)
            / (self.vel_ref * attrs.upstream_area.powf(self.lambda_2))
    }

    pub fn validate(&self) -> Result<()> {
        if self.delta_t == 0 {
            return Err(Error::Config("delta_t must be at least 1".into()));
        }
        if (1.0 - self.lambda_1).abs() < f64::EPSILON {
            return Err(Error::Config("lambda_1 must differ from 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// Initial-condition policy. Exactly one must be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedingPolicy {
    /// Channel particles proportional to channel volume, `max_particles` at the outlet.
    Proportional { max_particles: u64 },
    /// `per_layer` particles in each of the four layers of every link.
    Uniform { per_layer: u64 },
}

impl SeedingPolicy {
    pub fn from_options(max_particles: Option<u64>, per_layer: Option<u64>) -> Result<Self> {
        match (max_particles, per_layer) {
            (Some(max_particles), None) => Ok(Self::Proportional { max_particles }),
            (None, Some(per_layer)) => Ok(Self::Uniform { per_layer }),
            (Some(_), Some(_)) => Err(Error::AmbiguousSeeding(
                "both a maximum particle count and a per-layer count were given".into(),
            )),
            (None, None) => Err(Error::AmbiguousSeeding(
                "neither a maximum particle count nor a per-layer count was given".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// First file of the snapshot sequence.
    pub snapshot_start: PathBuf,
    pub topology_path: PathBuf,
    pub parameter_path: PathBuf,
    pub outlet: LinkId,
    pub output_path: PathBuf,
    pub seeding: SeedingPolicy,
    /// Rain water volume represented by one particle [m³]; 0 disables rain.
    pub volume_per_particle: f64,
    /// `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Partition transitions by link across the rayon pool.
    pub parallel: bool,
    /// Stop after this many frames.
    pub max_frames: Option<usize>,
    /// Fold every rain particle into one bucket in the contribution records.
    pub aggregate_rain: bool,
    pub physics: PhysicalParams,
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        self.physics.validate()?;
        if !self.volume_per_particle.is_finite() || self.volume_per_particle < 0.0 {
            return Err(Error::Config(format!(
                "volume per particle must be a non-negative number, got {}",
                self.volume_per_particle
            )));
        }
        if self.max_frames == Some(0) {
            return Err(Error::Config("max_frames must be at least 1".into()));
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&text, path)
    }

    pub fn from_json_str(text: &str, path: &Path) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let root = file.asynch_parttrack_conf;
        let ws = root.watershed;

        fn required<T>(value: Option<T>, key: &str) -> Result<T> {
            value.ok_or_else(|| Error::Config(format!("missing key 'watershed' > '{key}'")))
        }

        let mut physics = PhysicalParams::default();
        if let Some(delta_t) = root.simulation.delta_t {
            physics.delta_t = delta_t;
        }

        let config = Self {
            snapshot_start: required(ws.hdf5_file_path, "hdf5_file_path")?,
            topology_path: required(ws.rvr_file_path, "rvr_file_path")?,
            parameter_path: required(ws.prm_file_path, "prm_file_path")?,
            outlet: required(ws.outlet_link_id, "outlet_link_id")?,
            output_path: required(ws.particle_track_file_path, "particle_track_file_path")?,
            seeding: SeedingPolicy::from_options(root.particles.max_parts, root.particles.all_parts)?,
            volume_per_particle: root.particles.vol_per_parts.unwrap_or(0.0),
            seed: root.simulation.seed,
            parallel: root.simulation.parallel,
            max_frames: root.simulation.max_frames,
            aggregate_rain: root.simulation.aggregate_rain,
            physics,
        };
        config.validate()?;
        Ok(config)
    }
}

// JSON layout

#[derive(Deserialize)]
struct ConfigFile {
    asynch_parttrack_conf: ConfigRoot,
}

#[derive(Deserialize)]
struct ConfigRoot {
    watershed: WatershedSection,
    #[serde(default)]
    particles: ParticlesSection,
    #[serde(default)]
    simulation: SimulationSection,
}

#[derive(Deserialize)]
struct WatershedSection {
    outlet_link_id: Option<LinkId>,
    rvr_file_path: Option<PathBuf>,
    prm_file_path: Option<PathBuf>,
    hdf5_file_path: Option<PathBuf>,
    particle_track_file_path: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct ParticlesSection {
    max_parts: Option<u64>,
    all_parts: Option<u64>,
    vol_per_parts: Option<f64>,
}

#[derive(Deserialize)]
struct SimulationSection {
    seed: Option<u64>,
    #[serde(default)]
    parallel: bool,
    delta_t: Option<u32>,
    max_frames: Option<usize>,
    #[serde(default = "default_true")]
    aggregate_rain: bool,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            seed: None,
            parallel: false,
            delta_t: None,
            max_frames: None,
            aggregate_rain: true,
        }
    }
}

fn default_true() -> bool { true }
