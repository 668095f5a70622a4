//! basin-trace: Monte Carlo tracer-particle transport through a river-basin drainage network.
//!
//! Architecture:
//! - Drainage topology from `.rvr`/`.prm` files (network module) over a CSR donor graph (graph module)
//! - Per-link hydraulic state and leave probabilities, rebuilt from every model frame (hydrology module)
//! - Particle provenance and per-link front inventories (particle, snapshot modules)
//! - Bernoulli-trial transition step reading one snapshot, writing its successor (transition module)
//! - Outlet source tallies collected into a timestamped series (contribution module)
//!
//! Per frame: hydraulic field → transition step (rain injected first) → outlet tally

pub mod error;
pub mod config;
pub mod graph;
pub mod network;
pub mod hydrology;
pub mod particle;
pub mod snapshot;
pub mod input;
pub mod transition;
pub mod contribution;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

pub use config::{PhysicalParams, SeedingPolicy, TrackingConfig};
pub use contribution::{ContributionAggregator, ContributionRecord, ContributionSeries, SourceTally};
pub use error::{Error, Result};
pub use hydrology::{HydraulicField, HydraulicState};
pub use input::{FileSequence, MemorySource, SnapshotFrame, SnapshotRow, SnapshotSource};
pub use network::{LinkAttributes, LinkId, Network};
pub use particle::{Layer, LayerSource, Particle, ParticleIds, Timestamp};
pub use snapshot::{DomainSnapshot, LayerCensus, LinkInventory};
pub use transition::{StepReport, TransitionEngine};

/// Totals of a finished run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Frames that drove a transition.
    pub frames: usize,
    /// Records in the output series.
    pub records: usize,
    /// Frames whose outlet could not be tallied; no record exists for them.
    pub missing_outlet_timestamps: Vec<Timestamp>,
    pub particles_created: u64,
    pub rain_injected: u64,
    pub outlet_exits: u64,
    /// Leave probabilities found outside [0, 1], over all steps.
    pub probability_anomalies: usize,
    pub final_census: LayerCensus,
}

/// Series and summary of one tracking run.
#[derive(Clone, Debug)]
pub struct TrackingOutput {
    pub series: ContributionSeries,
    pub summary: RunSummary,
}

/// Run the tracker over every frame of `source`.
///
/// The first frame seeds the initial condition and then drives the first
/// transition like every later frame. Per frame:
/// 1. Hydraulic field from the frame rows
/// 2. Transition step into a fresh snapshot (rain injection included)
/// 3. Outlet tally of the new snapshot, keyed by the frame timestamp
pub fn track<S: SnapshotSource + ?Sized>(
    network: &Network,
    config: &TrackingConfig,
    source: &mut S,
) -> Result<TrackingOutput> {
    let first = source
        .next_frame()?
        .ok_or_else(|| Error::EmptySequence { path: config.snapshot_start.clone() })?;
    let first_field = HydraulicField::compute(&first, network, &config.physics)?;

    let mut ids = ParticleIds::new();
    let mut snapshot = DomainSnapshot::seed(config.seeding, network, &first_field, config.outlet, &mut ids)?;

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let stream_seed = config.seed.unwrap_or_else(|| rng.gen());

    let engine = TransitionEngine::new(network, &config.physics, config.volume_per_particle);
    let aggregator = ContributionAggregator::new(config.outlet, config.aggregate_rain);
    let mut series = ContributionSeries::new();
    let mut summary = RunSummary::default();

    let mut pending = Some(first_field);
    loop {
        if config.max_frames.is_some_and(|max| summary.frames >= max) {
            info!(frames = summary.frames, "frame limit reached");
            break;
        }
        let field = match pending.take() {
            Some(field) => field,
            None => match source.next_frame()? {
                Some(frame) => HydraulicField::compute(&frame, network, &config.physics)?,
                None => break,
            },
        };

        let (next, report) = if config.parallel {
            engine.advance_parallel(&snapshot, &field, &mut ids, stream_seed)?
        } else {
            engine.advance(&snapshot, &field, &mut ids, &mut rng)?
        };
        summary.frames += 1;
        summary.rain_injected += report.injected;
        summary.outlet_exits += report.exits;
        summary.probability_anomalies += report.anomalies.len();

        match aggregator.record(&next, &field) {
            Ok(record) => series.insert(field.timestamp, record),
            Err(Error::MissingOutlet { outlet, timestamp }) => {
                warn!(outlet, timestamp, "outlet missing from frame, no record for this timestep");
                summary.missing_outlet_timestamps.push(timestamp);
            }
            Err(e) => return Err(e),
        }

        let census = next.census();
        debug!(
            timestamp = field.timestamp,
            pond = census.pond,
            top_layer = census.top_layer,
            subsurface = census.subsurface,
            channel = census.channel,
            rain = census.rain,
            max_discharge = field.max_discharge(),
            channel_volume = field.total_channel_volume(),
            "layer census"
        );
        snapshot = next;
    }

    summary.records = series.len();
    summary.particles_created = ids.issued();
    summary.final_census = snapshot.census();
    info!(
        frames = summary.frames,
        records = summary.records,
        particles = summary.final_census.total(),
        "tracking complete"
    );
    Ok(TrackingOutput { series, summary })
}

/// Load the network and snapshot sequence named by `config`, run the
/// tracker and write the contribution series to `config.output_path`.
pub fn run_tracking(config: &TrackingConfig) -> Result<RunSummary> {
    config.validate()?;

    let topology = network::read_rvr(&config.topology_path)?;
    let parameters = network::read_prm(&config.parameter_path)?;
    let network = Network::assemble(topology, parameters)?;

    let basin = network.basin_of(config.outlet).map_err(|_| Error::UnknownLink {
        link: config.outlet,
        context: "outlet link".into(),
    })?;
    info!(
        links = network.len(),
        outlet = config.outlet,
        basin_links = basin.len(),
        "drainage network ready"
    );

    let mut frames = FileSequence::discover(&config.snapshot_start)?;
    let output = track(&network, config, &mut frames)?;
    output.series.write_to(&config.output_path)?;
    Ok(output.summary)
}
