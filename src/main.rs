// ============================================================================
// basin-trace: tracer-particle transport through a drainage network
//
// Reads a sequence of hydrological model snapshots, moves particles between
// the pond, top-layer, subsurface and channel stores of every link, and writes
// which sources feed the outlet's discharge at each timestep.
//
// Either point it at a JSON config:
//   basin-trace --config run.json
// or pass the run on the command line:
//   basin-trace --in-first-snapshot out/basin_1500000000.bin --in-rvr net.rvr \
//       --in-prm net.prm --link-id 367813 --out-hyd tracks.bin --all-parts 10
// ============================================================================

use std::path::PathBuf;

use basin_trace::{run_tracking, Error, PhysicalParams, Result, SeedingPolicy, TrackingConfig};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "basin-trace")]
#[command(about = "Track tracer particles through a river network and tally outlet sources")]
struct Cli {
    /// JSON run configuration; replaces every other option
    #[arg(long, conflicts_with_all = ["in_first_snapshot", "in_rvr", "in_prm", "link_id", "out_hyd"])]
    config: Option<PathBuf>,

    /// First snapshot file of the sequence
    #[arg(long)]
    in_first_snapshot: Option<PathBuf>,

    /// Network topology (.rvr)
    #[arg(long)]
    in_rvr: Option<PathBuf>,

    /// Link parameters (.prm)
    #[arg(long)]
    in_prm: Option<PathBuf>,

    /// Outlet link id
    #[arg(long)]
    link_id: Option<u32>,

    /// Output contribution series
    #[arg(long)]
    out_hyd: Option<PathBuf>,

    /// Seed channel particles proportionally to volume, this many at the outlet
    #[arg(long)]
    max_parts: Option<u64>,

    /// Seed this many particles in every layer of every link
    #[arg(long)]
    all_parts: Option<u64>,

    /// Rain volume per injected particle [m³] (0 = no rain particles)
    #[arg(long, default_value = "0")]
    vol_per_parts: f64,

    /// Random seed (default: entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Split transitions across threads by link
    #[arg(long)]
    parallel: bool,

    /// Stop after this many snapshot frames
    #[arg(long)]
    max_frames: Option<usize>,

    /// Keep rain particles split by rain timestamp in the output
    #[arg(long)]
    no_aggregate_rain: bool,
}

impl Cli {
    fn into_config(self) -> Result<TrackingConfig> {
        if let Some(path) = self.config {
            return TrackingConfig::from_json_file(&path);
        }

        fn required<T>(value: Option<T>, flag: &str) -> Result<T> {
            value.ok_or_else(|| Error::Config(format!("--{flag} is required without --config")))
        }

        let config = TrackingConfig {
            snapshot_start: required(self.in_first_snapshot, "in-first-snapshot")?,
            topology_path: required(self.in_rvr, "in-rvr")?,
            parameter_path: required(self.in_prm, "in-prm")?,
            outlet: required(self.link_id, "link-id")?,
            output_path: required(self.out_hyd, "out-hyd")?,
            seeding: SeedingPolicy::from_options(self.max_parts, self.all_parts)?,
            volume_per_particle: self.vol_per_parts,
            seed: self.seed,
            parallel: self.parallel,
            max_frames: self.max_frames,
            aggregate_rain: !self.no_aggregate_rain,
            physics: PhysicalParams::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "basin_trace=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Cli::parse().into_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Tracking outlet {} from {}", config.outlet, config.snapshot_start.display());

    match run_tracking(&config) {
        Ok(summary) => {
            info!(
                "{} frames, {} records, {} particles created, {} from rain",
                summary.frames, summary.records, summary.particles_created, summary.rain_injected
            );
            if !summary.missing_outlet_timestamps.is_empty() {
                info!("No record for {} timesteps (outlet missing)", summary.missing_outlet_timestamps.len());
            }
            info!("Output written to {}", config.output_path.display());
        }
        Err(e) => {
            error!("Tracking failed: {}", e);
            std::process::exit(1);
        }
    }
}
