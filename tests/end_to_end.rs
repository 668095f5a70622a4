//! Whole-pipeline runs over small networks.

use std::fs;
use std::path::Path;

use basin_trace::input::write_frame;
use basin_trace::network::{parse_prm, parse_rvr};
use basin_trace::{
    run_tracking, track, ContributionAggregator, ContributionSeries, DomainSnapshot, Error,
    HydraulicField, HydraulicState, Layer, LayerSource, MemorySource, Network, ParticleIds,
    PhysicalParams, SeedingPolicy, SnapshotFrame, SnapshotRow, TrackingConfig, TransitionEngine,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// 1 (outlet O) <- 2 (A) <- 3 (B)
const RVR: &str = "3\n1\n1 2\n2\n1 3\n3\n0\n";
const PRM: &str = "3\n1\n1.0 0.5 1.0\n2\n1.0 0.5 1.0\n3\n1.0 0.5 1.0\n";

fn network() -> Network {
    let topo = parse_rvr(RVR, Path::new("chain.rvr")).unwrap();
    let prm = parse_prm(PRM, Path::new("chain.prm")).unwrap();
    Network::assemble(topo, prm).unwrap()
}

fn row(link: u32, q: f64, rain_wc: f64) -> SnapshotRow {
    SnapshotRow { link, discharge: q, pond_wc: 0.01, top_layer_wc: 0.01, subsurface_wc: 0.1, rain_wc }
}

fn base_config(dir: &Path) -> TrackingConfig {
    TrackingConfig {
        snapshot_start: dir.join("basin_600.bin"),
        topology_path: dir.join("chain.rvr"),
        parameter_path: dir.join("chain.prm"),
        outlet: 1,
        output_path: dir.join("tracks.bin"),
        seeding: SeedingPolicy::Uniform { per_layer: 2 },
        volume_per_particle: 0.0,
        seed: Some(7),
        parallel: false,
        max_frames: None,
        aggregate_rain: true,
        physics: PhysicalParams::default(),
    }
}

#[test]
fn test_full_channel_probability_shifts_one_link() {
    let net = network();
    let params = PhysicalParams::default();
    // Q / volume = 1 on every link: every channel particle leaves on its first trial.
    let state = HydraulicState {
        channel_discharge: 2.0,
        channel_volume: 2.0,
        pond_volume: 1.0,
        pond_to_channel: 0.0,
        pond_to_top_layer: 0.0,
        top_layer_volume: 1.0,
        top_layer_to_subsurface: 0.0,
        subsurface_volume: 1.0,
        subsurface_to_channel: 0.0,
        accumulated_rain_volume: 0.0,
    };
    let field = HydraulicField { timestamp: 600, states: [1, 2, 3].into_iter().map(|l| (l, state)).collect() };

    let mut ids = ParticleIds::new();
    let mut old = DomainSnapshot::new([1, 2, 3], 0, Some(1));
    for (link, n) in [(1, 4), (2, 3), (3, 5)] {
        let channel = &mut old.inventory_mut(link).unwrap().channel;
        channel.extend((0..n).map(|_| ids.issue(link, LayerSource::Channel)));
    }

    let engine = TransitionEngine::new(&net, &params, 0.0);
    let (next, report) = engine.advance(&old, &field, &mut ids, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();

    let channel_of = |link| next.inventory(link).unwrap().channel.clone();
    assert!(channel_of(3).is_empty());
    assert_eq!(channel_of(2).len(), 5);
    assert!(channel_of(2).iter().all(|p| p.origin == 3));
    assert_eq!(channel_of(1).len(), 7);
    assert_eq!(report.exits, 4);
    assert_eq!(report.moved_downstream, 8);

    let record = ContributionAggregator::new(1, true).record(&next, &field).unwrap();
    assert_eq!(record.discharge, 2.0);
    assert_eq!(record.sources.len(), 2);
    assert_eq!(record.from_link(1).unwrap().channel, 4);
    assert_eq!(record.from_link(2).unwrap().channel, 3);
    assert!(record.from_link(3).is_none());
}

#[test]
fn test_topology_round_trip() {
    let text = "5\n10\n2 20 30\n20\n0\n30\n2 40 50\n40\n0\n50\n0\n";
    let prm: String = std::iter::once("3".to_string())
        .chain([10, 20, 30, 40, 50].iter().map(|id| format!("{id}\n2.0 0.1 0.4")))
        .collect::<Vec<_>>()
        .join("\n");
    let net = Network::assemble(
        parse_rvr(text, Path::new("t.rvr")).unwrap(),
        parse_prm(&prm, Path::new("t.prm")).unwrap(),
    )
    .unwrap();

    assert_eq!(net.upstream_of(10), &[20, 30]);
    assert_eq!(net.upstream_of(30), &[40, 50]);
    assert!(net.upstream_of(20).is_empty());
    for link in [20, 30] {
        assert_eq!(net.downstream_of(link), Some(10));
    }
    for link in [40, 50] {
        assert_eq!(net.downstream_of(link), Some(30));
    }
    assert_eq!(net.downstream_of(10), None);
    assert_eq!(net.outlets(), vec![10]);
    for link in net.links() {
        for up in &link.upstream {
            assert!(net.contains(*up));
            assert_eq!(net.downstream_of(*up), Some(link.id));
        }
    }
    assert_eq!(net.basin_of(30).unwrap(), vec![30, 40, 50]);
}

#[test]
fn test_file_pipeline_with_rain() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("chain.rvr"), RVR).unwrap();
    fs::write(dir.path().join("chain.prm"), PRM).unwrap();
    // Rain column grows 1e-6 m per frame over 1 km²: 1 m³ per frame per link.
    for (i, t) in [600, 1200, 1800].into_iter().enumerate() {
        let rain = i as f64 * 1.0e-6;
        let rows = [row(1, 1.0, rain), row(2, 1.0, rain), row(3, 1.0, rain)];
        write_frame(&dir.path().join(format!("basin_{t}.bin")), &rows).unwrap();
    }

    let mut config = base_config(dir.path());
    config.volume_per_particle = 0.5;
    let summary = run_tracking(&config).unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.records, 3);
    assert!(summary.missing_outlet_timestamps.is_empty());
    // 2 then 4 rain particles expected per link.
    assert_eq!(summary.rain_injected, 12);
    assert_eq!(summary.particles_created, 24 + 12);
    assert_eq!(summary.final_census.total(), 36);
    assert_eq!(summary.final_census.rain, 12);

    let series = ContributionSeries::read_from(&config.output_path).unwrap();
    assert_eq!(series.timestamps(), vec![600, 1200, 1800]);
    let last = series.get(1800).unwrap();
    assert_eq!(last.outlet, 1);
    assert_eq!(last.discharge, 1.0);
}

#[test]
fn test_parallel_runs_repeat() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("chain.rvr"), RVR).unwrap();
    fs::write(dir.path().join("chain.prm"), PRM).unwrap();
    for t in [600, 1200] {
        write_frame(&dir.path().join(format!("basin_{t}.bin")), &[row(1, 1.0, 0.0), row(2, 1.0, 0.0), row(3, 1.0, 0.0)])
            .unwrap();
    }

    let mut config = base_config(dir.path());
    config.parallel = true;
    config.seeding = SeedingPolicy::Uniform { per_layer: 50 };

    config.output_path = dir.path().join("a.bin");
    run_tracking(&config).unwrap();
    config.output_path = dir.path().join("b.bin");
    run_tracking(&config).unwrap();

    let a = ContributionSeries::read_from(&dir.path().join("a.bin")).unwrap();
    let b = ContributionSeries::read_from(&dir.path().join("b.bin")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_frame_limit_and_missing_outlet() {
    let net = network();
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    // No particles: the outlet may drop out of a frame without stranding any.
    config.seeding = SeedingPolicy::Uniform { per_layer: 0 };
    config.max_frames = Some(2);

    let frames = vec![
        SnapshotFrame { timestamp: 600, rows: vec![row(1, 1.0, 0.0), row(2, 1.0, 0.0), row(3, 1.0, 0.0)] },
        SnapshotFrame { timestamp: 1200, rows: vec![row(2, 1.0, 0.0), row(3, 1.0, 0.0)] },
        SnapshotFrame { timestamp: 1800, rows: vec![row(1, 1.0, 0.0)] },
    ];
    let output = track(&net, &config, &mut MemorySource::new(frames)).unwrap();

    assert_eq!(output.summary.frames, 2);
    assert_eq!(output.summary.missing_outlet_timestamps, vec![1200]);
    assert_eq!(output.series.timestamps(), vec![600]);
    assert_eq!(output.series.get(600).unwrap().total(), 0);
}

#[test]
fn test_zero_discharge_under_channel_particles_fails() {
    let net = network();
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    let frames = vec![SnapshotFrame {
        timestamp: 600,
        rows: vec![row(1, 1.0, 0.0), row(2, 1.0, 0.0), row(3, 0.0, 0.0)],
    }];

    let err = track(&net, &config, &mut MemorySource::new(frames)).unwrap_err();
    assert!(matches!(
        err,
        Error::DegenerateHydraulicState { link: 3, layer: Layer::Channel, timestamp: 600, .. }
    ));
}

#[test]
fn test_missing_topology_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_tracking(&base_config(dir.path())).unwrap_err();
    assert!(matches!(err, Error::MissingInputFile { .. }));
}

#[test]
fn test_json_config_drives_a_run() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("chain.rvr"), RVR).unwrap();
    fs::write(dir.path().join("chain.prm"), PRM).unwrap();
    write_frame(&dir.path().join("basin_600.bin"), &[row(1, 1.0, 0.0), row(2, 1.0, 0.0), row(3, 1.0, 0.0)]).unwrap();

    let json = serde_json::json!({
        "asynch_parttrack_conf": {
            "watershed": {
                "outlet_link_id": 1,
                "rvr_file_path": dir.path().join("chain.rvr"),
                "prm_file_path": dir.path().join("chain.prm"),
                "hdf5_file_path": dir.path().join("basin_600.bin"),
                "particle_track_file_path": dir.path().join("out.bin"),
            },
            "particles": { "max_parts": 100 },
            "simulation": { "seed": 3 }
        }
    });
    let path = dir.path().join("run.json");
    fs::write(&path, json.to_string()).unwrap();

    let config = TrackingConfig::from_json_file(&path).unwrap();
    assert_eq!(config.seeding, SeedingPolicy::Proportional { max_particles: 100 });
    let summary = run_tracking(&config).unwrap();
    assert_eq!(summary.records, 1);
    // Identical links and discharges: roughly 100 channel particles each.
    assert!((297..=300).contains(&summary.particles_created));
}
