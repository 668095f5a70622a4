//! Property-based tests for the transition step using proptest
//!
//! Invariants checked across random inventories, hydraulic states and rain:
//! - Particle count conservation (old + injected = new)
//! - Rain counters never decrease; injections never go negative
//! - Seeded steps are reproducible

use basin_trace::network::{LinkAttributes, LinkParameters, Topology};
use basin_trace::{
    DomainSnapshot, HydraulicField, HydraulicState, Layer, LayerSource, Network, ParticleIds,
    PhysicalParams, TransitionEngine,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const LINKS: [u32; 4] = [1, 2, 3, 4];
const VOLUME_PER_PARTICLE: f64 = 2.5;

// 1 <- {2, 3}, 3 <- 4
fn network() -> Network {
    let mut topo = Topology::new(4);
    topo.add_link(1, &[2, 3]).unwrap();
    topo.add_link(2, &[]).unwrap();
    topo.add_link(3, &[4]).unwrap();
    topo.add_link(4, &[]).unwrap();
    let a = LinkAttributes { upstream_area: 1.0, hillslope_area: 0.5, length: 1.0 };
    Network::assemble(topo, LinkParameters { declared_fields: 3, entries: LINKS.map(|l| (l, a)).to_vec() }).unwrap()
}

fn params() -> PhysicalParams {
    PhysicalParams { delta_t: 60, ..PhysicalParams::default() }
}

fn hydraulic_state() -> impl Strategy<Value = HydraulicState> {
    (0.0f64..2.0, 1.0f64..100.0, 0.0f64..0.05, 0.0f64..0.05, 0.0f64..0.05, 0.0f64..0.05).prop_map(
        |(q, volume, pc, pt, ts, sc)| HydraulicState {
            channel_discharge: q,
            channel_volume: volume,
            pond_volume: 1.0,
            pond_to_channel: pc,
            pond_to_top_layer: pt,
            top_layer_volume: 1.0,
            top_layer_to_subsurface: ts,
            subsurface_volume: 1.0,
            subsurface_to_channel: sc,
            accumulated_rain_volume: 0.0,
        },
    )
}

/// Particle counts per (link, layer).
fn inventory_counts() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..12, LINKS.len() * Layer::ALL.len())
}

fn populated(counts: &[usize], ids: &mut ParticleIds) -> DomainSnapshot {
    let mut snap = DomainSnapshot::new(LINKS, 0, Some(1));
    let cells = LINKS.iter().flat_map(|&l| Layer::ALL.map(|layer| (l, layer)));
    for ((link, layer), &n) in cells.zip(counts) {
        let inventory = snap.inventory_mut(link).unwrap();
        inventory
            .layer_mut(layer)
            .extend((0..n).map(|_| ids.issue(link, LayerSource::of_layer(layer))));
    }
    snap
}

fn field(timestamp: i64, state: HydraulicState, rain: &[f64]) -> HydraulicField {
    let states = LINKS
        .iter()
        .zip(rain)
        .map(|(&l, &r)| (l, HydraulicState { accumulated_rain_volume: r, ..state }))
        .collect();
    HydraulicField { timestamp, states }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_particle_count_conserved(
        counts in inventory_counts(),
        state in hydraulic_state(),
        rain in prop::collection::vec(prop::collection::vec(0.0f64..60.0, LINKS.len()), 1..5),
        seed in any::<u64>(),
        parallel in any::<bool>(),
    ) {
        let net = network();
        let params = params();
        let engine = TransitionEngine::new(&net, &params, VOLUME_PER_PARTICLE);
        let mut ids = ParticleIds::new();
        let mut snapshot = populated(&counts, &mut ids);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        for (step, step_rain) in rain.iter().enumerate() {
            let f = field(600 * (step as i64 + 1), state, step_rain);
            let before = snapshot.count_particles();
            let (next, report) = if parallel {
                engine.advance_parallel(&snapshot, &f, &mut ids, seed).unwrap()
            } else {
                engine.advance(&snapshot, &f, &mut ids, &mut rng).unwrap()
            };
            prop_assert_eq!(next.count_particles(), before + report.injected);
            prop_assert_eq!(
                report.moved_downstream + report.moved_within + report.retained + report.exits,
                before
            );
            snapshot = next;
        }
        prop_assert_eq!(snapshot.count_particles(), ids.issued());
    }

    #[test]
    fn test_rain_counters_never_decrease(
        rain in prop::collection::vec(prop::collection::vec(0.0f64..60.0, LINKS.len()), 1..8),
    ) {
        let net = network();
        let params = params();
        let engine = TransitionEngine::new(&net, &params, VOLUME_PER_PARTICLE);
        let still = HydraulicState {
            channel_discharge: 0.0,
            channel_volume: 1.0,
            pond_volume: 1.0,
            pond_to_channel: 0.0,
            pond_to_top_layer: 0.0,
            top_layer_volume: 1.0,
            top_layer_to_subsurface: 0.0,
            subsurface_volume: 1.0,
            subsurface_to_channel: 0.0,
            accumulated_rain_volume: 0.0,
        };
        let mut ids = ParticleIds::new();
        let mut snapshot = DomainSnapshot::new(LINKS, 0, Some(1));
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        for (step, step_rain) in rain.iter().enumerate() {
            let f = field(600 * (step as i64 + 1), still, step_rain);
            let (next, report) = engine.advance(&snapshot, &f, &mut ids, &mut rng).unwrap();
            let mut expected_injected = 0;
            for (&link, &r) in LINKS.iter().zip(step_rain) {
                let before = snapshot.rain_counter(link);
                let after = next.rain_counter(link);
                let expected = (r / VOLUME_PER_PARTICLE).floor() as u64;
                prop_assert!(after >= before);
                prop_assert_eq!(after, before.max(expected));
                expected_injected += after - before;
            }
            prop_assert_eq!(report.injected, expected_injected);
            prop_assert_eq!(next.census().rain, next.count_particles());
            snapshot = next;
        }
    }

    #[test]
    fn test_seeded_step_repeats(
        counts in inventory_counts(),
        state in hydraulic_state(),
        seed in any::<u64>(),
    ) {
        let net = network();
        let params = params();
        let engine = TransitionEngine::new(&net, &params, 0.0);
        let f = field(600, state, &[0.0; 4]);

        let step = || {
            let mut ids = ParticleIds::new();
            let snapshot = populated(&counts, &mut ids);
            engine.advance(&snapshot, &f, &mut ids, &mut ChaCha8Rng::seed_from_u64(seed)).unwrap().0
        };
        prop_assert_eq!(step(), step());
    }
}
