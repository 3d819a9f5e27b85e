use super::*;
use crate::cell::{CellBirth, division_time};
use crate::propensity::{PropensityTree, combinations, total_propensity};
use crate::ssa::{ExactStepper, advance_exact, fire_one, waiting_time};
use crate::tau_leap::{TauLeapStepper, leap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_test::traced_test;

fn birth_death_network(birth: f64, decay: f64, initial: u64) -> ReactionNetwork {
    NetworkSpec::new()
        .species("A", initial)
        .reaction(ReactionSpec::new("birth", birth).product("A", 1))
        .reaction(ReactionSpec::new("decay", decay).reactant("A", 1))
        .build()
        .unwrap()
}

fn decay_only_network(initial: u64) -> ReactionNetwork {
    NetworkSpec::new()
        .species("A", initial)
        .reaction(ReactionSpec::new("decay", 1.0).reactant("A", 1))
        .build()
        .unwrap()
}

fn dimerization_network() -> ReactionNetwork {
    NetworkSpec::new()
        .species("A", 10)
        .species("B", 0)
        .reaction(ReactionSpec::from_equation("dimerize", 0.5, "2 A -> B").unwrap())
        .reaction(ReactionSpec::from_equation("split", 1.0, "B -> 2A").unwrap())
        .reaction(ReactionSpec::from_equation("influx", 2.0, "null -> A").unwrap())
        .build()
        .unwrap()
}

fn growth_config(end_time: f64, seed: u64) -> RunConfig {
    RunConfig {
        end_time,
        sample_step: 0.05,
        seed: Some(seed),
        ..RunConfig::default()
    }
}

fn test_cell(network: &ReactionNetwork, birth_time: f64, birth_volume: f64, growth: f64, threshold: f64) -> Cell {
    Cell::new(
        CellBirth {
            id: 0,
            parent: None,
            generation: 0,
            birth_time,
            birth_volume,
            growth_rate: growth,
            division_volume: threshold,
            chem: ChemicalState::initial(network).unwrap(),
            seed: 1,
            frozen: false,
            record_events: false,
        },
        &[],
    )
}

// Network model

#[test]
fn network_exposes_stoichiometry_and_rates() {
    let network = dimerization_network();
    assert_eq!(network.n_species(), 2);
    assert_eq!(network.n_reactions(), 3);
    assert_eq!(network.stoichiometry(0), vec![-2, 1]);
    assert_eq!(network.stoichiometry(1), vec![2, -1]);
    assert_eq!(network.stoichiometry(2), vec![1, 0]);
    assert_eq!(network.rate_constant(1), 1.0);
    assert_eq!(network.initial_state(), &[10, 0]);
    assert_eq!(network.species_index("B"), Some(1));
    assert_eq!(network.reaction_index("influx"), Some(2));
}

#[test]
fn undeclared_species_is_rejected() {
    let err = NetworkSpec::new()
        .species("A", 0)
        .reaction(ReactionSpec::new("convert", 1.0).reactant("A", 1).product("C", 1))
        .build()
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidNetwork(msg) if msg.contains("undeclared species 'C'")));
}

#[test]
fn malformed_declarations_are_rejected() {
    let duplicate_species = NetworkSpec::new()
        .species("A", 0)
        .species("A", 1)
        .reaction(ReactionSpec::new("birth", 1.0).product("A", 1))
        .build();
    assert!(matches!(duplicate_species, Err(SimError::InvalidNetwork(_))));

    let reserved = NetworkSpec::new()
        .species(NULL_SPECIES, 0)
        .reaction(ReactionSpec::new("noop", 1.0))
        .build();
    assert!(matches!(reserved, Err(SimError::InvalidNetwork(msg)) if msg.contains("reserved")));

    let zero_coefficient = NetworkSpec::new()
        .species("A", 0)
        .reaction(ReactionSpec::new("birth", 1.0).product("A", 0))
        .build();
    assert!(matches!(zero_coefficient, Err(SimError::InvalidNetwork(_))));

    let negative_rate = NetworkSpec::new()
        .species("A", 0)
        .reaction(ReactionSpec::new("birth", -1.0).product("A", 1))
        .build();
    assert!(matches!(negative_rate, Err(SimError::InvalidNetwork(msg)) if msg.contains("rate constant")));

    let duplicate_reaction = NetworkSpec::new()
        .species("A", 0)
        .reaction(ReactionSpec::new("birth", 1.0).product("A", 1))
        .reaction(ReactionSpec::new("birth", 2.0).product("A", 1))
        .build();
    assert!(matches!(duplicate_reaction, Err(SimError::InvalidNetwork(_))));

    let no_species = NetworkSpec::new().reaction(ReactionSpec::new("noop", 1.0)).build();
    assert!(matches!(no_species, Err(SimError::InvalidNetwork(_))));
}

#[test]
fn growth_only_network_is_frozen_from_the_start() {
    let network = NetworkSpec::new().species("A", 7).build().unwrap();
    assert_eq!(network.n_reactions(), 0);
    let result = simulate(&network, &growth_config(2.5, 4)).unwrap();
    assert_eq!(result.summary.divisions, 3);
    assert_eq!(result.summary.issues.len(), 1);
    assert_eq!(result.summary.issues[0].error, SimError::Degenerate);
    for record in &result.output.divisions {
        assert!(record.conserves_content());
    }
    let tau = RunConfig {
        stepper: StepperConfig::tau_leap(0.1),
        ..growth_config(1.5, 4)
    };
    assert!(simulate(&network, &tau).is_ok());
}

#[test]
fn equations_parse_into_terms() {
    let reaction = ReactionSpec::from_equation("r", 1.0, "2 A + B -> C").unwrap();
    assert_eq!(
        reaction.reactants,
        vec![
            Term { species: "A".into(), coefficient: 2 },
            Term { species: "B".into(), coefficient: 1 },
        ]
    );
    assert_eq!(reaction.products, vec![Term { species: "C".into(), coefficient: 1 }]);

    let source = ReactionSpec::from_equation("s", 1.0, "null -> 3A").unwrap();
    assert_eq!(source.reactants, vec![Term { species: NULL_SPECIES.into(), coefficient: 1 }]);
    assert_eq!(source.products, vec![Term { species: "A".into(), coefficient: 3 }]);

    let sink = ReactionSpec::from_equation("k", 1.0, "A -> 0").unwrap();
    assert!(sink.products.is_empty());
    let bare_sink = ReactionSpec::from_equation("k", 1.0, "A ->").unwrap();
    assert!(bare_sink.products.is_empty());

    assert!(matches!(
        ReactionSpec::from_equation("bad", 1.0, "A = B"),
        Err(SimError::InvalidNetwork(msg)) if msg.contains("->")
    ));
    assert!(ReactionSpec::from_equation("bad", 1.0, "A + -> B").is_err());
    assert!(ReactionSpec::from_equation("bad", 1.0, "12 -> B").is_err());
}

#[test]
fn repeated_terms_are_merged() {
    let network = NetworkSpec::new()
        .species("A", 5)
        .species("B", 0)
        .reaction(ReactionSpec::from_equation("pair", 1.0, "A + A -> B").unwrap())
        .build()
        .unwrap();
    assert_eq!(network.stoichiometry(0), vec![-2, 1]);
    let reactants: Vec<_> = network.reactions()[0].reactants().collect();
    assert_eq!(reactants, vec![(0, 2)]);
}

#[test]
fn builder_matches_direct_construction() {
    let built = ReactionNetwork::builder()
        .species("A", 3)
        .reaction(ReactionSpec::new("decay", 1.0).reactant("A", 1))
        .build()
        .unwrap();
    assert_eq!(built.initial_state(), decay_only_network(3).initial_state());
    assert_eq!(built.deltas(0), &[network::SpeciesDelta { species: 0, delta: -1 }]);
    assert_eq!(built.reactions()[0].name(), "decay");
}

#[test]
fn dependency_graph_links_shared_species() {
    let network = birth_death_network(1.0, 1.0, 0);
    assert_eq!(network.dependents(0), &[0, 1]);
    assert_eq!(network.dependents(1), &[1]);
}

// Propensities

#[test]
fn combinations_basics() {
    assert_eq!(combinations(5, 0), 1.0);
    assert_eq!(combinations(5, 1), 5.0);
    assert_eq!(combinations(5, 2), 10.0);
    assert_eq!(combinations(6, 3), 20.0);
    assert_eq!(combinations(3, 4), 0.0);
    assert_eq!(combinations(1, 2), 0.0);
}

#[test]
fn pair_propensity_survives_large_counts() {
    let n: i64 = 4_000_000_000;
    let network = NetworkSpec::new()
        .species("A", n as u64)
        .reaction(ReactionSpec::from_equation("annihilate", 1.0, "2 A -> null").unwrap())
        .build()
        .unwrap();
    let expected = n as f64 * (n - 1) as f64 / 2.0;
    let propensity = network.reactions()[0].propensity(&[n]);
    assert!(propensity > 0.0);
    assert!(((propensity - expected) / expected).abs() < 1e-12);

    let state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let tau = waiting_time(&state, &mut rng).unwrap();
    assert!(tau.is_finite() && tau > 0.0);
}

#[test]
fn leap_projection_rejects_count_overflow() {
    let network = NetworkSpec::new()
        .species("A", 10)
        .reaction(ReactionSpec::from_equation("burst", 1.0, "null -> 1000 A").unwrap())
        .build()
        .unwrap();
    let state = ChemicalState::initial(&network).unwrap();
    assert_eq!(state.project(&network, &[3]).unwrap(), vec![3_010]);
    assert!(matches!(
        state.project(&network, &[u64::MAX / 2]),
        Err(SimError::InvalidArgument(msg)) if msg.contains("overflow")
    ));
    assert!(matches!(
        state.project(&network, &[(i64::MAX / 1000 + 1) as u64]),
        Err(SimError::InvalidArgument(_))
    ));
}

#[test]
fn mass_action_propensities() {
    let network = dimerization_network();
    let reactions = network.reactions();
    let state = [4, 3];
    assert!((reactions[0].propensity(&state) - 0.5 * 6.0).abs() < 1e-12);
    assert!((reactions[1].propensity(&state) - 3.0).abs() < 1e-12);
    // Zero-order source ignores the state entirely.
    assert_eq!(reactions[2].propensity(&[0, 0]), 2.0);
    assert_eq!(reactions[0].propensity(&[1, 0]), 0.0);
    assert!((total_propensity(&network, &state) - 8.0).abs() < 1e-12);
}

#[test]
fn propensity_tree_selects_half_open_intervals() {
    let props = vec![1.0, 3.0, 6.0];
    let mut tree = PropensityTree::new(props.len());
    tree.rebuild(&props);
    assert_eq!(tree.total(), 10.0);
    assert_eq!(tree.select(0.0), 0);
    assert_eq!(tree.select(0.99), 0);
    assert_eq!(tree.select(1.0), 1);
    assert_eq!(tree.select(3.99), 1);
    assert_eq!(tree.select(4.0), 2);
    assert_eq!(tree.select(9.5), 2);
}

#[test]
fn propensity_tree_skips_zero_entries() {
    let props = vec![0.0, 2.0, 0.0, 5.0];
    let mut tree = PropensityTree::new(props.len());
    tree.rebuild(&props);
    assert_eq!(tree.select(0.0), 1);
    assert_eq!(tree.select(1.9), 1);
    assert_eq!(tree.select(2.0), 3);
    assert_eq!(tree.select(6.9), 3);
    assert_eq!(tree.select(7.0), 3);

    let trailing = vec![4.0, 0.0, 0.0];
    let mut tree = PropensityTree::new(trailing.len());
    tree.rebuild(&trailing);
    assert_eq!(tree.select(4.0), 0);
}

#[test]
fn propensity_tree_updates_after_modifications() {
    let props = vec![2.0, 3.0];
    let mut tree = PropensityTree::new(props.len());
    tree.rebuild(&props);
    assert_eq!(tree.total(), 5.0);
    tree.update(1, 1.0);
    assert!((tree.total() - 3.0).abs() < 1e-12);
    assert_eq!(tree.select(0.5), 0);
    assert_eq!(tree.select(2.1), 1);
}

// Chemical state

#[test]
fn firing_keeps_propensities_consistent() {
    let network = dimerization_network();
    let mut state = ChemicalState::initial(&network).unwrap();
    state.fire(&network, 0);
    assert_eq!(state.counts(), &[8, 1]);
    let fresh = ChemicalState::new(&network, vec![8, 1]).unwrap();
    assert_eq!(state.propensities(), fresh.propensities());
    assert!((state.total_propensity() - (0.5 * 28.0 + 1.0 + 2.0)).abs() < 1e-12);
}

#[test]
fn chemical_state_validates_counts() {
    let network = dimerization_network();
    assert!(matches!(
        ChemicalState::new(&network, vec![1]),
        Err(SimError::InvalidArgument(msg)) if msg.contains("does not match")
    ));
    assert!(matches!(
        ChemicalState::new(&network, vec![1, -1]),
        Err(SimError::InvalidArgument(msg)) if msg.contains("negative")
    ));
}

// Exact stepper

#[test]
fn zero_propensity_is_degenerate() {
    let network = decay_only_network(0);
    let state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    assert_eq!(waiting_time(&state, &mut rng), Err(SimError::Degenerate));
    let stepper = ExactStepper;
    assert_eq!(stepper.propose(&state, 0.0, &mut rng), Err(SimError::Degenerate));
}

#[test]
fn exact_stepper_is_reproducible() {
    let network = birth_death_network(10.0, 0.1, 0);
    let run = |seed| {
        let mut state = ChemicalState::initial(&network).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let fired = advance_exact(&network, &mut state, 0.0, 50.0, &mut rng).unwrap();
        (fired, state.counts().to_vec())
    };
    assert_eq!(run(42), run(42));
    assert_ne!(run(42), run(43));
}

#[test]
fn selection_follows_propensity_weights() {
    let network = NetworkSpec::new()
        .species("A", 0)
        .species("B", 0)
        .reaction(ReactionSpec::from_equation("make_a", 1.0, "null -> A").unwrap())
        .reaction(ReactionSpec::from_equation("make_b", 3.0, "null -> B").unwrap())
        .build()
        .unwrap();
    let mut state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..20_000 {
        fire_one(&network, &mut state, &mut rng);
    }
    let a = state.counts()[0];
    assert_eq!(a + state.counts()[1], 20_000);
    assert!((4_500..5_500).contains(&a), "make_a fired {a} times");
}

#[test]
fn exact_ensemble_mean_converges() {
    let network = birth_death_network(10.0, 0.1, 0);
    let n_runs = 200;
    let total: i64 = (0..n_runs)
        .map(|run| {
            let mut state = ChemicalState::initial(&network).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(Some(11), run));
            advance_exact(&network, &mut state, 0.0, 100.0, &mut rng).unwrap();
            state.counts()[0]
        })
        .sum();
    let mean = total as f64 / n_runs as f64;
    assert!((mean - 100.0).abs() < 5.0, "ensemble mean {mean:.1}");
}

#[test]
fn exact_advance_never_goes_negative() {
    let network = decay_only_network(50);
    let mut state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let fired = advance_exact(&network, &mut state, 0.0, 1_000.0, &mut rng).unwrap();
    assert_eq!(fired, 50);
    assert_eq!(state.counts(), &[0]);
}

// Tau-leaping

#[test]
fn tau_leap_requires_positive_interval() {
    assert!(TauLeapStepper::new(0.0, 4).is_err());
    assert!(TauLeapStepper::new(f64::NAN, 4).is_err());
    assert!(TauLeapStepper::new(0.1, 4).is_ok());
}

#[test]
fn overshooting_leap_is_rejected_without_side_effects() {
    let network = decay_only_network(5);
    let mut state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let err = leap(&network, &mut state, 10.0, &mut rng).unwrap_err();
    assert!(matches!(err, SimError::NegativePopulation { species: 0, count, tau } if count < 0 && tau == 10.0));
    assert_eq!(state.counts(), &[5]);
    assert!((state.total_propensity() - 5.0).abs() < 1e-12);
}

#[test]
fn exhausted_halvings_fall_back_to_exact() {
    let network = decay_only_network(5);
    let stepper = TauLeapStepper::new(10.0, 0).unwrap();
    let mut state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let report = stepper.fire(&network, &mut state, 0.0, 10.0, &mut rng).unwrap();
    assert!(report.exact_fallback);
    assert!(report.rejected_leaps >= 1);
    assert!(matches!(report.last_rejection, Some(SimError::NegativePopulation { .. })));
    assert!(state.counts()[0] >= 0);
}

#[test]
fn halving_recovers_from_overshoot() {
    let network = decay_only_network(40);
    let stepper = TauLeapStepper::new(4.0, 12).unwrap();
    let mut state = ChemicalState::initial(&network).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let report = stepper.fire(&network, &mut state, 0.0, 4.0, &mut rng).unwrap();
    assert!(report.rejected_leaps >= 1);
    assert!(state.counts()[0] >= 0);
    assert!(state.counts()[0] < 40);
}

#[test]
fn tau_leap_mean_matches_exact() {
    let network = birth_death_network(10.0, 0.1, 0);
    let stepper = TauLeapStepper::new(0.1, 8).unwrap();
    let n_runs = 100;
    let total: i64 = (0..n_runs)
        .map(|run| {
            let mut state = ChemicalState::initial(&network).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(Some(5), run));
            stepper.fire(&network, &mut state, 0.0, 100.0, &mut rng).unwrap();
            state.counts()[0]
        })
        .sum();
    let mean = total as f64 / n_runs as f64;
    assert!((mean - 100.0).abs() < 6.0, "tau-leap mean {mean:.1}");
}

#[test]
fn tau_leap_proposes_fixed_increments() {
    let network = birth_death_network(1.0, 1.0, 0);
    let state = ChemicalState::initial(&network).unwrap();
    let stepper = TauLeapStepper::new(0.25, 4).unwrap();
    assert_eq!(stepper.tau(), 0.25);
    assert_eq!(stepper.name(), "tau-leap");
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    assert_eq!(stepper.propose(&state, 1.0, &mut rng), Ok(1.25));
    let frozen = ChemicalState::initial(&decay_only_network(0)).unwrap();
    assert_eq!(stepper.propose(&frozen, 1.0, &mut rng), Err(SimError::Degenerate));
}

// Division policy

#[test]
fn partition_conserves_molecules_and_volume() {
    let policy = DivisionPolicy::new(&DivisionConfig {
        noise: 0.3,
        volume_split: VolumeSplit::Proportional,
        ..DivisionConfig::default()
    })
    .unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let parent = [0, 1, 17, 1000];
    for _ in 0..500 {
        let partition = policy.partition(&parent, 2.0, &mut rng).unwrap();
        for (s, &n) in parent.iter().enumerate() {
            assert_eq!(partition.counts[0][s] + partition.counts[1][s], n);
            assert!(partition.counts[0][s] >= 0 && partition.counts[1][s] >= 0);
        }
        assert!((partition.volumes[0] + partition.volumes[1] - 2.0).abs() < 1e-12);
        assert!(partition.volumes.iter().all(|&v| v > 0.0));
        assert!((division::MIN_SHARE..=1.0 - division::MIN_SHARE).contains(&partition.probability));
    }
}

#[test]
fn zero_noise_partition_is_unbiased_binomial() {
    let policy = DivisionPolicy::new(&DivisionConfig::default()).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(23);
    let n_draws = 4_000;
    let shares: Vec<f64> = (0..n_draws)
        .map(|_| {
            let partition = policy.partition(&[1000], 2.0, &mut rng).unwrap();
            assert_eq!(partition.probability, 0.5);
            assert_eq!(partition.volumes, [1.0, 1.0]);
            partition.counts[0][0] as f64
        })
        .collect();
    let mean = shares.iter().sum::<f64>() / n_draws as f64;
    let variance = shares.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n_draws as f64;
    assert!((mean - 500.0).abs() < 2.0, "mean share {mean:.2}");
    assert!((225.0..275.0).contains(&variance), "share variance {variance:.1}");
}

#[test]
fn thresholds_are_fixed_or_floored_at_birth_volume() {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let fixed = DivisionPolicy::new(&DivisionConfig::default()).unwrap();
    assert_eq!(fixed.noise(), 0.0);
    assert_eq!(fixed.split_probability(&mut rng), Ok(0.5));
    assert_eq!(fixed.draw_threshold(1.0, &mut rng), 2.0);
    let noisy = DivisionPolicy::new(&DivisionConfig {
        volume_cv: 5.0,
        ..DivisionConfig::default()
    })
    .unwrap();
    for _ in 0..1_000 {
        assert!(noisy.draw_threshold(1.0, &mut rng) >= 1.0);
    }
    assert!(DivisionPolicy::new(&DivisionConfig {
        noise: -0.1,
        ..DivisionConfig::default()
    })
    .is_err());
}

// Cell

#[test]
fn division_time_is_the_volume_root() {
    let network = birth_death_network(1.0, 1.0, 0);
    let cell = test_cell(&network, 1.5, 0.8, 0.3, 2.1);
    let t = cell.division_time();
    assert!(t > 1.5);
    assert!((cell.volume_at(t) - 2.1).abs() < 1e-9);
    assert!(cell.volume_at(t - 1e-3) < 2.1);

    assert_eq!(division_time(0.0, 1.0, 2.0, 0.0), f64::INFINITY);
    assert_eq!(division_time(3.0, 2.5, 2.0, 1.0), 3.0);
    assert!((division_time(0.0, 1.0, 2.0, std::f64::consts::LN_2) - 1.0).abs() < 1e-12);
}

#[test]
fn cells_record_samples_before_each_event() {
    let network = birth_death_network(1.0, 1.0, 3);
    let mut cell = test_cell(&network, 0.0, 1.0, 0.0, 2.0);
    let grid = [0.0, 0.5, 1.0, 1.5];
    cell.record_until(&grid, 1.0, false);
    assert_eq!(cell.segment.volumes, vec![1.0, 1.0]);
    cell.chem.fire(&network, 0);
    cell.record_until(&grid, 1.5, true);
    assert_eq!(cell.segment.counts, vec![3, 3, 4, 4]);
}

// Population

#[test]
fn population_runs_are_deterministic() {
    let network = birth_death_network(50.0, 1.0, 20);
    let config = growth_config(3.0, 99);
    let first = simulate(&network, &config).unwrap();
    let second = simulate(&network, &config).unwrap();
    assert_eq!(first, second);
    let other = simulate(&network, &growth_config(3.0, 100)).unwrap();
    assert_ne!(first.output, other.output);
}

#[test]
fn shared_stream_runs_are_deterministic() {
    let network = birth_death_network(50.0, 1.0, 20);
    let config = RunConfig {
        rng: RngMode::Shared,
        ..growth_config(3.0, 99)
    };
    assert_eq!(simulate(&network, &config).unwrap(), simulate(&network, &config).unwrap());
}

#[test]
fn global_clock_is_monotonic() {
    let network = birth_death_network(50.0, 1.0, 20);
    let mut sim = PopulationSimulator::new(&network, growth_config(3.5, 4)).unwrap();
    let mut last = 0.0;
    let mut divisions = 0;
    while let Some(event) = sim.step().unwrap() {
        assert!(event.time >= last, "time went backwards: {} -> {}", last, event.time);
        assert!(event.time <= 3.5);
        last = event.time;
        if event.kind == EventKind::Division {
            divisions += 1;
        }
    }
    assert!(sim.is_completed());
    assert_eq!(divisions, sim.divisions().len());
    assert_eq!(sim.cells().len(), 1 + 2 * divisions);
    assert_eq!(sim.active_count(), 1 + divisions);
    assert!(sim.step().unwrap().is_none());
}

#[test]
fn divisions_conserve_content_and_lineage_is_contiguous() {
    let network = birth_death_network(50.0, 1.0, 20);
    let config = RunConfig {
        division: DivisionConfig {
            noise: 0.2,
            volume_cv: 0.1,
            volume_split: VolumeSplit::Proportional,
            ..DivisionConfig::default()
        },
        ..growth_config(4.0, 8)
    };
    let result = simulate(&network, &config).unwrap();
    let output = &result.output;
    assert!(!output.divisions.is_empty());
    for record in &output.divisions {
        assert!(record.conserves_content());
        let parent = &output.cells[record.parent];
        assert_eq!(parent.division_time, Some(record.time));
        for &daughter in &record.daughters {
            let series = &output.cells[daughter];
            assert_eq!(series.parent, Some(record.parent));
            assert_eq!(series.generation, parent.generation + 1);
            assert_eq!(series.birth_time, record.time);
            assert_eq!(series.first_sample, parent.samples().end);
        }
        assert!((record.daughter_volumes[0] + record.daughter_volumes[1] - record.parent_volume).abs() < 1e-12);
    }
    for series in &output.cells {
        for sample in series.samples() {
            let t = output.sample_times[sample];
            assert!(t >= series.birth_time);
            if let Some(end) = series.division_time {
                assert!(t < end);
            }
        }
    }
}

#[test]
fn population_size_never_shrinks() {
    let network = birth_death_network(50.0, 1.0, 20);
    let result = simulate(&network, &growth_config(4.0, 12)).unwrap();
    let output = &result.output;
    let sizes: Vec<usize> = (0..output.n_samples()).map(|s| output.population_size(s)).collect();
    assert_eq!(sizes[0], 1);
    assert!(sizes.windows(2).all(|w| w[1] >= w[0]));
    assert!(*sizes.last().unwrap() >= 8);
}

#[test]
fn recorded_counts_are_never_negative() {
    let network = dimerization_network();
    for stepper in [StepperConfig::Exact, StepperConfig::tau_leap(0.05)] {
        let config = RunConfig {
            stepper,
            ..growth_config(3.0, 31)
        };
        let result = simulate(&network, &config).unwrap();
        for series in &result.output.cells {
            assert!(series.counts.iter().all(|&c| c >= 0));
        }
    }
}

#[test]
fn sampled_volumes_follow_exponential_growth() {
    let network = birth_death_network(5.0, 1.0, 0);
    let mut sim = PopulationSimulator::new(&network, growth_config(3.0, 2)).unwrap();
    sim.run().unwrap();
    let output = sim.output();
    let g = sim.config().growth_rate;
    for (cell, series) in sim.cells().iter().zip(&output.cells) {
        for sample in series.samples() {
            let t = output.sample_times[sample];
            let expected = cell.birth_volume() * (g * (t - cell.birth_time())).exp();
            let volume = series.volume(sample).unwrap();
            assert!((volume - expected).abs() < 1e-12);
            assert!(volume <= cell.division_volume() + 1e-9);
        }
    }
}

#[test]
fn no_growth_means_a_single_cell() {
    let network = birth_death_network(5.0, 1.0, 0);
    let config = RunConfig {
        growth_rate: 0.0,
        ..growth_config(2.0, 2)
    };
    let result = simulate(&network, &config).unwrap();
    assert_eq!(result.output.n_cells(), 1);
    assert_eq!(result.output.cells[0].len(), result.output.n_samples());
    assert!(result.output.divisions.is_empty());
}

#[traced_test]
#[test]
fn degenerate_cells_keep_growing_and_dividing() {
    let network = decay_only_network(0);
    let result = simulate(&network, &growth_config(3.5, 1)).unwrap();
    assert_eq!(result.summary.divisions, 7);
    assert_eq!(result.output.n_cells(), 15);
    assert_eq!(result.summary.issues.len(), 1);
    let issue = &result.summary.issues[0];
    assert_eq!(issue.cell, 0);
    assert_eq!(issue.error, SimError::Degenerate);
    assert!(result.output.cells.iter().all(|c| c.counts.iter().all(|&n| n == 0)));
    assert!(logs_contain("cell issue"));
    assert!(logs_contain("division_noise=0"));
}

#[test]
fn overshooting_leaps_are_reported() {
    let network = decay_only_network(5);
    let config = RunConfig {
        stepper: StepperConfig::TauLeap {
            tau: 5.0,
            max_halvings: 1,
        },
        growth_rate: 0.0,
        ..growth_config(10.0, 3)
    };
    let result = simulate(&network, &config).unwrap();
    let issue = result
        .summary
        .issues
        .iter()
        .find(|i| matches!(i.error, SimError::NegativePopulation { .. }))
        .expect("rejected leap should be reported");
    assert_eq!(issue.cell, 0);
    assert!(issue.occurrences >= 1);
    assert!(result.summary.issues.iter().all(|i| i.error.is_cell_local()));
    assert!(result.output.cells[0].counts.iter().all(|&c| c >= 0));
}

#[test]
fn abort_keeps_sealed_records_and_resumes_identically() {
    let network = birth_death_network(50.0, 1.0, 20);
    let config = growth_config(3.0, 77);
    let reference = simulate(&network, &config).unwrap();

    let mut sim = PopulationSimulator::new(&network, config).unwrap();
    let handle = sim.abort_handle();
    for _ in 0..200 {
        sim.step().unwrap();
    }
    handle.abort();
    let err = sim.run().unwrap_err();
    assert!(matches!(err, SimError::AbortRequested { reason: AbortReason::Signal, .. }));
    assert_eq!(sim.aborted(), Some(AbortReason::Signal));
    let partial = sim.output();
    for series in &partial.cells {
        assert!(series.volumes.iter().all(|v| v.is_finite() && *v > 0.0));
        for sample in series.samples() {
            assert!(partial.sample_times[sample] < sim.clock());
        }
    }

    handle.reset();
    let summary = sim.run().unwrap();
    assert!(summary.completed);
    assert_eq!(sim.output(), reference.output);
}

#[test]
fn budgets_abort_the_run() {
    let network = birth_death_network(50.0, 1.0, 20);
    let config = RunConfig {
        budget: RunBudget {
            max_events: Some(10),
            max_cells: None,
        },
        ..growth_config(3.0, 5)
    };
    let mut sim = PopulationSimulator::new(&network, config).unwrap();
    let err = sim.run().unwrap_err();
    assert!(matches!(err, SimError::AbortRequested { reason: AbortReason::EventBudget, .. }));
    assert_eq!(sim.summary().events, 10);

    let config = RunConfig {
        budget: RunBudget {
            max_events: None,
            max_cells: Some(3),
        },
        ..growth_config(3.0, 5)
    };
    let mut sim = PopulationSimulator::new(&network, config).unwrap();
    let err = sim.run().unwrap_err();
    assert!(matches!(err, SimError::AbortRequested { reason: AbortReason::CellBudget, .. }));
    assert_eq!(sim.cells().len(), 3);
}

#[test]
fn event_histories_match_sampled_output() {
    let network = birth_death_network(20.0, 1.0, 10);
    let config = RunConfig {
        record_events: true,
        ..growth_config(2.5, 14)
    };
    let mut sim = PopulationSimulator::new(&network, config).unwrap();
    sim.run().unwrap();
    let output = sim.output();
    for series in &output.cells {
        let history = sim.history(series.id).unwrap();
        assert!(history.times.windows(2).all(|w| w[1] >= w[0]));
        if let Some(end) = series.division_time {
            assert_eq!(history.times.last().copied(), Some(end));
        }
        assert_eq!(history.states_iter().count(), history.n_points());
        for sample in series.samples() {
            let t = output.sample_times[sample];
            let idx = history.times.partition_point(|&h| h <= t) - 1;
            assert_eq!(series.counts_at(sample).unwrap(), history.state_at(idx));
        }
    }
    for record in sim.divisions() {
        for (slot, &daughter) in record.daughters.iter().enumerate() {
            let history = sim.history(daughter).unwrap();
            assert_eq!(history.state_at(0), record.daughter_counts[slot].as_slice());
        }
    }
}

#[test]
fn invalid_configurations_are_rejected() {
    let network = birth_death_network(1.0, 1.0, 0);
    let cases = [
        RunConfig {
            end_time: 0.0,
            ..RunConfig::default()
        },
        RunConfig {
            sample_times: Some(vec![0.0, 2.0, 1.0]),
            ..RunConfig::default()
        },
        RunConfig {
            sample_times: Some(vec![0.0, 20.0]),
            ..RunConfig::default()
        },
        RunConfig {
            stepper: StepperConfig::tau_leap(0.0),
            ..RunConfig::default()
        },
        RunConfig {
            growth_rate: -1.0,
            ..RunConfig::default()
        },
        RunConfig {
            budget: RunBudget {
                max_events: None,
                max_cells: Some(0),
            },
            ..RunConfig::default()
        },
    ];
    for config in cases {
        assert!(matches!(
            PopulationSimulator::new(&network, config),
            Err(SimError::InvalidArgument(_))
        ));
    }
}

#[test]
fn sample_grid_covers_end_time() {
    let config = RunConfig {
        end_time: 1.0,
        sample_step: 0.25,
        ..RunConfig::default()
    };
    assert_eq!(config.sample_grid().unwrap(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    let explicit = RunConfig {
        sample_times: Some(vec![0.5, 0.7]),
        ..config
    };
    assert_eq!(explicit.sample_grid().unwrap(), vec![0.5, 0.7]);
}

#[test]
fn oversized_sample_grids_are_rejected() {
    let config = RunConfig {
        sample_step: 1e-300,
        ..RunConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(SimError::InvalidArgument(msg)) if msg.contains("sample points")
    ));
    assert!(config.sample_grid().is_err());
    let network = birth_death_network(1.0, 1.0, 0);
    assert!(PopulationSimulator::new(&network, config).is_err());
}

#[test]
fn output_tables_mark_cells_outside_their_lifetime() {
    let network = birth_death_network(20.0, 1.0, 10);
    let result = simulate(&network, &growth_config(2.5, 6)).unwrap();
    let output = &result.output;
    let volumes = output.volume_table();
    let counts = output.count_table(0);
    assert_eq!(volumes.len(), output.n_samples());
    assert_eq!(counts.len(), output.n_samples());

    let record = &output.divisions[0];
    let parent = &output.cells[record.parent];
    let daughter = &output.cells[record.daughters[0]];
    for (sample, &t) in output.sample_times.iter().enumerate() {
        assert_eq!(volumes[sample].len(), output.n_cells());
        let parent_alive = t < record.time;
        assert_eq!(volumes[sample][parent.id].is_some(), parent_alive);
        assert_eq!(counts[sample][parent.id].is_some(), parent_alive);
        let daughter_alive = t >= record.time
            && daughter.division_time.is_none_or(|end| t < end);
        assert_eq!(volumes[sample][daughter.id].is_some(), daughter_alive);
        assert_eq!(counts[sample][daughter.id].is_some(), daughter_alive);
        if daughter_alive {
            assert_eq!(volumes[sample][daughter.id], output.volume(sample, daughter.id));
            assert_eq!(counts[sample][daughter.id], output.count(sample, daughter.id, 0));
        }
    }
}

#[test]
fn ensembles_are_independent_of_thread_count() {
    let network = birth_death_network(20.0, 1.0, 5);
    let config = growth_config(2.0, 3);
    let serial = run_ensemble(&network, &config, 4, Some(1)).unwrap();
    let parallel = run_ensemble(&network, &config, 4, Some(3)).unwrap();
    assert_eq!(serial, parallel);
    assert_ne!(serial[0].output, serial[1].output);
    assert!(matches!(
        run_ensemble(&network, &config, 0, None),
        Err(SimError::InvalidArgument(msg)) if msg.contains("number of runs")
    ));
}
