//! End-to-end engine checks exercised through the public API only.

use vivarium_core::{
    apply_control_command, ControlCommand, Genome, SessionConfig, Tick, Vivarium,
};

fn seeded_config(seed: u64) -> SessionConfig {
    SessionConfig {
        world_width: 48,
        world_height: 48,
        population_limit: 200,
        rng_seed: Some(seed),
        ..SessionConfig::default()
    }
}

fn populated_world(seed: u64, count: usize) -> Vivarium {
    let mut world = Vivarium::new(seeded_config(seed)).expect("world construction");
    for _ in 0..count {
        world
            .create_lifeform(None, None)
            .expect("initial population spawn");
    }
    world
}

fn world_fingerprint(world: &Vivarium) -> Vec<(u32, u32, [u8; 3], u32)> {
    let mut cells: Vec<_> = world
        .lifeforms()
        .iter_handles()
        .filter_map(|id| world.lifeform(id))
        .map(|lifeform| {
            let (x, y) = lifeform.position();
            (x, y, lifeform.color(), lifeform.time_to_live_count() as u32)
        })
        .collect();
    cells.sort_unstable();
    cells
}

#[test]
fn identical_seeds_replay_identically() {
    let mut a = populated_world(7, 40);
    let mut b = populated_world(7, 40);
    for _ in 0..200 {
        let ea = a.step();
        let eb = b.step();
        assert_eq!(ea, eb);
    }
    assert_eq!(a.population(), b.population());
    assert_eq!(a.lifetime_created(), b.lifetime_created());
    assert_eq!(world_fingerprint(&a), world_fingerprint(&b));
}

#[test]
fn different_seeds_diverge() {
    let mut a = populated_world(7, 40);
    let mut b = populated_world(8, 40);
    for _ in 0..200 {
        a.step();
        b.step();
    }
    assert_ne!(
        world_fingerprint(&a),
        world_fingerprint(&b),
        "distinct seeds should produce distinct worlds"
    );
}

#[test]
fn occupancy_stays_coherent_over_many_ticks() {
    let mut world = populated_world(11, 80);
    for _ in 0..500 {
        world.step();
        assert_eq!(world.occupancy().len(), world.population());
        for (cell, id) in world.occupancy().iter() {
            let lifeform = world.lifeform(id).expect("occupant must be alive");
            assert_eq!(lifeform.position(), cell);
        }
    }
}

#[test]
fn population_never_exceeds_limit() {
    let mut world = Vivarium::new(SessionConfig {
        population_limit: 30,
        ..seeded_config(3)
    })
    .expect("world construction");
    for _ in 0..30 {
        world.create_lifeform(None, None).expect("spawn");
    }
    assert!(world.create_lifeform(None, None).is_none());
    for _ in 0..300 {
        world.step();
        assert!(world.population() <= 30);
    }
}

#[test]
fn peak_population_tracks_high_water_mark() {
    let mut world = populated_world(5, 60);
    assert_eq!(world.peak_population(), 60);
    let removed = world.thanos_snap();
    assert_eq!(removed, 30);
    assert_eq!(world.population(), 30);
    assert_eq!(world.peak_population(), 60, "peak survives the snap");
}

#[test]
fn snap_deaths_do_not_appear_in_tick_summaries() {
    let mut world = populated_world(5, 60);
    world.thanos_snap();
    world.step();
    let latest = world.history().last().expect("summary");
    assert_eq!(latest.population, world.population());
    // Only deaths that occurred inside the tick are reported.
    assert!(latest.deaths <= 30);
}

#[test]
fn control_commands_drive_a_running_session() {
    let mut world = populated_world(13, 20);
    apply_control_command(&mut world, ControlCommand::SetRadiation(100.0));
    apply_control_command(&mut world, ControlCommand::SetGravity(true));
    assert_eq!(world.config().radiation, 100.0);
    assert!(world.config().gravity_on);
    for _ in 0..50 {
        world.step();
    }
    assert_eq!(world.occupancy().len(), world.population());

    apply_control_command(&mut world, ControlCommand::Reset);
    assert_eq!(world.population(), 0);
    assert_eq!(world.tick(), Tick::zero());
    assert_eq!(world.lifetime_created(), 0);

    apply_control_command(&mut world, ControlCommand::Spawn { position: None });
    assert_eq!(world.population(), 1);
}

#[test]
fn explicit_genomes_breed_true_colors() {
    let mut world = Vivarium::new(seeded_config(1)).expect("world construction");
    let genome = Genome::new([12, 34, 56]);
    let a = world
        .create_lifeform(Some((1, 1)), Some(genome))
        .expect("spawn");
    let b = world
        .create_lifeform(Some((40, 40)), Some(genome))
        .expect("spawn");
    let color_a = world.lifeform(a).expect("a").color();
    let color_b = world.lifeform(b).expect("b").color();
    assert_eq!(color_a, color_b, "identical genomes derive identical colors");
}

#[test]
fn long_run_with_default_config_stays_alive_or_empties_cleanly() {
    let mut world = populated_world(99, 100);
    for _ in 0..1_000 {
        let events = world.step();
        assert_eq!(events.tick, world.tick());
    }
    assert_eq!(world.occupancy().len(), world.population());
    assert!(world.history().count() <= world.config().history_capacity);
}
