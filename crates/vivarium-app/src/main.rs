use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vivarium_app::{create_command_bus, make_command_submit, DriverConfig, FrameDriver, SharedWorld};
use vivarium_core::{ControlCommand, SessionConfig, Vivarium};

fn main() -> Result<()> {
    init_tracing();
    let world = bootstrap_world()?;
    info!("starting vivarium session");

    let (sender, receiver) = create_command_bus(64);
    let submit = make_command_submit(sender);
    let driver = FrameDriver::spawn(
        Arc::clone(&world),
        receiver,
        DriverConfig {
            frame_interval: Duration::from_millis(50),
            start_running: false,
        },
    )?;

    driver.start_life();

    // Scripted demo session: let the colony establish itself, then stress it.
    thread::sleep(Duration::from_secs(5));
    submit(ControlCommand::SetRadiation(40.0));
    submit(ControlCommand::SetGravity(true));
    thread::sleep(Duration::from_secs(5));
    submit(ControlCommand::ThanosSnap);
    thread::sleep(Duration::from_secs(5));

    driver.pause_life();
    report_session(&world);
    driver.shutdown()?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world() -> Result<SharedWorld> {
    let seed = std::env::var("VIVARIUM_SEED")
        .ok()
        .and_then(|value| value.parse::<u64>().ok());
    let config = SessionConfig {
        rng_seed: seed,
        ..SessionConfig::default()
    };
    let mut world = Vivarium::new(config).context("invalid session configuration")?;
    let mut spawned = 0usize;
    for _ in 0..100 {
        if world.create_lifeform(None, None).is_some() {
            spawned += 1;
        }
    }
    info!(spawned, "seeded initial colony");
    Ok(Arc::new(Mutex::new(world)))
}

fn report_session(world: &SharedWorld) {
    let guard = match world.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(summary) = guard.history().last() {
        match serde_json::to_string(summary) {
            Ok(json) => info!(
                population = guard.population(),
                peak = guard.peak_population(),
                created = guard.lifetime_created(),
                latest = %json,
                "session summary",
            ),
            Err(error) => warn!(%error, "failed to encode session summary"),
        }
    } else {
        warn!("session ended without any processed ticks");
    }
}
