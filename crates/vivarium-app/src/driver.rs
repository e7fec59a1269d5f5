//! Frame driver: advances the engine on a fixed cadence in its own thread.
//!
//! The driver owns the tick loop and nothing else. Controllers talk to it
//! through the command bus and the pause flag; observers read the shared
//! world between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::command::{drain_pending_commands, CommandReceiver};
use crate::SharedWorld;

/// Cadence and startup behavior of the frame loop.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Delay between frames.
    pub frame_interval: Duration,
    /// Whether the loop starts ticking immediately or paused.
    pub start_running: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(50),
            start_running: false,
        }
    }
}

/// Handle to the running frame loop.
///
/// Commands drain every frame even while paused, so tuning and spawning
/// remain live when the clock is stopped. A `Reset` command pauses the loop
/// in addition to wiping the world.
pub struct FrameDriver {
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FrameDriver {
    /// Spawn the frame loop thread.
    pub fn spawn(
        world: SharedWorld,
        receiver: CommandReceiver,
        config: DriverConfig,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(config.start_running));
        let stop = Arc::new(AtomicBool::new(false));
        let loop_running = Arc::clone(&running);
        let loop_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("vivarium-frame".into())
            .spawn(move || {
                frame_loop(world, receiver, loop_running, loop_stop, config.frame_interval);
            })
            .context("failed to spawn frame driver thread")?;
        Ok(Self {
            running,
            stop,
            handle,
        })
    }

    /// Resume ticking.
    pub fn start_life(&self) {
        self.running.store(true, Ordering::Release);
        info!("frame driver running");
    }

    /// Pause ticking. State is left untouched and commands keep draining.
    pub fn pause_life(&self) {
        self.running.store(false, Ordering::Release);
        info!("frame driver paused");
    }

    /// Whether the loop is currently advancing ticks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the loop and join the thread.
    pub fn shutdown(self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("frame driver thread panicked"))?;
        info!("frame driver stopped");
        Ok(())
    }
}

fn frame_loop(
    world: SharedWorld,
    receiver: CommandReceiver,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        {
            let mut guard = match world.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let report = drain_pending_commands(&receiver, &mut guard);
            // A reset stops the clock as well as wiping the world; ticking
            // resumes only on an explicit start.
            if report.reset_requested {
                running.store(false, Ordering::Release);
                info!("session reset, frame driver paused");
            }
            if running.load(Ordering::Acquire) {
                let events = guard.step();
                if events.births > 0 || events.deaths > 0 {
                    debug!(
                        tick = events.tick.0,
                        births = events.births,
                        deaths = events.deaths,
                        population = guard.population(),
                        "tick complete",
                    );
                }
            }
        }
        thread::sleep(interval);
    }
}
