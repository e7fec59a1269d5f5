//! Bounded command bus between external controllers and the engine.
//!
//! Senders are async-friendly and cheap to clone; the frame driver drains the
//! receiver at the top of every frame, so commands always land between ticks.

use crossfire::mpmc;
use crossfire::{detect_backoff_cfg, MAsyncTx, MRx, TrySendError};
use std::sync::Arc;
use tracing::{debug, warn};
use vivarium_core::{apply_control_command, ControlCommand, Vivarium};

pub type CommandSender = MAsyncTx<ControlCommand>;
pub type CommandReceiver = MRx<ControlCommand>;
pub type CommandSubmit = Arc<dyn Fn(ControlCommand) -> bool + Send + Sync>;

/// What a frame-boundary drain observed.
///
/// A session reset wipes the world *and* stops the clock; the engine handles
/// the wipe, so the flag here is how the frame driver learns about its half.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Commands applied during this drain.
    pub applied: usize,
    /// Whether a [`ControlCommand::Reset`] came through.
    pub reset_requested: bool,
}

pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity)
}

/// Apply every queued command to the engine, in arrival order.
pub fn drain_pending_commands(receiver: &CommandReceiver, world: &mut Vivarium) -> DrainReport {
    let mut report = DrainReport::default();
    // Empty and Disconnected both end the drain.
    while let Ok(command) = receiver.try_recv() {
        debug!(?command, "applying control command");
        if matches!(command, ControlCommand::Reset) {
            report.reset_requested = true;
        }
        apply_control_command(world, command);
        report.applied += 1;
    }
    report
}

/// Closure controllers use to submit commands without holding bus types.
/// Returns false when the queue is full or the driver is gone; a dropped
/// command is never fatal.
pub fn make_command_submit(sender: CommandSender) -> CommandSubmit {
    let sender = Arc::new(sender);
    Arc::new(move |command: ControlCommand| match sender.try_send(command) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            warn!(?dropped, "command queue at capacity, dropping");
            false
        }
        Err(TrySendError::Disconnected(dropped)) => {
            warn!(?dropped, "command queue closed, dropping");
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vivarium_core::SessionConfig;

    fn test_world() -> Vivarium {
        Vivarium::new(SessionConfig {
            world_width: 16,
            world_height: 16,
            rng_seed: Some(1),
            ..SessionConfig::default()
        })
        .expect("world")
    }

    #[test]
    fn commands_apply_in_arrival_order() {
        let (sender, receiver) = create_command_bus(8);
        let submit = make_command_submit(sender);
        assert!(submit(ControlCommand::SetRadiation(40.0)));
        assert!(submit(ControlCommand::SetRadiation(60.0)));
        assert!(submit(ControlCommand::SetGravity(true)));

        let mut world = test_world();
        let report = drain_pending_commands(&receiver, &mut world);
        assert_eq!(report.applied, 3);
        assert!(!report.reset_requested);
        assert_eq!(world.config().radiation, 60.0);
        assert!(world.config().gravity_on);
    }

    #[test]
    fn reset_is_applied_and_flagged_for_the_driver() {
        let (sender, receiver) = create_command_bus(8);
        let submit = make_command_submit(sender);
        assert!(submit(ControlCommand::Spawn { position: None }));
        assert!(submit(ControlCommand::Reset));

        let mut world = test_world();
        let report = drain_pending_commands(&receiver, &mut world);
        assert_eq!(report.applied, 2);
        assert!(report.reset_requested);
        assert_eq!(world.population(), 0, "the wipe itself still happens here");
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (sender, _receiver) = create_command_bus(1);
        let submit = make_command_submit(sender);
        assert!(submit(ControlCommand::SetGravity(true)));
        assert!(!submit(ControlCommand::SetGravity(false)));
    }

    #[test]
    fn drain_on_empty_bus_is_a_noop() {
        let (_sender, receiver) = create_command_bus(4);
        let mut world = test_world();
        let report = drain_pending_commands(&receiver, &mut world);
        assert_eq!(report, DrainReport::default());
        assert_eq!(world.population(), 0);
    }
}
