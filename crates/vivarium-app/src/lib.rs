//! Application plumbing for vivarium control surfaces.
//!
//! The engine itself is single-threaded; this crate wraps it in a shared
//! handle, a bounded command bus for external controllers, and a frame driver
//! that advances the simulation on a fixed cadence.

use std::sync::{Arc, Mutex};

use vivarium_core::Vivarium;

pub type SharedWorld = Arc<Mutex<Vivarium>>;

pub mod command;
pub mod driver;

pub use command::{
    create_command_bus, drain_pending_commands, make_command_submit, CommandReceiver,
    CommandSender, CommandSubmit, DrainReport,
};
pub use driver::{DriverConfig, FrameDriver};
