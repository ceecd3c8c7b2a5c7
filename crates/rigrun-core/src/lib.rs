//! # rigrun-core
//!
//! Just-in-time execution engine for hardware-in-the-loop tests.
//!
//! This crate provides:
//! - The heartbeat loop that fires scheduled stimulus commands against a rig
//! - Device driver traits and the registry that binds testbed descriptions
//!   to protocol implementations
//! - Signal routing through the wiring graph, with physical↔electrical unit
//!   transforms
//! - Signal logging across the run, assembled into physical-unit traces
//! - Completion tracking for in-flight device operations, with timeouts
//!   reported as PANIC entries instead of hung waits

mod command;
mod config;
mod controller;
mod device;
mod execution;
mod future;
mod logging;
mod testbed;
mod transform;

pub use command::{Command, CommandError, CommandRegistry, ScheduledCommand};
pub use config::{ConfigError, ExecutionConfig, DEFAULT_HEARTBEAT, DEFAULT_TIMEOUT};
pub use controller::FutureController;
pub use device::{
    CapabilityError, Device, DeviceDriver, DeviceRegistry, Loggable, RegistryError, Stimulable,
};
pub use execution::{BuildError, ExecutionState, Test};
pub use future::{wait_for_all, DeadlineFuture, OpCompleter, OpFuture};
pub use testbed::{ResolutionError, Testbed};
pub use transform::{affine_range_map, linear_range_map, AffineMap};
