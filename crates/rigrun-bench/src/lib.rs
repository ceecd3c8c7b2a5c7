//! # rigrun-bench
//!
//! A virtual testbench for exercising the execution engine without
//! hardware.
//!
//! This crate provides:
//! - A shared [`SignalHub`] that simulates electrical signal flow between
//!   device channels on a fixed time grain
//! - The `bench.instrument` driver, a stimulable and loggable device wired
//!   into the hub
//! - Scripted drivers whose per-operation behavior (severity, delay, hang)
//!   is chosen by the test

mod hub;
mod instrument;
mod scripted;

pub use hub::{HubError, SignalHub, DEFAULT_GRAIN};
pub use instrument::{Instrument, INSTRUMENT_IMPLEMENTATION};
pub use scripted::{Behavior, CallRecord, ScriptHandle, ScriptedDriver};

use rigrun_core::DeviceRegistry;

/// Registers every bench-provided driver implementation on `registry`,
/// all attached to the same `hub`.
pub fn register_builtin(registry: &mut DeviceRegistry, hub: &SignalHub) {
    Instrument::register(registry, hub);
}
