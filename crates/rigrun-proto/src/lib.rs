//! # rigrun-proto
//!
//! Shared data model for the Rigrun hardware-in-the-loop test engine.
//!
//! This crate defines the vocabulary the engine crates exchange:
//! - Test and testbed descriptions ([`TestInfo`], [`TestbedInfo`]) with
//!   build-time validation
//! - Log severities, entries and the [`Logbook`] accumulated during a run
//! - The final [`Report`] (logbook + signal traces)
//! - [`TimeSeries`] with interpolation, transform and distance helpers
//!
//! Everything here is pure data: serializable, clonable, no live handles.

mod infos;
mod log;
mod report;
mod severity;
pub mod timeseries;

pub use infos::{
    CommandInfo, ConnectionInfo, DeviceInfo, ElectricalInterface, InfoError, LoggingInfo,
    PhaseInfo, PortInfo, Range, SignalInfo, TargetInfo, TestInfo, TestbedInfo,
};
pub use log::{LogEntry, Logbook};
pub use report::Report;
pub use severity::Severity;
pub use timeseries::{InterpolationKind, SeriesError, TimeSeries};
