//! Test and testbed descriptions.
//!
//! These types are the parsed form of the declarative test inputs: what to
//! stimulate and when ([`TestInfo`]), and what hardware the rig is made of
//! ([`TestbedInfo`]). Loaders produce them (from YAML or elsewhere); the
//! engine validates them once at build time and treats them as immutable
//! afterwards.

use crate::timeseries::InterpolationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while validating test and testbed descriptions.
#[derive(Debug, Error, PartialEq)]
pub enum InfoError {
    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),

    #[error("duplicate signal '{signal}' on target '{target}'")]
    DuplicateSignal { target: String, signal: String },

    #[error("names must not contain '.': {0}")]
    DottedName(String),

    #[error("invalid range: min {min} must not exceed max {max}")]
    InvalidRange { min: f64, max: f64 },

    #[error("cannot parse range expression '{0}' (expected 'lo..hi')")]
    RangeSyntax(String),

    #[error("command time {time} must be finite and non-negative")]
    InvalidCommandTime { time: f64 },

    #[error("command at time {time} lies past the end of its phase (duration {duration})")]
    CommandPastPhaseEnd { time: f64, duration: f64 },

    #[error("phase duration {duration} must be finite and non-negative")]
    InvalidDuration { duration: f64 },

    #[error("logging period {period} must be finite and positive")]
    InvalidPeriod { period: f64 },

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("target '{target}' has no signal '{signal}'")]
    UnknownSignal { target: String, signal: String },

    #[error("duplicate logging request for {target}.{signal}")]
    DuplicateLoggingRequest { target: String, signal: String },

    #[error("duplicate device name: {0}")]
    DuplicateDevice(String),

    #[error("connection references unknown device: {0}")]
    UnknownDevice(String),

    #[error("device '{device}' has no port for signal '{signal}'")]
    UnknownPort { device: String, signal: String },
}

/// Closed numeric range with `min <= max`.
///
/// Deserializes from either a `{min, max}` mapping or the compact `"lo..hi"`
/// string form used in hand-written descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr")]
pub struct Range {
    min: f64,
    max: f64,
}

impl Range {
    /// Creates a range after checking `min <= max` and finiteness.
    pub fn new(min: f64, max: f64) -> Result<Self, InfoError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(InfoError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Lower bound.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Width of the range.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Returns true if `value` lies within the range (inclusive).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.min, self.max)
    }
}

impl FromStr for Range {
    type Err = InfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lo, hi) = s
            .split_once("..")
            .ok_or_else(|| InfoError::RangeSyntax(s.to_owned()))?;
        let min = lo
            .trim()
            .parse::<f64>()
            .map_err(|_| InfoError::RangeSyntax(s.to_owned()))?;
        let max = hi
            .trim()
            .parse::<f64>()
            .map_err(|_| InfoError::RangeSyntax(s.to_owned()))?;
        Self::new(min, max)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Compact(String),
    Full { min: f64, max: f64 },
}

impl TryFrom<RangeRepr> for Range {
    type Error = InfoError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        match repr {
            RangeRepr::Compact(text) => text.parse(),
            RangeRepr::Full { min, max } => Self::new(min, max),
        }
    }
}

/// A physical signal exposed by a target, with physical-unit bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub name: String,
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SignalInfo {
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        Self {
            name: name.into(),
            range,
            description: None,
        }
    }
}

/// A logical signal-bearing entity under test.
///
/// Targets carry physical-unit signal bounds; where those signals live
/// electrically is the testbed's business, not the target's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub name: String,
    pub signals: Vec<SignalInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TargetInfo {
    pub fn new(name: impl Into<String>, signals: Vec<SignalInfo>) -> Self {
        Self {
            name: name.into(),
            signals,
            description: None,
        }
    }

    /// Looks up a signal by name.
    pub fn signal(&self, name: &str) -> Option<&SignalInfo> {
        self.signals.iter().find(|s| s.name == name)
    }

    fn validate(&self) -> Result<(), InfoError> {
        if self.name.contains('.') {
            return Err(InfoError::DottedName(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for signal in &self.signals {
            if signal.name.contains('.') {
                return Err(InfoError::DottedName(signal.name.clone()));
            }
            if !seen.insert(signal.name.as_str()) {
                return Err(InfoError::DuplicateSignal {
                    target: self.name.clone(),
                    signal: signal.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A device's electrical connection point, mapped to one physical signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Physical signal name this port carries.
    pub signal: String,
    /// Electrical channel identifier on the device (pin, register, path).
    pub channel: String,
    /// Electrical bounds of the channel.
    pub range: Range,
}

impl PortInfo {
    pub fn new(signal: impl Into<String>, channel: impl Into<String>, range: Range) -> Self {
        Self {
            signal: signal.into(),
            channel: channel.into(),
            range,
        }
    }
}

/// Ordered set of ports a device exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElectricalInterface {
    ports: Vec<PortInfo>,
}

impl ElectricalInterface {
    pub fn new(ports: Vec<PortInfo>) -> Self {
        Self { ports }
    }

    /// Looks up the port carrying `signal`.
    pub fn port(&self, signal: &str) -> Option<&PortInfo> {
        self.ports.iter().find(|p| p.signal == signal)
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }
}

/// A physical actor in the wiring graph.
///
/// `implementation` is the registry key of the driver that talks to the
/// device; `params` are passed verbatim to the driver factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub implementation: String,
    #[serde(default)]
    pub interface: ElectricalInterface,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl DeviceInfo {
    pub fn new(
        name: impl Into<String>,
        implementation: impl Into<String>,
        interface: ElectricalInterface,
    ) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.into(),
            interface,
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// A directed wiring edge between two device ports.
///
/// Ports are named by the signal they carry on their device's interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub sender: String,
    pub sender_port: String,
    pub receiver: String,
    pub receiver_port: String,
}

impl ConnectionInfo {
    pub fn new(
        sender: impl Into<String>,
        sender_port: impl Into<String>,
        receiver: impl Into<String>,
        receiver_port: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            sender_port: sender_port.into(),
            receiver: receiver.into(),
            receiver_port: receiver_port.into(),
        }
    }
}

/// The rig: devices plus the wiring between their ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestbedInfo {
    pub devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub connections: Vec<ConnectionInfo>,
}

impl TestbedInfo {
    pub fn new(devices: Vec<DeviceInfo>, connections: Vec<ConnectionInfo>) -> Self {
        Self {
            devices,
            connections,
        }
    }

    /// Looks up a device by name.
    pub fn device(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Checks device-name uniqueness and that every connection endpoint
    /// names an existing device port.
    pub fn validate(&self) -> Result<(), InfoError> {
        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(InfoError::DuplicateDevice(device.name.clone()));
            }
        }
        for connection in &self.connections {
            self.check_endpoint(&connection.sender, &connection.sender_port)?;
            self.check_endpoint(&connection.receiver, &connection.receiver_port)?;
        }
        Ok(())
    }

    fn check_endpoint(&self, device: &str, signal: &str) -> Result<(), InfoError> {
        let info = self
            .device(device)
            .ok_or_else(|| InfoError::UnknownDevice(device.to_owned()))?;
        info.interface
            .port(signal)
            .ok_or_else(|| InfoError::UnknownPort {
                device: device.to_owned(),
                signal: signal.to_owned(),
            })?;
        Ok(())
    }
}

/// One stimulus operation within a phase.
///
/// `time` is phase-local; `command` is the registry key of the command kind;
/// `data` is the kind-specific payload, deserialized by the kind's factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub time: f64,
    pub command: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl CommandInfo {
    pub fn new(time: f64, command: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            time,
            command: command.into(),
            target: target.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    fn validate(&self) -> Result<(), InfoError> {
        if !self.time.is_finite() || self.time < 0.0 {
            return Err(InfoError::InvalidCommandTime { time: self.time });
        }
        Ok(())
    }
}

/// A stretch of test time with its stimulus commands.
///
/// Commands need not be time-ordered within the phase, but must be scheduled
/// strictly before the phase ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub duration: f64,
    #[serde(default)]
    pub commands: Vec<CommandInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PhaseInfo {
    pub fn new(duration: f64, commands: Vec<CommandInfo>) -> Self {
        Self {
            duration,
            commands,
            description: None,
        }
    }

    fn validate(&self) -> Result<(), InfoError> {
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(InfoError::InvalidDuration {
                duration: self.duration,
            });
        }
        for command in &self.commands {
            command.validate()?;
            if command.time >= self.duration {
                return Err(InfoError::CommandPastPhaseEnd {
                    time: command.time,
                    duration: self.duration,
                });
            }
        }
        Ok(())
    }
}

/// A request to capture one target signal during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingInfo {
    pub target: String,
    pub signal: String,
    /// Sample period in seconds.
    pub period: f64,
    /// Interpolation applied to the captured trace.
    #[serde(default)]
    pub kind: InterpolationKind,
}

impl LoggingInfo {
    pub fn new(target: impl Into<String>, signal: impl Into<String>, period: f64) -> Self {
        Self {
            target: target.into(),
            signal: signal.into(),
            period,
            kind: InterpolationKind::default(),
        }
    }

    pub fn with_kind(mut self, kind: InterpolationKind) -> Self {
        self.kind = kind;
        self
    }

    /// The fully qualified signal name, `"{target}.{signal}"`. Keys of
    /// [`Report::results`](crate::Report) use this form.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.target, self.signal)
    }

    fn validate(&self) -> Result<(), InfoError> {
        if !self.period.is_finite() || self.period <= 0.0 {
            return Err(InfoError::InvalidPeriod {
                period: self.period,
            });
        }
        Ok(())
    }
}

/// A complete declarative test description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    pub targets: Vec<TargetInfo>,
    #[serde(default)]
    pub logging: Vec<LoggingInfo>,
    pub phases: Vec<PhaseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TestInfo {
    pub fn new(
        targets: Vec<TargetInfo>,
        logging: Vec<LoggingInfo>,
        phases: Vec<PhaseInfo>,
    ) -> Self {
        Self {
            targets,
            logging,
            phases,
            description: None,
        }
    }

    /// Looks up a target by name.
    pub fn target(&self, name: &str) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Total test duration: the sum of all phase durations.
    pub fn total_duration(&self) -> f64 {
        self.phases.iter().map(|p| p.duration).sum()
    }

    /// Validates the description as a whole.
    ///
    /// Checks target/signal uniqueness and dots in names, phase and command
    /// times, logging periods, and that every command and logging request
    /// references a known target signal.
    pub fn validate(&self) -> Result<(), InfoError> {
        let mut names = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !names.insert(target.name.as_str()) {
                return Err(InfoError::DuplicateTarget(target.name.clone()));
            }
        }

        let mut requested = HashSet::new();
        for request in &self.logging {
            request.validate()?;
            let target = self
                .target(&request.target)
                .ok_or_else(|| InfoError::UnknownTarget(request.target.clone()))?;
            target
                .signal(&request.signal)
                .ok_or_else(|| InfoError::UnknownSignal {
                    target: request.target.clone(),
                    signal: request.signal.clone(),
                })?;
            if !requested.insert((request.target.as_str(), request.signal.as_str())) {
                return Err(InfoError::DuplicateLoggingRequest {
                    target: request.target.clone(),
                    signal: request.signal.clone(),
                });
            }
        }

        for phase in &self.phases {
            phase.validate()?;
            for command in &phase.commands {
                if self.target(&command.target).is_none() {
                    return Err(InfoError::UnknownTarget(command.target.clone()));
                }
            }
        }
        Ok(())
    }
}
