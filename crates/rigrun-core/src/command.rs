//! Stimulus commands: the schedule entries the main loop fires.
//!
//! A command is built once from its description, resolves its route through
//! the testbed when fired, converts physical values to the electrical units
//! of the driving port and issues exactly one device operation. Command
//! kinds live in a registry keyed by the description's `command` string, so
//! protocol packages can add kinds without the engine knowing them.

use std::f64::consts::PI;

use async_trait::async_trait;
use rigrun_proto::{CommandInfo, LogEntry, PortInfo, Range};
use serde::Deserialize;

use crate::device::Stimulable;
use crate::future::OpFuture;
use crate::testbed::Testbed;
use crate::transform::{affine_range_map, linear_range_map};

/// Errors from building commands out of their descriptions.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command kind '{0}'")]
    UnknownKind(String),

    #[error("invalid data for command kind '{kind}'")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One executable stimulus.
///
/// `execute` must not fail the run: route or capability problems come back
/// as an already-failed future so the schedule keeps going.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, testbed: &mut Testbed) -> OpFuture;

    /// Human-readable description for schedule logs.
    fn describe(&self) -> String;
}

impl std::fmt::Debug for dyn Command + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Command").field(&self.describe()).finish()
    }
}

/// A command bound to its absolute execution time.
pub struct ScheduledCommand {
    pub time: f64,
    pub command: Box<dyn Command>,
}

type CommandFactory =
    Box<dyn Fn(&CommandInfo, f64) -> Result<Box<dyn Command>, CommandError> + Send + Sync>;

/// Maps command kind names to factories.
///
/// Factories receive the raw description plus the command's absolute time,
/// already offset by the preceding phases.
pub struct CommandRegistry {
    factories: std::collections::HashMap<String, CommandFactory>,
}

impl CommandRegistry {
    /// An empty registry, for engines with a fully custom command set.
    pub fn new() -> Self {
        Self { factories: std::collections::HashMap::new() }
    }

    /// A registry with the built-in kinds `set-signal`, `set-signal-ramp`
    /// and `set-signal-sine`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("set-signal", |info, _time| {
            Ok(Box::new(SetSignal::from_info(info)?) as Box<dyn Command>)
        });
        registry.register("set-signal-ramp", |info, _time| {
            Ok(Box::new(SetSignalRamp::from_info(info)?) as Box<dyn Command>)
        });
        registry.register("set-signal-sine", |info, time| {
            Ok(Box::new(SetSignalSine::from_info(info, time)?) as Box<dyn Command>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&CommandInfo, f64) -> Result<Box<dyn Command>, CommandError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Builds the command described by `info`, scheduled at `absolute_time`
    /// seconds into the test.
    pub fn build(
        &self,
        info: &CommandInfo,
        absolute_time: f64,
    ) -> Result<Box<dyn Command>, CommandError> {
        let factory = self
            .factories
            .get(&info.command)
            .ok_or_else(|| CommandError::UnknownKind(info.command.clone()))?;
        factory(info, absolute_time)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn payload<T: serde::de::DeserializeOwned>(info: &CommandInfo) -> Result<T, CommandError> {
    serde_json::from_value(info.data.clone()).map_err(|source| CommandError::Payload {
        kind: info.command.clone(),
        source,
    })
}

/// The route from a target signal back to the device port that drives it.
struct Route {
    device: String,
    port: PortInfo,
    physical: Range,
}

/// Resolves where stimulus for `target`/`signal` has to go.
fn resolve_stimulus(testbed: &Testbed, target: &str, signal: &str) -> Result<Route, LogEntry> {
    let physical = match testbed.get_signal(target, signal) {
        Ok(info) => info.range,
        Err(err) => return Err(LogEntry::failure(err.to_string())),
    };
    let (device, port) = match testbed.trace_back_one(target, signal) {
        Ok(hit) => hit,
        Err(err) => return Err(LogEntry::failure(err.to_string())),
    };
    Ok(Route { device, port, physical })
}

/// The stimulable driver behind `route`, with capability failures flattened
/// into a log entry the caller returns as an already-failed future.
fn stimulable_for<'a>(
    testbed: &'a mut Testbed,
    route: &Route,
) -> Result<&'a mut dyn Stimulable, LogEntry> {
    let device = testbed
        .find_device_mut(&route.device)
        .map_err(|err| LogEntry::failure(err.to_string()))?;
    device
        .stimulable()
        .map_err(|err| LogEntry::failure(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct SetSignalData {
    signal: String,
    value: f64,
}

/// Holds a target signal at a fixed physical value.
struct SetSignal {
    target: String,
    data: SetSignalData,
}

impl SetSignal {
    fn from_info(info: &CommandInfo) -> Result<Self, CommandError> {
        Ok(Self { target: info.target.clone(), data: payload(info)? })
    }
}

#[async_trait]
impl Command for SetSignal {
    async fn execute(&self, testbed: &mut Testbed) -> OpFuture {
        let route = match resolve_stimulus(testbed, &self.target, &self.data.signal) {
            Ok(route) => route,
            Err(entry) => return OpFuture::ready(entry),
        };
        let value = affine_range_map(&route.physical, &route.port.range).apply(self.data.value);
        let driver = match stimulable_for(testbed, &route) {
            Ok(driver) => driver,
            Err(entry) => return OpFuture::ready(entry),
        };
        driver.set_signal(&route.port.channel, value).await
    }

    fn describe(&self) -> String {
        format!(
            "set {}.{} to {}",
            self.target, self.data.signal, self.data.value
        )
    }
}

#[derive(Debug, Deserialize)]
struct SetSignalRampData {
    signal: String,
    start: f64,
    slope: f64,
    duration: f64,
}

/// Ramps a target signal from a starting value at a fixed physical slope.
struct SetSignalRamp {
    target: String,
    data: SetSignalRampData,
}

impl SetSignalRamp {
    fn from_info(info: &CommandInfo) -> Result<Self, CommandError> {
        Ok(Self { target: info.target.clone(), data: payload(info)? })
    }
}

#[async_trait]
impl Command for SetSignalRamp {
    async fn execute(&self, testbed: &mut Testbed) -> OpFuture {
        let route = match resolve_stimulus(testbed, &self.target, &self.data.signal) {
            Ok(route) => route,
            Err(entry) => return OpFuture::ready(entry),
        };
        let start = affine_range_map(&route.physical, &route.port.range).apply(self.data.start);
        let slope = linear_range_map(&route.physical, &route.port.range).apply(self.data.slope);
        let driver = match stimulable_for(testbed, &route) {
            Ok(driver) => driver,
            Err(entry) => return OpFuture::ready(entry),
        };
        driver
            .set_signal_ramp(&route.port.channel, start, slope, self.data.duration)
            .await
    }

    fn describe(&self) -> String {
        format!(
            "ramp {}.{} from {} at {}/s for {}s",
            self.target, self.data.signal, self.data.start, self.data.slope, self.data.duration
        )
    }
}

#[derive(Debug, Deserialize)]
struct SetSignalSineData {
    signal: String,
    amplitude: f64,
    frequency: f64,
    #[serde(default)]
    bias: f64,
    #[serde(default)]
    phase: f64,
}

/// Drives a target signal with a sinusoid around a physical mean.
///
/// The description's phase is relative to the command taking effect; the
/// device's clock runs in test time, so the phase handed down is shifted
/// back by `2π * frequency * scheduled_time`.
struct SetSignalSine {
    target: String,
    data: SetSignalSineData,
    scheduled_time: f64,
}

impl SetSignalSine {
    fn from_info(info: &CommandInfo, scheduled_time: f64) -> Result<Self, CommandError> {
        Ok(Self {
            target: info.target.clone(),
            data: payload(info)?,
            scheduled_time,
        })
    }
}

#[async_trait]
impl Command for SetSignalSine {
    async fn execute(&self, testbed: &mut Testbed) -> OpFuture {
        let route = match resolve_stimulus(testbed, &self.target, &self.data.signal) {
            Ok(route) => route,
            Err(entry) => return OpFuture::ready(entry),
        };
        let amplitude =
            linear_range_map(&route.physical, &route.port.range).apply(self.data.amplitude);
        let bias = affine_range_map(&route.physical, &route.port.range).apply(self.data.bias);
        let frequency = self.data.frequency;
        let phase = self.data.phase - 2.0 * PI * frequency * self.scheduled_time;
        let driver = match stimulable_for(testbed, &route) {
            Ok(driver) => driver,
            Err(entry) => return OpFuture::ready(entry),
        };
        driver
            .set_signal_sine(&route.port.channel, amplitude, frequency, bias, phase)
            .await
    }

    fn describe(&self) -> String {
        format!(
            "drive {}.{} with {} * sin(2π * {} * t + {}) + {}",
            self.target,
            self.data.signal,
            self.data.amplitude,
            self.data.frequency,
            self.data.phase,
            self.data.bias
        )
    }
}
