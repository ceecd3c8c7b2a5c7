//! A software signal bus standing in for rig wiring.
//!
//! The hub owns one electrical value per registered device channel and
//! advances the whole bench on a fixed grain: generator channels take their
//! new value, wires copy values along the connections, computed outputs are
//! recalculated, then samplers read. A value therefore needs a couple of
//! grain ticks to travel a stimulus→wire→compute→wire→sampler chain, like a
//! settling time, which callers should allow for when asserting on traces.
//!
//! Everything is electrical here. Unit transforms stay in the engine; the
//! bench behaves like the dumb voltage world the engine believes it talks
//! to.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

use rigrun_core::{OpCompleter, OpFuture};
use rigrun_proto::{InterpolationKind, LogEntry, Range, TestbedInfo, TimeSeries};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, trace};

/// Default bench resolution.
pub const DEFAULT_GRAIN: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("no channel '{channel}' on bench device '{device}'")]
    UnknownChannel { device: String, channel: String },

    #[error(
        "value {value} is outside {device}/{channel} bounds {range}"
    )]
    OutOfBounds {
        device: String,
        channel: String,
        value: f64,
        range: Range,
    },

    #[error("no active capture on {device}/{channel}")]
    NoCapture { device: String, channel: String },
}

type ChannelId = (String, String);

enum Generator {
    Constant(f64),
    Ramp {
        start: f64,
        slope: f64,
        duration: f64,
        started_at: f64,
    },
    Sine {
        amplitude: f64,
        frequency: f64,
        bias: f64,
        phase: f64,
    },
}

impl Generator {
    fn value(&self, now: f64) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Ramp { start, slope, duration, started_at } => {
                start + slope * (now - started_at).clamp(0.0, *duration)
            }
            Self::Sine { amplitude, frequency, bias, phase } => {
                bias + amplitude * (2.0 * PI * frequency * now + phase).sin()
            }
        }
    }
}

struct Wire {
    from: ChannelId,
    to: ChannelId,
}

/// Device-local computed output: the sum of some input channels.
struct Sum {
    device: String,
    output: String,
    inputs: Vec<String>,
}

struct Sampler {
    device: String,
    channel: String,
    period: f64,
    next_due: f64,
    time: Vec<f64>,
    values: Vec<f64>,
    completer: Option<OpCompleter<TimeSeries>>,
}

struct HubState {
    now: f64,
    channels: HashMap<ChannelId, f64>,
    ranges: HashMap<ChannelId, Range>,
    generators: HashMap<ChannelId, Generator>,
    wires: Vec<Wire>,
    sums: Vec<Sum>,
    samplers: Vec<Sampler>,
}

impl HubState {
    fn new() -> Self {
        Self {
            now: 0.0,
            channels: HashMap::new(),
            ranges: HashMap::new(),
            generators: HashMap::new(),
            wires: Vec::new(),
            sums: Vec::new(),
            samplers: Vec::new(),
        }
    }

    fn tick(&mut self, grain: f64) {
        let now = self.now;
        for (id, generator) in &self.generators {
            let value = saturate(&self.ranges, id, generator.value(now));
            self.channels.insert(id.clone(), value);
        }
        for wire in &self.wires {
            if let Some(value) = self.channels.get(&wire.from).copied() {
                let value = saturate(&self.ranges, &wire.to, value);
                self.channels.insert(wire.to.clone(), value);
            }
        }
        for sum in &self.sums {
            let total: f64 = sum
                .inputs
                .iter()
                .filter_map(|input| {
                    self.channels
                        .get(&(sum.device.clone(), input.clone()))
                        .copied()
                })
                .sum();
            let id = (sum.device.clone(), sum.output.clone());
            let value = saturate(&self.ranges, &id, total);
            self.channels.insert(id, value);
        }
        for sampler in &mut self.samplers {
            while now + 1e-9 >= sampler.next_due {
                let id = (sampler.device.clone(), sampler.channel.clone());
                let value = self.channels.get(&id).copied().unwrap_or(0.0);
                sampler.time.push(sampler.next_due);
                sampler.values.push(value);
                sampler.next_due += sampler.period;
            }
        }
        self.now = now + grain;
    }
}

fn saturate(ranges: &HashMap<ChannelId, Range>, id: &ChannelId, value: f64) -> f64 {
    match ranges.get(id) {
        Some(range) => value.clamp(range.min(), range.max()),
        None => value,
    }
}

/// Handle to the shared bench. Clones all point at the same state.
#[derive(Clone)]
pub struct SignalHub {
    state: Arc<Mutex<HubState>>,
    grain: Duration,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    /// An empty bench at the default grain.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::new())),
            grain: DEFAULT_GRAIN,
        }
    }

    #[must_use]
    pub fn with_grain(mut self, grain: Duration) -> Self {
        self.grain = grain;
        self
    }

    /// A bench wired up like `bed`: every device port becomes a channel at
    /// its electrical bounds, every connection a wire.
    pub fn from_testbed(bed: &TestbedInfo) -> anyhow::Result<Self> {
        let hub = Self::new();
        {
            let mut state = hub.lock();
            for device in &bed.devices {
                for port in device.interface.ports() {
                    let id = (device.name.clone(), port.channel.clone());
                    state.ranges.insert(id.clone(), port.range);
                    state.channels.insert(id, 0.0);
                }
            }
            for connection in &bed.connections {
                let from = channel_of(bed, &connection.sender, &connection.sender_port)?;
                let to = channel_of(bed, &connection.receiver, &connection.receiver_port)?;
                state.wires.push(Wire { from, to });
            }
        }
        Ok(hub)
    }

    /// Runs the bench on a background task until the returned handle is
    /// aborted or the runtime shuts down. Dropping the handle detaches the
    /// task and leaves the bench running.
    pub fn start(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let grain = self.grain;
        debug!(grain_ms = grain.as_millis() as u64, "starting bench hub");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(grain);
            let grain = grain.as_secs_f64();
            loop {
                interval.tick().await;
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.tick(grain);
                trace!(now = state.now, "bench tick");
            }
        })
    }

    /// Advances the bench by `ticks` grains synchronously, without the
    /// background task. Manual alternative to [`start`] for deterministic
    /// stepping.
    ///
    /// [`start`]: SignalHub::start
    pub fn step(&self, ticks: usize) {
        let grain = self.grain.as_secs_f64();
        let mut state = self.lock();
        for _ in 0..ticks {
            state.tick(grain);
        }
    }

    /// Bench time in seconds, advanced one grain per tick.
    pub fn now(&self) -> f64 {
        self.lock().now
    }

    /// Current value of a channel, if registered.
    pub fn read(&self, device: &str, channel: &str) -> Option<f64> {
        self.lock()
            .channels
            .get(&(device.to_string(), channel.to_string()))
            .copied()
    }

    /// Registers a channel with its electrical bounds, value starting at 0.
    pub fn register_port(&self, device: &str, channel: &str, range: Range) {
        let mut state = self.lock();
        let id = (device.to_string(), channel.to_string());
        state.ranges.insert(id.clone(), range);
        state.channels.entry(id).or_insert(0.0);
    }

    /// Declares `output` of `device` as the sum of its `inputs`.
    pub fn add_sum(&self, device: &str, output: &str, inputs: Vec<String>) {
        self.lock().sums.push(Sum {
            device: device.to_string(),
            output: output.to_string(),
            inputs,
        });
    }

    /// Drives a channel at a fixed value from the next tick on.
    ///
    /// Rejects values outside the channel bounds; waveform generators
    /// saturate instead, like a clipping amplifier, but a plain set is
    /// assumed to be a mistake in the test description.
    pub fn set_constant(&self, device: &str, channel: &str, value: f64) -> Result<(), HubError> {
        let mut state = self.lock();
        let id = (device.to_string(), channel.to_string());
        let range = *state.ranges.get(&id).ok_or_else(|| HubError::UnknownChannel {
            device: device.to_string(),
            channel: channel.to_string(),
        })?;
        if !range.contains(value) {
            return Err(HubError::OutOfBounds {
                device: device.to_string(),
                channel: channel.to_string(),
                value,
                range,
            });
        }
        state.generators.insert(id, Generator::Constant(value));
        Ok(())
    }

    /// Drives a channel along `start + slope * t`, holding the final value
    /// after `duration` seconds.
    pub fn set_ramp(
        &self,
        device: &str,
        channel: &str,
        start: f64,
        slope: f64,
        duration: f64,
    ) -> Result<(), HubError> {
        let mut state = self.lock();
        let id = known_channel(&state, device, channel)?;
        let started_at = state.now;
        state.generators.insert(
            id,
            Generator::Ramp { start, slope, duration, started_at },
        );
        Ok(())
    }

    /// Drives a channel with a sinusoid on the bench clock.
    pub fn set_sine(
        &self,
        device: &str,
        channel: &str,
        amplitude: f64,
        frequency: f64,
        bias: f64,
        phase: f64,
    ) -> Result<(), HubError> {
        let mut state = self.lock();
        let id = known_channel(&state, device, channel)?;
        state.generators.insert(
            id,
            Generator::Sine { amplitude, frequency, bias, phase },
        );
        Ok(())
    }

    /// Starts sampling a channel every `period` seconds, first sample on the
    /// next tick. The returned future resolves with the trace once
    /// [`end_sampler`] runs; dropping the capture (device close) fails it.
    ///
    /// [`end_sampler`]: SignalHub::end_sampler
    pub fn start_sampler(
        &self,
        device: &str,
        channel: &str,
        period: f64,
    ) -> Result<OpFuture<TimeSeries>, HubError> {
        let mut state = self.lock();
        let id = known_channel(&state, device, channel)?;
        let (completer, future) =
            OpFuture::channel(format!("trace of {}/{}", device, channel));
        let next_due = state.now;
        state.samplers.push(Sampler {
            device: id.0,
            channel: id.1,
            period,
            next_due,
            time: Vec::new(),
            values: Vec::new(),
            completer: Some(completer),
        });
        Ok(future)
    }

    /// Stops sampling a channel and resolves its trace future.
    pub fn end_sampler(&self, device: &str, channel: &str) -> Result<(), HubError> {
        let mut state = self.lock();
        let position = state
            .samplers
            .iter()
            .position(|s| s.device == device && s.channel == channel)
            .ok_or_else(|| HubError::NoCapture {
                device: device.to_string(),
                channel: channel.to_string(),
            })?;
        let mut sampler = state.samplers.swap_remove(position);
        let Some(completer) = sampler.completer.take() else {
            return Ok(());
        };
        match TimeSeries::new(
            std::mem::take(&mut sampler.time),
            std::mem::take(&mut sampler.values),
            InterpolationKind::Previous,
        ) {
            Ok(series) => completer.complete_with(
                LogEntry::info(format!(
                    "captured {} samples of {}/{}",
                    series.time().len(),
                    device,
                    channel
                )),
                series,
            ),
            Err(_) => completer.complete(LogEntry::failure(format!(
                "no samples captured on {}/{}",
                device, channel
            ))),
        }
        Ok(())
    }

    /// Drops every generator, sum and sampler belonging to `device`.
    /// Pending trace futures fail through their dropped completers.
    pub fn release_device(&self, device: &str) {
        let mut state = self.lock();
        state.generators.retain(|(d, _), _| d != device);
        state.sums.retain(|s| s.device != device);
        state.samplers.retain(|s| s.device != device);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn known_channel(state: &HubState, device: &str, channel: &str) -> Result<ChannelId, HubError> {
    let id = (device.to_string(), channel.to_string());
    if !state.channels.contains_key(&id) {
        return Err(HubError::UnknownChannel {
            device: device.to_string(),
            channel: channel.to_string(),
        });
    }
    Ok(id)
}

fn channel_of(bed: &TestbedInfo, device: &str, signal: &str) -> anyhow::Result<ChannelId> {
    let info = bed
        .device(device)
        .ok_or_else(|| anyhow::anyhow!("connection references unknown device '{device}'"))?;
    let port = info.interface.port(signal).ok_or_else(|| {
        anyhow::anyhow!("connection references unknown port '{signal}' on '{device}'")
    })?;
    Ok((device.to_string(), port.channel.clone()))
}
