//! The all-purpose bench device.
//!
//! One driver implementation covers every role the bench needs: a stimulus
//! source, a computing block (summed outputs) and a data acquisition unit.
//! Which role a device plays falls out of its wiring and params, exactly as
//! a real multifunction instrument would.
//!
//! Params (all optional):
//!
//! ```yaml
//! params:
//!   initial:           # electrical value per port signal, applied at setup
//!     out: 2.5
//!   sums:              # computed outputs, recalculated every bench tick
//!     - output: sum
//!       inputs: [val1, val2]
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use rigrun_core::{DeviceDriver, DeviceRegistry, Loggable, OpFuture, Stimulable};
use rigrun_proto::{DeviceInfo, LogEntry, TimeSeries};
use serde::Deserialize;
use tracing::debug;

use crate::hub::SignalHub;

/// Registry key of the bench instrument driver.
pub const INSTRUMENT_IMPLEMENTATION: &str = "bench.instrument";

#[derive(Debug, Clone, Deserialize)]
struct SumBlock {
    output: String,
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstrumentParams {
    /// Electrical values applied to the device's own channels at setup,
    /// keyed by port signal name.
    #[serde(default)]
    initial: HashMap<String, f64>,

    #[serde(default)]
    sums: Vec<SumBlock>,
}

/// A virtual instrument backed by the [`SignalHub`].
pub struct Instrument {
    name: String,
    hub: SignalHub,
    params: InstrumentParams,
    /// Port signal name → electrical channel, from the device interface.
    channels: HashMap<String, String>,
}

impl Instrument {
    /// Builds the instrument for `info`, validating its params eagerly.
    pub fn from_info(info: &DeviceInfo, hub: SignalHub) -> anyhow::Result<Self> {
        let params: InstrumentParams = if info.params.is_null() {
            InstrumentParams::default()
        } else {
            serde_json::from_value(info.params.clone())?
        };
        let channels: HashMap<String, String> = info
            .interface
            .ports()
            .iter()
            .map(|port| (port.signal.clone(), port.channel.clone()))
            .collect();
        for signal in params.initial.keys() {
            anyhow::ensure!(
                channels.contains_key(signal),
                "initial value for unknown signal '{signal}' on '{}'",
                info.name
            );
        }
        for sum in &params.sums {
            anyhow::ensure!(
                channels.contains_key(&sum.output),
                "sum output '{}' is not a signal of '{}'",
                sum.output,
                info.name
            );
            for input in &sum.inputs {
                anyhow::ensure!(
                    channels.contains_key(input),
                    "sum input '{input}' is not a signal of '{}'",
                    info.name
                );
            }
        }
        Ok(Self {
            name: info.name.clone(),
            hub,
            params,
            channels,
        })
    }

    /// Registers the instrument under [`INSTRUMENT_IMPLEMENTATION`].
    pub fn register(registry: &mut DeviceRegistry, hub: &SignalHub) {
        let hub = hub.clone();
        registry.register(INSTRUMENT_IMPLEMENTATION, move |info| {
            Ok(Box::new(Instrument::from_info(info, hub.clone())?) as Box<dyn DeviceDriver>)
        });
    }
}

#[async_trait]
impl DeviceDriver for Instrument {
    async fn open(&mut self) -> OpFuture {
        for sum in &self.params.sums {
            let output = &self.channels[&sum.output];
            let inputs = sum
                .inputs
                .iter()
                .map(|signal| self.channels[signal].clone())
                .collect();
            self.hub.add_sum(&self.name, output, inputs);
        }
        debug!(device = %self.name, "bench instrument attached");
        OpFuture::ready(LogEntry::info(format!("{} attached to bench", self.name)))
    }

    async fn setup(&mut self) -> OpFuture {
        for (signal, value) in &self.params.initial {
            let channel = &self.channels[signal];
            if let Err(err) = self.hub.set_constant(&self.name, channel, *value) {
                return OpFuture::ready(LogEntry::failure(err.to_string()));
            }
        }
        OpFuture::ready(LogEntry::info(format!("{} initialized", self.name)))
    }

    async fn close(&mut self) -> OpFuture {
        self.hub.release_device(&self.name);
        OpFuture::ready(LogEntry::info(format!("{} detached from bench", self.name)))
    }

    fn as_stimulable(&mut self) -> Option<&mut dyn Stimulable> {
        Some(self)
    }

    fn as_loggable(&mut self) -> Option<&mut dyn Loggable> {
        Some(self)
    }
}

#[async_trait]
impl Stimulable for Instrument {
    async fn set_signal(&mut self, channel: &str, value: f64) -> OpFuture {
        match self.hub.set_constant(&self.name, channel, value) {
            Ok(()) => OpFuture::ready(LogEntry::info(format!(
                "{}/{} set to {}",
                self.name, channel, value
            ))),
            Err(err) => OpFuture::ready(LogEntry::failure(err.to_string())),
        }
    }

    async fn set_signal_ramp(
        &mut self,
        channel: &str,
        start: f64,
        slope: f64,
        duration: f64,
    ) -> OpFuture {
        match self.hub.set_ramp(&self.name, channel, start, slope, duration) {
            Ok(()) => OpFuture::ready(LogEntry::info(format!(
                "{}/{} ramping from {} at {}/s",
                self.name, channel, start, slope
            ))),
            Err(err) => OpFuture::ready(LogEntry::failure(err.to_string())),
        }
    }

    async fn set_signal_sine(
        &mut self,
        channel: &str,
        amplitude: f64,
        frequency: f64,
        bias: f64,
        phase: f64,
    ) -> OpFuture {
        match self
            .hub
            .set_sine(&self.name, channel, amplitude, frequency, bias, phase)
        {
            Ok(()) => OpFuture::ready(LogEntry::info(format!(
                "{}/{} driven at {} Hz around {}",
                self.name, channel, frequency, bias
            ))),
            Err(err) => OpFuture::ready(LogEntry::failure(err.to_string())),
        }
    }
}

#[async_trait]
impl Loggable for Instrument {
    async fn log_signal(&mut self, channel: &str, period: f64) -> (OpFuture, OpFuture<TimeSeries>) {
        match self.hub.start_sampler(&self.name, channel, period) {
            Ok(result) => {
                let accept = OpFuture::ready(LogEntry::info(format!(
                    "{}/{} sampling every {}s",
                    self.name, channel, period
                )));
                (accept, result)
            }
            Err(err) => {
                let message = err.to_string();
                (
                    OpFuture::ready(LogEntry::failure(message.clone())),
                    OpFuture::ready(LogEntry::failure(message)),
                )
            }
        }
    }

    async fn end_log_signal(&mut self, channel: &str) -> OpFuture {
        match self.hub.end_sampler(&self.name, channel) {
            Ok(()) => OpFuture::ready(LogEntry::info(format!(
                "{}/{} capture ended",
                self.name, channel
            ))),
            Err(err) => OpFuture::ready(LogEntry::failure(err.to_string())),
        }
    }
}
