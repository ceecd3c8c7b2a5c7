//! Device drivers, capability traits and the driver registry.
//!
//! A driver owns the connection to one piece of rig hardware. The engine
//! talks to it exclusively through [`DeviceDriver`] and the optional
//! capability traits [`Stimulable`] and [`Loggable`]; which capabilities a
//! driver exposes is discovered at runtime via the `as_*` accessors, so a
//! plain power supply and a multi-channel DAQ share one registry.
//!
//! Every operation returns an [`OpFuture`] immediately. Drivers are free to
//! resolve it on the spot or hand the paired completer to a background task;
//! the engine never blocks the heartbeat on device I/O.

use std::collections::HashMap;

use async_trait::async_trait;
use rigrun_proto::{DeviceInfo, ElectricalInterface, LogEntry, TimeSeries};
use tracing::debug;

use crate::future::OpFuture;

/// A driver was asked for a capability it does not implement.
#[derive(Debug, Clone, thiserror::Error)]
#[error("device '{device}' is not {capability}")]
pub struct CapabilityError {
    pub device: String,
    pub capability: &'static str,
}

/// Lifecycle surface every driver implements.
///
/// `open` establishes the connection, `setup` brings the hardware to its
/// initial state, `close` releases it. `close` must be safe to call in any
/// state, including after a failed `open`.
#[async_trait]
pub trait DeviceDriver: Send {
    async fn open(&mut self) -> OpFuture;

    async fn setup(&mut self) -> OpFuture;

    async fn close(&mut self) -> OpFuture;

    /// Downcast to the stimulation capability, if the driver has it.
    fn as_stimulable(&mut self) -> Option<&mut dyn Stimulable> {
        None
    }

    /// Downcast to the logging capability, if the driver has it.
    fn as_loggable(&mut self) -> Option<&mut dyn Loggable> {
        None
    }
}

/// Capability of driving an output channel.
///
/// All values are electrical, in the units of the addressed channel. The
/// ramp and sine waveforms have default implementations that report the
/// shape as unsupported, so simple drivers only provide `set_signal`.
#[async_trait]
pub trait Stimulable: Send {
    /// Holds `channel` at `value` until told otherwise.
    async fn set_signal(&mut self, channel: &str, value: f64) -> OpFuture;

    /// Ramps `channel` from `start` with `slope` per second, holding the
    /// final value once `duration` seconds have passed.
    async fn set_signal_ramp(
        &mut self,
        channel: &str,
        start: f64,
        slope: f64,
        duration: f64,
    ) -> OpFuture {
        let _ = (start, slope, duration);
        OpFuture::ready(LogEntry::failure(format!(
            "ramp output on channel '{channel}' is not supported by this device"
        )))
    }

    /// Drives `channel` with `bias + amplitude * sin(2π * frequency * t + phase)`,
    /// `t` measured on the device's running clock. The engine synchronizes
    /// that clock with the start of the test and pre-adjusts `phase`, so
    /// test descriptions state phase relative to the command taking effect.
    async fn set_signal_sine(
        &mut self,
        channel: &str,
        amplitude: f64,
        frequency: f64,
        bias: f64,
        phase: f64,
    ) -> OpFuture {
        let _ = (amplitude, frequency, bias, phase);
        OpFuture::ready(LogEntry::failure(format!(
            "sine output on channel '{channel}' is not supported by this device"
        )))
    }
}

impl std::fmt::Debug for dyn Stimulable + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stimulable").finish_non_exhaustive()
    }
}

/// Capability of capturing an input channel over time.
#[async_trait]
pub trait Loggable: Send {
    /// Starts sampling `channel` every `period` seconds.
    ///
    /// The first future acknowledges that capture is running; the second
    /// resolves with the captured trace once [`end_log_signal`] concludes
    /// the capture.
    ///
    /// [`end_log_signal`]: Loggable::end_log_signal
    async fn log_signal(&mut self, channel: &str, period: f64) -> (OpFuture, OpFuture<TimeSeries>);

    /// Stops sampling `channel` and lets the paired trace future resolve.
    async fn end_log_signal(&mut self, channel: &str) -> OpFuture;
}

/// One rig device: its description plus the driver bound to it.
pub struct Device {
    name: String,
    interface: ElectricalInterface,
    driver: Box<dyn DeviceDriver>,
}

impl Device {
    pub fn new(info: &DeviceInfo, driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            name: info.name.clone(),
            interface: info.interface.clone(),
            driver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &ElectricalInterface {
        &self.interface
    }

    pub async fn open(&mut self) -> OpFuture {
        debug!(device = %self.name, "opening device");
        self.driver.open().await
    }

    pub async fn setup(&mut self) -> OpFuture {
        debug!(device = %self.name, "setting up device");
        self.driver.setup().await
    }

    pub async fn close(&mut self) -> OpFuture {
        debug!(device = %self.name, "closing device");
        self.driver.close().await
    }

    pub fn stimulable(&mut self) -> Result<&mut dyn Stimulable, CapabilityError> {
        let name = self.name.clone();
        self.driver
            .as_stimulable()
            .ok_or(CapabilityError { device: name, capability: "stimulable" })
    }

    pub fn loggable(&mut self) -> Result<&mut dyn Loggable, CapabilityError> {
        let name = self.name.clone();
        self.driver
            .as_loggable()
            .ok_or(CapabilityError { device: name, capability: "loggable" })
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Errors from driver construction.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no driver registered for implementation '{0}'")]
    UnknownImplementation(String),

    #[error("building driver '{implementation}' for device '{name}' failed")]
    Construction {
        name: String,
        implementation: String,
        #[source]
        source: anyhow::Error,
    },
}

type DriverFactory = Box<dyn Fn(&DeviceInfo) -> anyhow::Result<Box<dyn DeviceDriver>> + Send + Sync>;

/// Maps implementation names from testbed descriptions to driver factories.
#[derive(Default)]
pub struct DeviceRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `implementation`, replacing any previous
    /// registration of the same name.
    pub fn register<F>(&mut self, implementation: impl Into<String>, factory: F)
    where
        F: Fn(&DeviceInfo) -> anyhow::Result<Box<dyn DeviceDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(implementation.into(), Box::new(factory));
    }

    pub fn contains(&self, implementation: &str) -> bool {
        self.factories.contains_key(implementation)
    }

    /// Registered implementation names, unordered.
    pub fn implementations(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the driver for `info` and wraps it into a [`Device`].
    pub fn build(&self, info: &DeviceInfo) -> Result<Device, RegistryError> {
        let factory = self
            .factories
            .get(&info.implementation)
            .ok_or_else(|| RegistryError::UnknownImplementation(info.implementation.clone()))?;
        let driver = factory(info).map_err(|source| RegistryError::Construction {
            name: info.name.clone(),
            implementation: info.implementation.clone(),
            source,
        })?;
        Ok(Device::new(info, driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigrun_proto::Severity;

    struct BareDriver;

    #[async_trait]
    impl DeviceDriver for BareDriver {
        async fn open(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("opened"))
        }

        async fn setup(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("set up"))
        }

        async fn close(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("closed"))
        }
    }

    struct OutputOnlyDriver;

    #[async_trait]
    impl DeviceDriver for OutputOnlyDriver {
        async fn open(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("opened"))
        }

        async fn setup(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("set up"))
        }

        async fn close(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("closed"))
        }

        fn as_stimulable(&mut self) -> Option<&mut dyn Stimulable> {
            Some(self)
        }
    }

    #[async_trait]
    impl Stimulable for OutputOnlyDriver {
        async fn set_signal(&mut self, _channel: &str, _value: f64) -> OpFuture {
            OpFuture::ready(LogEntry::info("value set"))
        }
    }

    fn info(name: &str, implementation: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            implementation: implementation.to_string(),
            interface: ElectricalInterface::default(),
            params: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_bare_driver_lacks_capabilities() {
        let mut device = Device::new(&info("psu", "bare"), Box::new(BareDriver));
        assert!(device.stimulable().is_err());
        assert!(device.loggable().is_err());
        let err = device.stimulable().unwrap_err();
        assert_eq!(err.device, "psu");
        assert_eq!(err.capability, "stimulable");
    }

    #[tokio::test]
    async fn test_default_waveforms_report_unsupported() {
        let mut driver = OutputOnlyDriver;
        let future = driver.set_signal_ramp("out", 0.0, 1.0, 2.0).await;
        let log = future.log().unwrap();
        assert_eq!(log.severity, Severity::Failed);
        assert!(log.what.contains("ramp"));
        assert!(log.what.contains("out"));
    }

    #[test]
    fn test_registry_builds_registered_implementations() {
        let mut registry = DeviceRegistry::new();
        registry.register("bare", |_info| Ok(Box::new(BareDriver) as Box<dyn DeviceDriver>));

        assert!(registry.contains("bare"));
        let device = registry.build(&info("psu", "bare")).unwrap();
        assert_eq!(device.name(), "psu");

        let err = registry.build(&info("daq", "missing")).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownImplementation(name) if name == "missing"));
    }

    #[test]
    fn test_registry_wraps_construction_failures() {
        let mut registry = DeviceRegistry::new();
        registry.register("fallible", |_info| anyhow::bail!("no such serial port"));

        let err = registry.build(&info("psu", "fallible")).unwrap_err();
        match err {
            RegistryError::Construction { name, implementation, source } => {
                assert_eq!(name, "psu");
                assert_eq!(implementation, "fallible");
                assert!(source.to_string().contains("serial port"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
