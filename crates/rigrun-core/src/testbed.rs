//! The assembled testbed: live devices, wiring and target descriptions.
//!
//! A *target* is the logical entity a test talks about ("the ECU", "the
//! adder"); a *device* is a physical actor in the wiring graph. The two are
//! deliberately separate: a target's signal is often driven or observed by a
//! different device than the one exposing it, and the connection graph is
//! what links them. `trace_back` walks against the wiring direction to the
//! device that drives a signal, `trace_forward` walks with it to the device
//! that sees the signal.

use rigrun_proto::{
    ConnectionInfo, Logbook, PortInfo, SignalInfo, TargetInfo, TestbedInfo,
};
use tokio::time::Duration;
use tracing::debug;

use crate::device::{Device, DeviceRegistry, RegistryError};
use crate::future::wait_for_all;

/// A name in the test description did not resolve against the testbed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("no device named '{0}' in the testbed")]
    UnknownDevice(String),

    #[error("no target named '{0}' in the test description")]
    UnknownTarget(String),

    #[error("target '{target}' has no signal named '{signal}'")]
    UnknownSignal { target: String, signal: String },

    #[error("no connection drives signal '{signal}' of '{device}'")]
    NoSender { device: String, signal: String },

    #[error("no connection carries signal '{signal}' of '{device}' onward")]
    NoReceiver { device: String, signal: String },
}

pub struct Testbed {
    targets: Vec<TargetInfo>,
    devices: Vec<Device>,
    connections: Vec<ConnectionInfo>,
}

impl Testbed {
    pub fn new(
        targets: Vec<TargetInfo>,
        devices: Vec<Device>,
        connections: Vec<ConnectionInfo>,
    ) -> Self {
        Self { targets, devices, connections }
    }

    /// Builds every device of `bed` through `registry`.
    ///
    /// Assumes `bed` has already been validated; construction failures from
    /// individual driver factories surface as [`RegistryError`].
    pub fn from_info(
        targets: Vec<TargetInfo>,
        bed: &TestbedInfo,
        registry: &DeviceRegistry,
    ) -> Result<Self, RegistryError> {
        let devices = bed
            .devices
            .iter()
            .map(|info| registry.build(info))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(targets, devices, bed.connections.clone()))
    }

    pub fn find_device(&self, name: &str) -> Result<&Device, ResolutionError> {
        self.devices
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| ResolutionError::UnknownDevice(name.to_string()))
    }

    pub fn find_device_mut(&mut self, name: &str) -> Result<&mut Device, ResolutionError> {
        self.devices
            .iter_mut()
            .find(|d| d.name() == name)
            .ok_or_else(|| ResolutionError::UnknownDevice(name.to_string()))
    }

    /// Physical description of `signal` on `target`.
    pub fn get_signal(&self, target: &str, signal: &str) -> Result<&SignalInfo, ResolutionError> {
        let target_info = self
            .targets
            .iter()
            .find(|t| t.name == target)
            .ok_or_else(|| ResolutionError::UnknownTarget(target.to_string()))?;
        target_info
            .signal(signal)
            .ok_or_else(|| ResolutionError::UnknownSignal {
                target: target.to_string(),
                signal: signal.to_string(),
            })
    }

    /// All receiver device/port pairs wired to `device`'s `signal`.
    pub fn trace_forward<'a>(
        &'a self,
        device: &'a str,
        signal: &'a str,
    ) -> impl Iterator<Item = (&'a Device, &'a PortInfo)> {
        self.connections
            .iter()
            .filter(move |c| c.sender == device && c.sender_port == signal)
            .filter_map(move |c| self.endpoint(&c.receiver, &c.receiver_port))
    }

    /// All sender device/port pairs that drive `device`'s `signal`.
    pub fn trace_back<'a>(
        &'a self,
        device: &'a str,
        signal: &'a str,
    ) -> impl Iterator<Item = (&'a Device, &'a PortInfo)> {
        self.connections
            .iter()
            .filter(move |c| c.receiver == device && c.receiver_port == signal)
            .filter_map(move |c| self.endpoint(&c.sender, &c.sender_port))
    }

    /// First hit of [`trace_forward`], as owned values so the caller can go
    /// on to borrow the testbed mutably.
    ///
    /// [`trace_forward`]: Testbed::trace_forward
    pub fn trace_forward_one(
        &self,
        device: &str,
        signal: &str,
    ) -> Result<(String, PortInfo), ResolutionError> {
        self.trace_forward(device, signal)
            .next()
            .map(|(d, p)| (d.name().to_string(), p.clone()))
            .ok_or_else(|| ResolutionError::NoReceiver {
                device: device.to_string(),
                signal: signal.to_string(),
            })
    }

    /// First hit of [`trace_back`], as owned values.
    ///
    /// [`trace_back`]: Testbed::trace_back
    pub fn trace_back_one(
        &self,
        device: &str,
        signal: &str,
    ) -> Result<(String, PortInfo), ResolutionError> {
        self.trace_back(device, signal)
            .next()
            .map(|(d, p)| (d.name().to_string(), p.clone()))
            .ok_or_else(|| ResolutionError::NoSender {
                device: device.to_string(),
                signal: signal.to_string(),
            })
    }

    fn endpoint(&self, device: &str, signal: &str) -> Option<(&Device, &PortInfo)> {
        let device = self.devices.iter().find(|d| d.name() == device)?;
        let port = device.interface().port(signal)?;
        Some((device, port))
    }

    /// Opens every device, fanning the operations out before waiting.
    ///
    /// Logs aggregate in device-list order regardless of completion order.
    pub async fn open_all(&mut self, timeout: Duration) -> Logbook {
        debug!(devices = self.devices.len(), "opening all devices");
        let mut futures = Vec::with_capacity(self.devices.len());
        for device in &mut self.devices {
            futures.push(device.open().await);
        }
        wait_for_all(&futures, Some(timeout)).await
    }

    /// Sets up every device, fan-out then bounded wait.
    pub async fn setup_all(&mut self, timeout: Duration) -> Logbook {
        debug!(devices = self.devices.len(), "setting up all devices");
        let mut futures = Vec::with_capacity(self.devices.len());
        for device in &mut self.devices {
            futures.push(device.setup().await);
        }
        wait_for_all(&futures, Some(timeout)).await
    }

    /// Closes every device, fan-out then bounded wait.
    pub async fn close_all(&mut self, timeout: Duration) -> Logbook {
        debug!(devices = self.devices.len(), "closing all devices");
        let mut futures = Vec::with_capacity(self.devices.len());
        for device in &mut self.devices {
            futures.push(device.close().await);
        }
        wait_for_all(&futures, Some(timeout)).await
    }
}

impl std::fmt::Debug for Testbed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Testbed")
            .field("targets", &self.targets.len())
            .field("devices", &self.devices.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rigrun_proto::{
        DeviceInfo, ElectricalInterface, LogEntry, Range, Severity,
    };
    use crate::device::DeviceDriver;
    use crate::future::OpFuture;

    struct NullDriver {
        open_severity: Severity,
    }

    #[async_trait]
    impl DeviceDriver for NullDriver {
        async fn open(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::new(self.open_severity, "opened"))
        }

        async fn setup(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("set up"))
        }

        async fn close(&mut self) -> OpFuture {
            OpFuture::ready(LogEntry::info("closed"))
        }
    }

    fn device(name: &str, ports: Vec<PortInfo>) -> Device {
        let info = DeviceInfo::new(name, "null", ElectricalInterface::new(ports));
        Device::new(&info, Box::new(NullDriver { open_severity: Severity::Info }))
    }

    fn port(signal: &str, channel: &str, min: f64, max: f64) -> PortInfo {
        PortInfo::new(signal, channel, Range::new(min, max).unwrap())
    }

    fn wired_testbed() -> Testbed {
        let targets = vec![TargetInfo::new(
            "adder",
            vec![
                SignalInfo::new("val1", Range::new(0.0, 100.0).unwrap()),
                SignalInfo::new("sum", Range::new(0.0, 200.0).unwrap()),
            ],
        )];
        let devices = vec![
            device("gpio", vec![port("out", "ao0", 0.0, 5.0)]),
            device(
                "adder",
                vec![
                    port("val1", "in0", 0.0, 5.0),
                    port("sum", "out0", 0.0, 10.0),
                ],
            ),
            device("daq", vec![port("input", "ai0", 0.0, 10.0)]),
        ];
        let connections = vec![
            ConnectionInfo::new("gpio", "out", "adder", "val1"),
            ConnectionInfo::new("adder", "sum", "daq", "input"),
        ];
        Testbed::new(targets, devices, connections)
    }

    #[test]
    fn test_trace_back_finds_the_driving_device() {
        let testbed = wired_testbed();
        let (device, port) = testbed.trace_back_one("adder", "val1").unwrap();
        assert_eq!(device, "gpio");
        assert_eq!(port.signal, "out");
        assert_eq!(port.channel, "ao0");
    }

    #[test]
    fn test_trace_forward_finds_the_observing_device() {
        let testbed = wired_testbed();
        let (device, port) = testbed.trace_forward_one("adder", "sum").unwrap();
        assert_eq!(device, "daq");
        assert_eq!(port.channel, "ai0");
    }

    #[test]
    fn test_unrouted_signal_is_a_resolution_error() {
        let testbed = wired_testbed();
        let err = testbed.trace_back_one("adder", "sum").unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::NoSender { ref device, ref signal }
                if device == "adder" && signal == "sum"
        ));
        assert!(testbed.trace_forward_one("gpio", "missing").is_err());
    }

    #[test]
    fn test_get_signal_reports_unknown_names() {
        let testbed = wired_testbed();
        assert_eq!(
            testbed.get_signal("adder", "sum").unwrap().range.max(),
            200.0
        );
        assert!(matches!(
            testbed.get_signal("boiler", "sum").unwrap_err(),
            ResolutionError::UnknownTarget(_)
        ));
        assert!(matches!(
            testbed.get_signal("adder", "carry").unwrap_err(),
            ResolutionError::UnknownSignal { .. }
        ));
    }

    #[tokio::test]
    async fn test_fan_out_aggregates_in_device_order() {
        let mut testbed = wired_testbed();
        let logbook = testbed.open_all(Duration::from_secs(1)).await;
        assert_eq!(logbook.len(), 3);
        assert!(!logbook.failed());
        let logbook = testbed.close_all(Duration::from_secs(1)).await;
        assert_eq!(logbook.len(), 3);
    }
}
