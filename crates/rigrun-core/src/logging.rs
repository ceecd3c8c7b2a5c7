//! Signal capture across the run.
//!
//! Each logging request is resolved before execution: forward-trace from the
//! declared target to the device that actually sees the signal, then build
//! the electrical→physical transform from that device's port range and the
//! target's signal range. A request that fails to resolve is kept as a
//! failed slot so it surfaces exactly one FAILED entry at `begin` without
//! touching the other requests.

use std::collections::BTreeMap;

use rigrun_proto::{Logbook, LogEntry, LoggingInfo, TimeSeries};
use tokio::time::Duration;
use tracing::debug;

use crate::future::{wait_for_all, OpFuture};
use crate::testbed::Testbed;
use crate::transform::{affine_range_map, AffineMap};

enum Slot {
    /// Resolution failed; the entry is reported once at `begin`.
    Failed(LogEntry),
    Ready(ActiveRequest),
}

struct ActiveRequest {
    info: LoggingInfo,
    device: String,
    channel: String,
    to_physical: AffineMap,
    /// Present once the device accepted the capture at `begin`.
    result: Option<OpFuture<TimeSeries>>,
}

/// All logging requests of one test run.
pub struct LoggingHandler {
    slots: Vec<Slot>,
}

impl LoggingHandler {
    /// Resolves `requests` against the wiring graph.
    ///
    /// Per-request failures become failed slots instead of errors, so one
    /// dead request cannot abort the rest.
    pub fn resolve(requests: &[LoggingInfo], testbed: &Testbed) -> Self {
        let slots = requests
            .iter()
            .map(|info| match Self::resolve_one(info, testbed) {
                Ok(request) => Slot::Ready(request),
                Err(entry) => Slot::Failed(entry),
            })
            .collect();
        Self { slots }
    }

    fn resolve_one(info: &LoggingInfo, testbed: &Testbed) -> Result<ActiveRequest, LogEntry> {
        let failure = |err: &dyn std::fmt::Display| {
            LogEntry::failure(format!("cannot log {}: {err}", info.full_name()))
        };
        let signal = testbed
            .get_signal(&info.target, &info.signal)
            .map_err(|err| failure(&err))?;
        let (device, port) = testbed
            .trace_forward_one(&info.target, &info.signal)
            .map_err(|err| failure(&err))?;
        Ok(ActiveRequest {
            info: info.clone(),
            device,
            channel: port.channel.clone(),
            to_physical: affine_range_map(&port.range, &signal.range),
            result: None,
        })
    }

    /// Starts every capture, waiting on the acceptances up to `timeout`.
    pub async fn begin(&mut self, testbed: &mut Testbed, timeout: Duration) -> Logbook {
        debug!(requests = self.slots.len(), "starting signal logging");
        let mut logbook = Logbook::new();
        let mut accepts = Vec::new();
        for slot in &mut self.slots {
            match slot {
                Slot::Failed(entry) => logbook.push(entry.clone()),
                Slot::Ready(request) => {
                    match loggable_for(testbed, &request.device) {
                        Ok(driver) => {
                            let (accept, result) =
                                driver.log_signal(&request.channel, request.info.period).await;
                            request.result = Some(result);
                            accepts.push(accept);
                        }
                        Err(entry) => logbook.push(entry),
                    }
                }
            }
        }
        logbook.extend(wait_for_all(&accepts, Some(timeout)).await);
        logbook
    }

    /// Ends every accepted capture and assembles the physical-unit traces.
    pub async fn end(&mut self, testbed: &mut Testbed) -> (Logbook, BTreeMap<String, TimeSeries>) {
        debug!("ending signal logging");
        let mut logbook = Logbook::new();
        let mut closes = Vec::new();
        for slot in &mut self.slots {
            let Slot::Ready(request) = slot else { continue };
            if request.result.is_none() {
                continue;
            }
            match loggable_for(testbed, &request.device) {
                Ok(driver) => closes.push(driver.end_log_signal(&request.channel).await),
                Err(entry) => logbook.push(entry),
            }
        }
        logbook.extend(wait_for_all(&closes, None).await);

        let mut results = BTreeMap::new();
        for slot in &self.slots {
            let Slot::Ready(request) = slot else { continue };
            let Some(future) = &request.result else { continue };
            future.wait(None).await;
            if let Some(entry) = future.log() {
                logbook.push(entry);
            }
            if let Some(series) = future.take_result() {
                let series = request
                    .to_physical
                    .apply_series(&series)
                    .with_kind(request.info.kind);
                results.insert(request.info.full_name(), series);
            }
        }
        (logbook, results)
    }
}

fn loggable_for<'a>(
    testbed: &'a mut Testbed,
    device: &str,
) -> Result<&'a mut dyn crate::device::Loggable, LogEntry> {
    let device = testbed
        .find_device_mut(device)
        .map_err(|err| LogEntry::failure(err.to_string()))?;
    device
        .loggable()
        .map_err(|err| LogEntry::failure(err.to_string()))
}
