//! Drivers that follow a script instead of a bench.
//!
//! Where [`Instrument`](crate::Instrument) models signal flow, the scripted
//! driver models device *behavior*: per operation it can answer with any
//! severity, answer late, or never answer at all. Every call is recorded
//! with a timestamp, which is what lifecycle tests assert against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rigrun_core::{DeviceDriver, DeviceRegistry, OpCompleter, OpFuture, Stimulable};
use rigrun_proto::{LogEntry, Severity};
use tokio::time::{Duration, Instant};

/// How a scripted operation behaves when called.
#[derive(Clone)]
pub enum Behavior {
    /// Resolve immediately with an INFO entry.
    Succeed,
    /// Resolve immediately with this severity and message.
    Reply(Severity, String),
    /// Resolve with the entry once the delay has passed.
    DelayThen(Duration, Severity, String),
    /// Never resolve. The completer is parked so the future stays pending
    /// instead of failing through a drop.
    Hang,
}

/// One recorded driver call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub device: String,
    pub op: String,
    pub at: Instant,
}

struct ScriptState {
    behaviors: HashMap<String, Behavior>,
    calls: Vec<CallRecord>,
    parked: Vec<OpCompleter>,
}

/// Shared script: behaviors by operation name plus the call log.
///
/// Clones share state, so one handle can observe every device built from
/// it.
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl Default for ScriptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                behaviors: HashMap::new(),
                calls: Vec::new(),
                parked: Vec::new(),
            })),
        }
    }

    /// Scripts `op` ("open", "setup", "close", "set_signal") to `behavior`.
    /// Unscripted operations succeed.
    pub fn set(&self, op: &str, behavior: Behavior) {
        self.lock().behaviors.insert(op.to_string(), behavior);
    }

    /// Everything called so far, in call order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Just the operation names, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.op.clone()).collect()
    }

    fn perform(&self, device: &str, op: &str) -> OpFuture {
        let mut state = self.lock();
        state.calls.push(CallRecord {
            device: device.to_string(),
            op: op.to_string(),
            at: Instant::now(),
        });
        let behavior = state.behaviors.get(op).cloned().unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Succeed => {
                OpFuture::ready(LogEntry::info(format!("{op} on {device} done")))
            }
            Behavior::Reply(severity, message) => {
                OpFuture::ready(LogEntry::new(severity, message))
            }
            Behavior::DelayThen(delay, severity, message) => {
                let (completer, future) = OpFuture::channel(format!("{op} on {device}"));
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    completer.complete(LogEntry::new(severity, message));
                });
                future
            }
            Behavior::Hang => {
                let (completer, future) = OpFuture::channel(format!("{op} on {device}"));
                state.parked.push(completer);
                future
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A device driver that answers according to a [`ScriptHandle`].
pub struct ScriptedDriver {
    name: String,
    script: ScriptHandle,
}

impl ScriptedDriver {
    pub fn new(name: impl Into<String>, script: ScriptHandle) -> Self {
        Self { name: name.into(), script }
    }

    /// Registers a factory producing drivers bound to `script` under
    /// `implementation`.
    pub fn register(registry: &mut DeviceRegistry, implementation: &str, script: &ScriptHandle) {
        let script = script.clone();
        registry.register(implementation, move |info| {
            Ok(Box::new(ScriptedDriver::new(&info.name, script.clone())) as Box<dyn DeviceDriver>)
        });
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn open(&mut self) -> OpFuture {
        self.script.perform(&self.name, "open")
    }

    async fn setup(&mut self) -> OpFuture {
        self.script.perform(&self.name, "setup")
    }

    async fn close(&mut self) -> OpFuture {
        self.script.perform(&self.name, "close")
    }

    fn as_stimulable(&mut self) -> Option<&mut dyn Stimulable> {
        Some(self)
    }
}

#[async_trait]
impl Stimulable for ScriptedDriver {
    async fn set_signal(&mut self, _channel: &str, _value: f64) -> OpFuture {
        self.script.perform(&self.name, "set_signal")
    }
}
