//! Test build and execution.
//!
//! [`Test::build`] turns the declarative descriptions into a runnable test:
//! validation, driver construction, command building and logging resolution
//! all happen here, before any hardware is touched, so unresolvable names
//! fail fast. [`Test::execute`] then drives the run through its states:
//!
//! ```text
//! Created → DevicesOpen → DevicesSetup → LoggingStarted → Running
//!         → LoggingEnded → DevicesClosed
//! ```
//!
//! A PANIC entry at any point short-circuits the remaining stages; closing
//! the devices is the one step that always runs.

use std::collections::BTreeMap;

use chrono::Utc;
use rigrun_proto::{
    InfoError, Logbook, LogEntry, Report, TestbedInfo, TestInfo, TimeSeries,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::command::{CommandError, CommandRegistry, ScheduledCommand};
use crate::config::{ConfigError, ExecutionConfig};
use crate::controller::FutureController;
use crate::device::{DeviceRegistry, RegistryError};
use crate::logging::LoggingHandler;
use crate::testbed::{ResolutionError, Testbed};

/// Errors that keep a test from being built. Nothing here touches hardware.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid description: {0}")]
    Info(#[from] InfoError),

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("device construction failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("unresolvable name in description: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("invalid command: {0}")]
    Command(#[from] CommandError),
}

/// Execution progress of a [`Test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Created,
    DevicesOpen,
    DevicesSetup,
    LoggingStarted,
    Running,
    LoggingEnded,
    DevicesClosed,
}

/// A fully resolved test, ready to run exactly once.
pub struct Test {
    testbed: Testbed,
    schedule: Vec<ScheduledCommand>,
    logging: LoggingHandler,
    config: ExecutionConfig,
    total_duration: f64,
    state: ExecutionState,
}

impl Test {
    /// Builds a runnable test out of its descriptions.
    ///
    /// Validates both descriptions and the config, constructs every driver,
    /// builds every command with its absolute time and resolves the logging
    /// requests. Unknown command targets are build errors; logging requests
    /// that fail to resolve are kept and report FAILED once running, so one
    /// bad request cannot veto the whole run.
    pub fn build(
        test: &TestInfo,
        bed: &TestbedInfo,
        devices: &DeviceRegistry,
        commands: &CommandRegistry,
        config: ExecutionConfig,
    ) -> Result<Self, BuildError> {
        test.validate()?;
        bed.validate()?;
        config.validate()?;

        let testbed = Testbed::from_info(test.targets.clone(), bed, devices)?;

        let mut schedule = Vec::new();
        let mut offset = 0.0;
        for phase in &test.phases {
            for info in &phase.commands {
                testbed.find_device(&info.target)?;
                let time = offset + info.time;
                schedule.push(ScheduledCommand {
                    time,
                    command: commands.build(info, time)?,
                });
            }
            offset += phase.duration;
        }

        let logging = LoggingHandler::resolve(&test.logging, &testbed);

        Ok(Self {
            testbed,
            schedule,
            logging,
            config,
            total_duration: test.total_duration(),
            state: ExecutionState::Created,
        })
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Runs the test to completion and consumes it.
    ///
    /// Never returns an error: whatever happens on the rig ends up as log
    /// entries, and `failed` derives from those alone. Devices are closed on
    /// every path out.
    pub async fn execute(mut self) -> Report {
        let started_at = Utc::now();
        info!(
            duration = self.total_duration,
            commands = self.schedule.len(),
            "starting test execution"
        );

        let mut logbook = Logbook::new();
        let mut results = BTreeMap::new();
        self.run_stages(&mut logbook, &mut results).await;

        logbook.extend(self.testbed.close_all(self.config.close_timeout()).await);
        self.transition(ExecutionState::DevicesClosed);

        info!(failed = logbook.failed(), "test execution finished");
        Report::new(started_at, Utc::now(), logbook, results)
    }

    /// Everything between opening the devices and ending the logging.
    /// Returns early whenever the logbook turns PANIC.
    async fn run_stages(
        &mut self,
        logbook: &mut Logbook,
        results: &mut BTreeMap<String, TimeSeries>,
    ) {
        logbook.extend(self.testbed.open_all(self.config.open_timeout()).await);
        self.transition(ExecutionState::DevicesOpen);
        if logbook.panicked() {
            return;
        }

        logbook.extend(self.testbed.setup_all(self.config.setup_timeout()).await);
        self.transition(ExecutionState::DevicesSetup);
        if logbook.panicked() {
            return;
        }

        logbook.extend(
            self.logging
                .begin(&mut self.testbed, self.config.logging_begin_timeout())
                .await,
        );
        self.transition(ExecutionState::LoggingStarted);
        if logbook.panicked() {
            return;
        }

        self.transition(ExecutionState::Running);
        if self.run_loop(logbook).await {
            return;
        }

        let (end_logbook, captured) = self.logging.end(&mut self.testbed).await;
        logbook.extend(end_logbook);
        *results = captured;
        self.transition(ExecutionState::LoggingEnded);
    }

    /// The heartbeat loop. Returns true if the logbook turned PANIC.
    ///
    /// Commands are issued no earlier than their scheduled time, at most one
    /// heartbeat late; a tick issues everything that has come due, in stable
    /// schedule order, and sweeps the controller for completions.
    async fn run_loop(&mut self, logbook: &mut Logbook) -> bool {
        let origin = Instant::now();
        let mut controller = FutureController::new(origin);
        let mut pending = std::mem::take(&mut self.schedule);
        let timeout = self.config.default_timeout();
        let heartbeat = self.config.heartbeat();

        loop {
            let elapsed = origin.elapsed().as_secs_f64();
            if elapsed >= self.total_duration {
                break;
            }

            let (due, rest): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|s| s.time <= elapsed);
            pending = rest;
            for scheduled in due {
                debug!(
                    time = scheduled.time,
                    elapsed,
                    command = %scheduled.command.describe(),
                    "issuing command"
                );
                let future = scheduled.command.execute(&mut self.testbed).await;
                controller.put(future, timeout);
            }

            let sweep = controller.run().await;
            let panicked = sweep.panicked();
            logbook.extend(sweep);
            if panicked {
                return true;
            }

            tokio::time::sleep(heartbeat).await;
        }

        // Out of loop time: one last sweep, then give up on stragglers.
        logbook.extend(controller.run().await);
        logbook.extend(controller.abandon());
        for scheduled in &pending {
            logbook.push(LogEntry::warning(format!(
                "command '{}' scheduled at {}s was never issued before the test ended",
                scheduled.command.describe(),
                scheduled.time
            )));
        }
        logbook.panicked()
    }

    fn transition(&mut self, next: ExecutionState) {
        debug!(from = ?self.state, to = ?next, "execution state change");
        self.state = next;
    }
}

impl std::fmt::Debug for Test {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Test")
            .field("schedule", &self.schedule.len())
            .field("total_duration", &self.total_duration)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
