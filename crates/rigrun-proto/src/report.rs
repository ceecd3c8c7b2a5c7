//! The final result of a test run.

use crate::{Logbook, TimeSeries};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable record of a completed (or aborted) test run.
///
/// `results` maps fully qualified signal names (`"target.signal"`) to the
/// physical-unit traces the logging subsystem assembled; requests that never
/// reached the end of logging are absent. Whether the run failed derives
/// purely from the logbook, never from escaped errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Wall-clock start of execution.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of execution.
    pub finished_at: DateTime<Utc>,
    /// Everything that happened, in order.
    pub logbook: Logbook,
    /// Captured signal traces by fully qualified name.
    pub results: BTreeMap<String, TimeSeries>,
}

impl Report {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        logbook: Logbook,
        results: BTreeMap<String, TimeSeries>,
    ) -> Self {
        Self {
            started_at,
            finished_at,
            logbook,
            results,
        }
    }

    /// Returns true if any logbook entry has severity `FAILED` or worse.
    pub fn failed(&self) -> bool {
        self.logbook.failed()
    }

    /// The trace logged for `name` (`"target.signal"`), if any.
    pub fn result(&self, name: &str) -> Option<&TimeSeries> {
        self.results.get(name)
    }

    /// Newline-joined descriptions of every failed entry. Empty when the run
    /// passed.
    pub fn what(&self) -> String {
        self.logbook
            .iter()
            .filter(|entry| entry.failed())
            .map(|entry| entry.what.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
