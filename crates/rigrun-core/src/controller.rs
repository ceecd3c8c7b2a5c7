//! Completion tracking for fire-and-forget command futures.
//!
//! The main loop issues commands and moves on; the controller owns the
//! resulting futures and is swept once per heartbeat tick. A sweep never
//! blocks: done futures give up their entries, futures past their deadline
//! are reported as PANIC timeouts, everything else stays for the next tick.

use rigrun_proto::{Logbook, LogEntry};
use serde_json::json;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::future::{DeadlineFuture, OpFuture};

struct TrackedFuture {
    future: DeadlineFuture,
    submitted_at: f64,
}

/// Owns outstanding command futures between scheduler ticks.
pub struct FutureController {
    origin: Instant,
    pending: Vec<TrackedFuture>,
}

impl FutureController {
    /// `origin` is the test's start instant; sweep annotations report times
    /// relative to it.
    pub fn new(origin: Instant) -> Self {
        Self { origin, pending: Vec::new() }
    }

    /// Takes ownership of `future`, giving it `timeout` to complete.
    pub fn put(&mut self, future: OpFuture, timeout: Duration) {
        self.pending.push(TrackedFuture {
            future: DeadlineFuture::after(future, timeout),
            submitted_at: self.origin.elapsed().as_secs_f64(),
        });
    }

    /// Number of futures still being tracked.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Non-blocking sweep over the tracked futures.
    ///
    /// Completed futures are moved out with their entries; timed-out ones
    /// are reported as PANIC and dropped, even if they complete later. Each
    /// future produces exactly one entry across all sweeps.
    pub async fn run(&mut self) -> Logbook {
        let mut logbook = Logbook::new();
        let mut retained = Vec::with_capacity(self.pending.len());
        let now = self.origin.elapsed().as_secs_f64();
        for tracked in self.pending.drain(..) {
            if tracked.future.done() {
                let mut entry = tracked.future.log();
                annotate_times(&mut entry, tracked.submitted_at, Some(now));
                logbook.push(entry);
            } else if tracked.future.timed_out() {
                warn!(what = tracked.future.what(), "command future timed out");
                tracked.future.force_wait().await;
                let mut entry = tracked.future.timeout_entry();
                annotate_times(&mut entry, tracked.submitted_at, None);
                logbook.push(entry);
            } else {
                retained.push(tracked);
            }
        }
        self.pending = retained;
        logbook
    }

    /// Drops whatever is still in flight, one WARNING entry each.
    ///
    /// Called once after the main loop so a device that never answers cannot
    /// keep the run from finishing.
    pub fn abandon(&mut self) -> Logbook {
        let mut logbook = Logbook::new();
        for tracked in self.pending.drain(..) {
            debug!(what = tracked.future.what(), "abandoning in-flight future");
            let mut entry = LogEntry::warning(format!(
                "still in flight at end of test: {}",
                tracked.future.what()
            ));
            annotate_times(&mut entry, tracked.submitted_at, None);
            logbook.push(entry);
        }
        logbook
    }
}

fn annotate_times(entry: &mut LogEntry, submitted_at: f64, completed_at: Option<f64>) {
    entry.annotate("submitted_at", json!(submitted_at));
    if let Some(at) = completed_at {
        entry.annotate("completed_at", json!(at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigrun_proto::Severity;

    #[tokio::test(start_paused = true)]
    async fn test_each_future_reports_exactly_once() {
        let mut controller = FutureController::new(Instant::now());
        controller.put(
            OpFuture::ready(LogEntry::info("relay set")),
            Duration::from_secs(1),
        );
        let (completer, future) = OpFuture::channel("valve set");
        controller.put(future, Duration::from_secs(1));

        let logbook = controller.run().await;
        assert_eq!(logbook.len(), 1);
        assert_eq!(logbook.entries()[0].what, "relay set");
        assert_eq!(controller.outstanding(), 1);

        completer.complete(LogEntry::info("valve set"));
        let logbook = controller.run().await;
        assert_eq!(logbook.len(), 1);
        assert_eq!(logbook.entries()[0].what, "valve set");

        assert!(controller.run().await.is_empty());
        assert_eq!(controller.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_future_synthesizes_panic() {
        let mut controller = FutureController::new(Instant::now());
        let (_completer, future) = OpFuture::channel("write holding register");
        controller.put(future, Duration::from_millis(10));

        assert!(controller.run().await.is_empty());

        tokio::time::sleep(Duration::from_millis(11)).await;
        let logbook = controller.run().await;
        assert_eq!(logbook.len(), 1);
        let entry = &logbook.entries()[0];
        assert_eq!(entry.severity, Severity::Panic);
        assert!(entry.what.contains("write holding register"));
        assert_eq!(controller.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_beats_deadline_when_observed_first() {
        // Timed-out futures are only picked from the not-yet-done remainder,
        // so a completion landing before the sweep keeps its own entry.
        let mut controller = FutureController::new(Instant::now());
        let (completer, future) = OpFuture::channel("slow handshake");
        controller.put(future, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(20)).await;
        completer.complete(LogEntry::info("handshake done"));

        let logbook = controller.run().await;
        assert_eq!(logbook.len(), 1);
        assert_eq!(logbook.entries()[0].severity, Severity::Info);
        assert_eq!(logbook.entries()[0].what, "handshake done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_warns_for_in_flight_futures() {
        let mut controller = FutureController::new(Instant::now());
        let (_completer, future) = OpFuture::channel("query cell voltage");
        controller.put(future, Duration::from_secs(60));

        let logbook = controller.abandon();
        assert_eq!(logbook.len(), 1);
        let entry = &logbook.entries()[0];
        assert_eq!(entry.severity, Severity::Warning);
        assert!(entry.what.contains("query cell voltage"));
        assert_eq!(controller.outstanding(), 0);
    }
}
