//! Completion handles for asynchronous device operations.
//!
//! Every device interaction hands the engine an [`OpFuture`]: a handle that
//! can be polled without blocking (`done`), waited on with a bound (`wait`),
//! and, once complete, asked for its [`LogEntry`] and result. The device side
//! holds the paired [`OpCompleter`] and resolves it exactly once.
//!
//! [`DeadlineFuture`] adds the controller's view: an absolute deadline after
//! which a still-pending operation counts as timed out and is reported with
//! a PANIC entry, since a hung hardware interaction leaves the rig in a
//! state the rest of the test cannot trust.

use rigrun_proto::{LogEntry, Logbook};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct SharedState<T> {
    log: Option<LogEntry>,
    result: Option<T>,
}

struct Shared<T> {
    what: String,
    done: AtomicBool,
    state: Mutex<SharedState<T>>,
    notify: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, log: LogEntry, result: Option<T>) {
        {
            let mut state = self.lock();
            state.log = Some(log);
            state.result = result;
        }
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Handle for one in-flight device operation.
///
/// Cheap to query: `done` is a single atomic load. The type parameter is the
/// operation's result; stimulus operations carry `()`, a logging result
/// future carries the raw trace.
pub struct OpFuture<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T> OpFuture<T> {
    /// Creates a completer/handle pair for an operation described by `what`.
    pub fn channel(what: impl Into<String>) -> (OpCompleter<T>, OpFuture<T>) {
        let shared = Arc::new(Shared {
            what: what.into(),
            done: AtomicBool::new(false),
            state: Mutex::new(SharedState {
                log: None,
                result: None,
            }),
            notify: Notify::new(),
        });
        (
            OpCompleter {
                shared: Arc::clone(&shared),
            },
            OpFuture { shared },
        )
    }

    /// An already-complete future, for operations that finish synchronously.
    pub fn ready(log: LogEntry) -> Self {
        Self::ready_inner(log, None)
    }

    /// An already-complete future carrying a result.
    pub fn ready_with(log: LogEntry, result: T) -> Self {
        Self::ready_inner(log, Some(result))
    }

    fn ready_inner(log: LogEntry, result: Option<T>) -> Self {
        let what = log.what.clone();
        let shared = Arc::new(Shared {
            what,
            done: AtomicBool::new(true),
            state: Mutex::new(SharedState {
                log: Some(log),
                result,
            }),
            notify: Notify::new(),
        });
        Self { shared }
    }

    /// Best-effort description of the operation, available while pending.
    pub fn what(&self) -> &str {
        &self.shared.what
    }

    /// Returns true once the operation has completed. Non-blocking.
    pub fn done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Waits for completion.
    ///
    /// With a timeout, returns false iff the timeout elapsed first. A zero
    /// timeout degenerates to a poll that still gives the operation one
    /// chance to be observed complete.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                self.wait_done().await;
                true
            }
            Some(limit) => tokio::time::timeout(limit, self.wait_done())
                .await
                .is_ok(),
        }
    }

    async fn wait_done(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion racing with us
            // cannot be missed.
            notified.as_mut().enable();
            if self.done() {
                return;
            }
            notified.await;
        }
    }

    /// The operation's log entry, once done.
    pub fn log(&self) -> Option<LogEntry> {
        if !self.done() {
            return None;
        }
        self.shared.lock().log.clone()
    }

    /// Takes the result out of the future. `Some` exactly once, and only
    /// after completion.
    pub fn take_result(&self) -> Option<T> {
        if !self.done() {
            return None;
        }
        self.shared.lock().result.take()
    }
}

/// Device-side end of an [`OpFuture`]. Resolves the handle exactly once.
///
/// Dropping a completer without resolving it fails the operation instead of
/// leaving the handle pending forever; unbounded waits elsewhere in the
/// engine rely on that.
pub struct OpCompleter<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T> OpCompleter<T> {
    /// Description of the operation this completer resolves.
    pub fn what(&self) -> &str {
        &self.shared.what
    }

    /// Resolves the handle with a log entry and no result.
    pub fn complete(self, log: LogEntry) {
        self.shared.finish(log, None);
    }

    /// Resolves the handle with a log entry and a result value.
    pub fn complete_with(self, log: LogEntry, result: T) {
        self.shared.finish(log, Some(result));
    }
}

impl<T> Drop for OpCompleter<T> {
    fn drop(&mut self) {
        if !self.shared.done.load(Ordering::Acquire) {
            self.shared.finish(
                LogEntry::failure(format!(
                    "operation abandoned by its device: {}",
                    self.shared.what
                )),
                None,
            );
        }
    }
}

pub(crate) fn timeout_entry(what: &str) -> LogEntry {
    LogEntry::panic(format!("timed out waiting for: {what}"))
}

/// An [`OpFuture`] paired with an absolute deadline.
pub struct DeadlineFuture<T = ()> {
    inner: OpFuture<T>,
    deadline: Instant,
}

impl<T> DeadlineFuture<T> {
    /// Wraps `inner` with an explicit deadline.
    pub fn new(inner: OpFuture<T>, deadline: Instant) -> Self {
        Self { inner, deadline }
    }

    /// Wraps `inner` with a deadline `timeout` from now.
    pub fn after(inner: OpFuture<T>, timeout: Duration) -> Self {
        Self::new(inner, Instant::now() + timeout)
    }

    pub fn what(&self) -> &str {
        self.inner.what()
    }

    pub fn done(&self) -> bool {
        self.inner.done()
    }

    /// True once the deadline has passed while the operation is still
    /// pending.
    pub fn timed_out(&self) -> bool {
        !self.inner.done() && Instant::now() >= self.deadline
    }

    /// Gives the inner future one non-blocking chance to flush side effects
    /// an implementation may only perform on `wait`. Called on the timeout
    /// path before the PANIC entry is synthesized.
    pub async fn force_wait(&self) {
        let _ = self.inner.wait(Some(Duration::ZERO)).await;
    }

    /// The inner entry when done; a synthesized timeout entry otherwise.
    pub fn log(&self) -> LogEntry {
        match self.inner.log() {
            Some(entry) => entry,
            None => self.timeout_entry(),
        }
    }

    /// The PANIC entry reported when this future times out.
    pub fn timeout_entry(&self) -> LogEntry {
        timeout_entry(self.inner.what())
    }
}

/// Waits for every future against one shared deadline, collecting logs in
/// input order.
///
/// Only futures actually still pending when the deadline passes get the
/// synthesized PANIC timeout entry; the others keep their own entries even
/// when a sibling timed out. `None` waits without bound.
pub async fn wait_for_all<T>(futures: &[OpFuture<T>], timeout: Option<Duration>) -> Logbook {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut logbook = Logbook::new();
    for future in futures {
        let finished = match deadline {
            None => future.wait(None).await,
            Some(until) => {
                let remaining = until.saturating_duration_since(Instant::now());
                future.wait(Some(remaining)).await
            }
        };
        let entry = if finished {
            future
                .log()
                .unwrap_or_else(|| LogEntry::failure(format!("no log recorded for: {}", future.what())))
        } else {
            timeout_entry(future.what())
        };
        logbook.push(entry);
    }
    logbook
}
