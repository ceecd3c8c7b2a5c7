//! Log entries and the logbook accumulated during a test run.

use crate::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single entry in the logbook of a test run.
///
/// Entries are produced by device operations, the future controller and the
/// execution loop itself. `what` is a human-readable description; `data` is
/// an optional structured payload (timings, device details).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// What happened, in words.
    pub what: String,
    /// How bad it was.
    pub severity: Severity,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    /// Creates an entry with the given severity.
    pub fn new(severity: Severity, what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            severity,
            data: None,
        }
    }

    /// Creates an `INFO` entry.
    pub fn info(what: impl Into<String>) -> Self {
        Self::new(Severity::Info, what)
    }

    /// Creates a `WARNING` entry.
    pub fn warning(what: impl Into<String>) -> Self {
        Self::new(Severity::Warning, what)
    }

    /// Creates a `FAILED` entry.
    pub fn failure(what: impl Into<String>) -> Self {
        Self::new(Severity::Failed, what)
    }

    /// Creates a `PANIC` entry.
    pub fn panic(what: impl Into<String>) -> Self {
        Self::new(Severity::Panic, what)
    }

    /// Attaches a structured payload, replacing any existing one.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Inserts a key/value pair into the structured payload.
    ///
    /// A missing payload becomes an object; a non-object payload is moved
    /// under the `"detail"` key first so nothing is lost.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        let mut map = match self.data.take() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("detail".to_owned(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        map.insert(key.into(), value);
        self.data = Some(Value::Object(map));
    }

    /// Returns true if this entry marks the run as failed.
    pub fn failed(&self) -> bool {
        self.severity.is_failure()
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.what)
    }
}

/// Ordered collection of [`LogEntry`] values.
///
/// The logbook preserves insertion order; reporting determinism depends on
/// it. Queries never mutate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Logbook {
    entries: Vec<LogEntry>,
}

impl Logbook {
    /// Creates an empty logbook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single entry.
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Appends every entry of `other`, preserving order.
    pub fn extend(&mut self, other: impl IntoIterator<Item = LogEntry>) {
        self.entries.extend(other);
    }

    /// Returns true if any entry has severity `FAILED` or worse.
    pub fn failed(&self) -> bool {
        self.entries.iter().any(LogEntry::failed)
    }

    /// Returns true if any entry has severity `PANIC`.
    pub fn panicked(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Panic)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the logbook holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries as a slice, in insertion order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, LogEntry> {
        self.entries.iter()
    }
}

impl From<Vec<LogEntry>> for Logbook {
    fn from(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<LogEntry> for Logbook {
    fn from_iter<I: IntoIterator<Item = LogEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Logbook {
    type Item = LogEntry;
    type IntoIter = std::vec::IntoIter<LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Logbook {
    type Item = &'a LogEntry;
    type IntoIter = std::slice::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
