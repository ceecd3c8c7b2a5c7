//! Log severity levels.

use serde::{Deserialize, Serialize};

/// Severity of a [`LogEntry`](crate::LogEntry).
///
/// The ordering is total and increasing: `Info < Warning < Failed < Panic`.
/// Entries at [`Severity::Failed`] or above mark the surrounding test run as
/// failed; a [`Severity::Panic`] entry additionally aborts the remaining test
/// stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Failed,
    Panic,
}

impl Severity {
    /// Returns true if entries of this severity mark a test run as failed.
    pub fn is_failure(self) -> bool {
        self >= Severity::Failed
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Failed => "FAILED",
            Severity::Panic => "PANIC",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_is_totally_ordered() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Failed);
        assert!(Severity::Failed < Severity::Panic);
    }

    #[test]
    fn test_failure_threshold() {
        assert!(!Severity::Info.is_failure());
        assert!(!Severity::Warning.is_failure());
        assert!(Severity::Failed.is_failure());
        assert!(Severity::Panic.is_failure());
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&Severity::Panic).unwrap();
        assert_eq!(json, "\"panic\"");
        let back: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Severity::Panic);
    }
}
