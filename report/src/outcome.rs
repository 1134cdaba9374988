use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a test's runner terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitClassification {
    /// Normal exit with the given status code
    Exited(i32),
    /// Killed by a signal
    Signaled { number: i32, name: String },
    /// Neither exited nor signaled
    Unknown,
}

impl ExitClassification {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitClassification::Exited(0))
    }

    /// Numeric status for reporting: the exit code, or the signal number for
    /// signal deaths. `None` when the status is unknown.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitClassification::Exited(code) => Some(*code),
            ExitClassification::Signaled { number, .. } => Some(*number),
            ExitClassification::Unknown => None,
        }
    }
}

impl fmt::Display for ExitClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitClassification::Exited(code) => write!(f, "exited with code: {}", code),
            ExitClassification::Signaled { number, name } => {
                write!(f, "exited from signal {} ({})", name, number)
            }
            ExitClassification::Unknown => write!(f, "exited with unknown status"),
        }
    }
}

/// Outcome of one ptest execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit: ExitClassification,
    /// Wall-clock time between spawn and reap
    pub duration: Duration,
    /// The runner was killed for producing no output within the timeout
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn new(exit: ExitClassification, duration: Duration, timed_out: bool) -> Self {
        Self {
            exit,
            duration,
            timed_out,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.timed_out || !self.exit.is_success()
    }

    /// Duration truncated to whole seconds, as reported.
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_display() {
        assert_eq!(
            ExitClassification::Exited(3).to_string(),
            "exited with code: 3"
        );
        let killed = ExitClassification::Signaled {
            number: 9,
            name: "SIGKILL".to_string(),
        };
        assert_eq!(killed.to_string(), "exited from signal SIGKILL (9)");
        assert_eq!(killed.code(), Some(9));
        assert_eq!(ExitClassification::Unknown.code(), None);
    }

    #[test]
    fn test_failure_rules() {
        let ok = ExecutionResult::new(ExitClassification::Exited(0), Duration::from_secs(1), false);
        assert!(!ok.is_failure());

        let failed = ExecutionResult::new(ExitClassification::Exited(1), Duration::ZERO, false);
        assert!(failed.is_failure());

        let timed_out = ExecutionResult::new(ExitClassification::Exited(0), Duration::ZERO, true);
        assert!(timed_out.is_failure());

        assert!(ExecutionResult::new(ExitClassification::Unknown, Duration::ZERO, false).is_failure());
    }

    #[test]
    fn test_duration_secs_truncates() {
        let result = ExecutionResult::new(
            ExitClassification::Exited(0),
            Duration::from_millis(2_999),
            false,
        );
        assert_eq!(result.duration_secs(), 2);
    }
}
