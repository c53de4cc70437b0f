//! Raw execution signal produced by the trial runner.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the client process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RawStatus {
    /// The process exited on its own; see `exit_code`.
    Exited,
    /// Killed after exceeding the trial timeout.
    Timeout,
    /// Killed because the run was cancelled.
    Cancelled,
    /// The process never started.
    SpawnFailed,
}

/// Exit code: every assertion passed.
pub const EXIT_PASS: i32 = 0;
/// Exit code: at least one assertion failed.
pub const EXIT_FAIL: i32 = 1;
/// Exit code: the client does not implement the requested test case.
pub const EXIT_UNSUPPORTED: i32 = 127;

/// Result of executing one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResult {
    pub status: RawStatus,

    /// Present only when `status` is `Exited` and the OS reported a code.
    pub exit_code: Option<i32>,

    #[serde(with = "duration_ms", rename = "elapsed_ms")]
    pub elapsed: Duration,

    /// Combined stdout/stderr, bounded by the run's output limit.
    pub captured_output: String,

    /// Set when output exceeded the limit and was cut.
    pub truncated: bool,

    /// Spawn failure or cancellation detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawResult {
    pub fn exited(exit_code: Option<i32>, elapsed: Duration, output: String, truncated: bool) -> Self {
        Self {
            status: RawStatus::Exited,
            exit_code,
            elapsed,
            captured_output: output,
            truncated,
            error: None,
        }
    }

    pub fn timed_out(elapsed: Duration, output: String, truncated: bool) -> Self {
        Self {
            status: RawStatus::Timeout,
            exit_code: None,
            elapsed,
            captured_output: output,
            truncated,
            error: None,
        }
    }

    pub fn cancelled(elapsed: Duration, output: String, truncated: bool, reason: impl Into<String>) -> Self {
        Self {
            status: RawStatus::Cancelled,
            exit_code: None,
            elapsed,
            captured_output: output,
            truncated,
            error: Some(reason.into()),
        }
    }

    pub fn spawn_failed(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            status: RawStatus::SpawnFailed,
            exit_code: None,
            elapsed,
            captured_output: String::new(),
            truncated: false,
            error: Some(error.into()),
        }
    }

    /// Whether the process ran to completion with a reported exit code.
    pub fn has_exit_code(&self, code: i32) -> bool {
        self.status == RawStatus::Exited && self.exit_code == Some(code)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_exit_code_requires_exited_status() {
        let raw = RawResult::exited(Some(0), Duration::from_millis(5), String::new(), false);
        assert!(raw.has_exit_code(EXIT_PASS));
        assert!(!raw.has_exit_code(EXIT_FAIL));

        let timeout = RawResult::timed_out(Duration::from_secs(1), String::new(), false);
        assert!(!timeout.has_exit_code(EXIT_PASS));
    }

    #[test]
    fn test_elapsed_serialized_as_millis() {
        let raw = RawResult::exited(Some(1), Duration::from_millis(1500), "x".to_string(), false);
        let json = serde_json::to_value(&raw).expect("serialize");
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["status"], "exited");
        assert!(json.get("error").is_none());
    }
}
