//! Folding raw signals into a final trial status.
//!
//! Priority, highest first:
//!
//! 1. `timeout`: the runner killed the client after the deadline
//! 2. `error`: cancelled, spawn failure, or an exit code outside {0, 1, 127}
//! 3. `unsupported`: exit 127, whatever stdout contains
//! 4. `error`: the TAP body was needed for the verdict but could not be parsed
//! 5. `fail`: exit 1, or exit 0 with a failing assertion
//! 6. `pass`
//!
//! The version classification never changes the status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ParseError;
use crate::domain::raw::{RawResult, RawStatus, EXIT_FAIL, EXIT_PASS, EXIT_UNSUPPORTED};
use crate::domain::trial::Trial;
use crate::tap::ParsedResult;

/// Final verdict for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Pass,
    Fail,
    Unsupported,
    Error,
    Timeout,
}

impl TrialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialStatus::Pass => "pass",
            TrialStatus::Fail => "fail",
            TrialStatus::Unsupported => "unsupported",
            TrialStatus::Error => "error",
            TrialStatus::Timeout => "timeout",
        }
    }

    /// Whether this status should fail a CI gate.
    pub fn is_problem(&self) -> bool {
        matches!(self, TrialStatus::Fail | TrialStatus::Error | TrialStatus::Timeout)
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one executed trial. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial: Trial,
    pub status: TrialStatus,
    /// What the runner observed, before classification.
    pub raw: RawResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    /// Why the status is not `pass`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TrialOutcome {
    pub fn sequence(&self) -> usize {
        self.trial.sequence
    }
}

/// Builds [`TrialOutcome`] values.
pub struct ResultClassifier;

impl ResultClassifier {
    /// Classify a trial from the runner's signal and the parser's verdict.
    ///
    /// `parsed` is `None` when parsing was not attempted.
    pub fn classify(
        trial: Trial,
        raw: RawResult,
        parsed: Option<Result<ParsedResult, ParseError>>,
    ) -> TrialOutcome {
        let (parsed, parse_error) = match parsed {
            Some(Ok(result)) => (Some(result), None),
            Some(Err(err)) => (None, Some(err.to_string())),
            None => (None, None),
        };

        let (status, reason) = Self::derive(&raw, parsed.as_ref(), parse_error.as_deref());

        TrialOutcome {
            trial,
            status,
            raw,
            parsed,
            parse_error,
            reason,
        }
    }

    fn derive(
        raw: &RawResult,
        parsed: Option<&ParsedResult>,
        parse_error: Option<&str>,
    ) -> (TrialStatus, Option<String>) {
        match raw.status {
            RawStatus::Timeout => {
                return (
                    TrialStatus::Timeout,
                    Some(format!("client exceeded {} ms", raw.elapsed.as_millis())),
                )
            }
            RawStatus::Cancelled => {
                let detail = raw.error.as_deref().unwrap_or("run interrupted");
                return (TrialStatus::Error, Some(format!("cancelled: {detail}")));
            }
            RawStatus::SpawnFailed => {
                let detail = raw.error.as_deref().unwrap_or("unknown error");
                return (TrialStatus::Error, Some(format!("spawn failed: {detail}")));
            }
            RawStatus::Exited => {}
        }

        let code = match raw.exit_code {
            Some(code) => code,
            None => {
                return (
                    TrialStatus::Error,
                    Some("client terminated by signal".to_string()),
                )
            }
        };

        match code {
            EXIT_UNSUPPORTED => (
                TrialStatus::Unsupported,
                Some("test case not supported by client".to_string()),
            ),
            EXIT_PASS | EXIT_FAIL => {
                if let Some(err) = parse_error {
                    return (TrialStatus::Error, Some(err.to_string()));
                }
                if code == EXIT_FAIL {
                    return (TrialStatus::Fail, Some(failure_reason(parsed)));
                }
                match parsed {
                    Some(result) if result.has_failures() => (
                        TrialStatus::Fail,
                        Some(format!("exit 0 but {}", failure_reason(Some(result)))),
                    ),
                    _ => (TrialStatus::Pass, None),
                }
            }
            other => (
                TrialStatus::Error,
                Some(format!("exit code {other} violates client contract")),
            ),
        }
    }
}

fn failure_reason(parsed: Option<&ParsedResult>) -> String {
    let Some(result) = parsed else {
        return "client reported failure".to_string();
    };
    if let Some(reason) = &result.bail_out {
        return format!("bailed out: {reason}");
    }
    let failed: Vec<String> = result
        .failures()
        .map(|a| format!("#{} {}", a.number, a.description))
        .collect();
    if failed.is_empty() {
        "client reported failure".to_string()
    } else {
        format!("failed assertions: {}", failed.join(", "))
    }
}
