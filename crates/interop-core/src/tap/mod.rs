//! TAP (Test Anything Protocol) output of interop clients.
//!
//! Clients print TAP version 14 on stdout, usually mixed with their own debug
//! logging. The parser is deliberately forgiving: structural problems are
//! recorded as [`Anomaly`] values on the [`ParsedResult`] and only output with
//! no TAP structure at all from a failing client is rejected.

mod parser;

pub use parser::{parse_tap, ParserState, TapParser};

use serde::{Deserialize, Serialize};

/// Outcome of one assertion line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionOutcome {
    Pass,
    Fail,
    Skip,
    Todo,
}

/// Directive attached to an assertion (`# SKIP`, `# TODO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Skip,
    Todo,
}

/// One `ok` / `not ok` line plus everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub number: u32,
    pub ok: bool,
    pub description: String,
    pub outcome: AssertionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<Directive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive_reason: Option<String>,
    /// Lines of the fenced YAML block following the assertion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    /// Non-TAP lines printed after this assertion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

impl Assertion {
    /// Failing assertions exclude `# TODO`.
    pub fn is_failure(&self) -> bool {
        self.outcome == AssertionOutcome::Fail
    }
}

/// Declared plan `start..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub start: u32,
    pub end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl Plan {
    /// Number of assertions the plan announces.
    pub fn expected(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }
}

/// Structural irregularities found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    MissingVersion,
    UnsupportedVersion { version: u32 },
    MisplacedVersion { line: usize },
    MissingPlan,
    DuplicatePlan { line: usize },
    PlanMismatch { declared: u32, observed: u32 },
    OutOfSequence { expected: u32, found: u32 },
    UnterminatedDiagnostic { assertion: u32 },
    BailOut { reason: String },
}

/// Structured view of a client's TAP output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub assertions: Vec<Assertion>,
    /// Non-TAP lines seen before the first assertion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preamble: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bail_out: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<Anomaly>,
}

impl ParsedResult {
    pub fn count(&self, outcome: AssertionOutcome) -> usize {
        self.assertions.iter().filter(|a| a.outcome == outcome).count()
    }

    pub fn failed_count(&self) -> usize {
        self.count(AssertionOutcome::Fail)
    }

    pub fn passed_count(&self) -> usize {
        self.count(AssertionOutcome::Pass)
    }

    /// Any failing assertion, or a bail-out.
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0 || self.bail_out.is_some()
    }

    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().filter(|a| a.is_failure())
    }
}
