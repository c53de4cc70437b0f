//! The interop matrix: every outcome of a run, in pairing order.
//!
//! [`MatrixBuilder`] is the only mutable aggregate and must have a single
//! writer. [`MatrixBuilder::finalize`] sorts into pairing order and returns a
//! read-only [`InteropMatrix`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{TrialOutcome, TrialStatus};
use crate::domain::error::{InteropError, Result};
use crate::domain::trial::VersionClassification;

/// Identity of a run, recorded alongside its outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixMeta {
    pub run_id: Uuid,
    pub current_target: String,
    pub registry_digest: String,
    pub started_at: DateTime<Utc>,
}

impl MatrixMeta {
    pub fn new(current_target: impl Into<String>, registry_digest: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            current_target: current_target.into(),
            registry_digest: registry_digest.into(),
            started_at: Utc::now(),
        }
    }
}

/// Accumulates outcomes as trials complete, in any order.
#[derive(Debug)]
pub struct MatrixBuilder {
    meta: MatrixMeta,
    outcomes: Vec<TrialOutcome>,
    seen: BTreeSet<usize>,
}

impl MatrixBuilder {
    pub fn new(meta: MatrixMeta) -> Self {
        Self {
            meta,
            outcomes: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Record one outcome. Each trial may be recorded once.
    pub fn append(&mut self, outcome: TrialOutcome) -> Result<()> {
        let sequence = outcome.sequence();
        if !self.seen.insert(sequence) {
            return Err(InteropError::DuplicateOutcome { sequence });
        }
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn contains(&self, sequence: usize) -> bool {
        self.seen.contains(&sequence)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Sort into pairing order and freeze.
    pub fn finalize(mut self) -> InteropMatrix {
        self.outcomes.sort_by_key(TrialOutcome::sequence);
        InteropMatrix {
            meta: self.meta,
            finished_at: Utc::now(),
            outcomes: self.outcomes,
        }
    }
}

/// Counts per final status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub unsupported: usize,
    pub error: usize,
    pub timeout: usize,
}

impl MatrixSummary {
    fn add(&mut self, status: TrialStatus) {
        self.total += 1;
        match status {
            TrialStatus::Pass => self.pass += 1,
            TrialStatus::Fail => self.fail += 1,
            TrialStatus::Unsupported => self.unsupported += 1,
            TrialStatus::Error => self.error += 1,
            TrialStatus::Timeout => self.timeout += 1,
        }
    }

    /// Whether any trial failed, errored or timed out.
    pub fn has_problems(&self) -> bool {
        self.fail + self.error + self.timeout > 0
    }
}

/// Aggregate of all test cases for one relay/client pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub relay: String,
    pub client: String,
    pub classification: VersionClassification,
    pub summary: MatrixSummary,
}

/// Finalized, read-only set of outcomes for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteropMatrix {
    #[serde(flatten)]
    meta: MatrixMeta,
    finished_at: DateTime<Utc>,
    outcomes: Vec<TrialOutcome>,
}

impl InteropMatrix {
    pub fn meta(&self) -> &MatrixMeta {
        &self.meta
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn outcomes(&self) -> &[TrialOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn summary(&self) -> MatrixSummary {
        let mut summary = MatrixSummary::default();
        for outcome in &self.outcomes {
            summary.add(outcome.status);
        }
        summary
    }

    /// One cell per relay/client pair, ordered by relay then client.
    pub fn cells(&self) -> Vec<MatrixCell> {
        let mut cells: BTreeMap<(String, String), MatrixCell> = BTreeMap::new();
        for outcome in &self.outcomes {
            let trial = &outcome.trial;
            cells
                .entry((trial.relay.clone(), trial.client.clone()))
                .or_insert_with(|| MatrixCell {
                    relay: trial.relay.clone(),
                    client: trial.client.clone(),
                    classification: trial.classification,
                    summary: MatrixSummary::default(),
                })
                .summary
                .add(outcome.status);
        }
        cells.into_values().collect()
    }

    /// Failures between implementations that both support the current target.
    pub fn findings(&self) -> Vec<&TrialOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.trial.classification == VersionClassification::MatchedCurrent)
            .filter(|o| matches!(o.status, TrialStatus::Fail | TrialStatus::Error))
            .collect()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ResultClassifier;
    use crate::domain::raw::RawResult;
    use crate::domain::trial::{TestCase, Trial};
    use std::time::Duration;

    fn outcome(sequence: usize, relay: &str, code: i32) -> TrialOutcome {
        let trial = Trial {
            sequence,
            relay: relay.to_string(),
            client: "client-b".to_string(),
            test_case: TestCase::new("setup-only", "setup"),
            classification: VersionClassification::MatchedCurrent,
            common_versions: vec!["draft-14".to_string()],
        };
        let raw = RawResult::exited(Some(code), Duration::from_millis(1), String::new(), false);
        ResultClassifier::classify(trial, raw, None)
    }

    #[test]
    fn test_finalize_restores_pairing_order() {
        let mut builder = MatrixBuilder::new(MatrixMeta::new("draft-14", "digest"));
        builder.append(outcome(2, "relay-c", 0)).expect("append");
        builder.append(outcome(0, "relay-a", 0)).expect("append");
        builder.append(outcome(1, "relay-b", 1)).expect("append");

        let matrix = builder.finalize();
        let order: Vec<_> = matrix.outcomes().iter().map(|o| o.sequence()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_append_rejected() {
        let mut builder = MatrixBuilder::new(MatrixMeta::new("draft-14", "digest"));
        builder.append(outcome(0, "relay-a", 0)).expect("append");
        let err = builder.append(outcome(0, "relay-a", 1)).unwrap_err();
        assert!(matches!(err, InteropError::DuplicateOutcome { sequence: 0 }));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_summary_and_cells() {
        let mut builder = MatrixBuilder::new(MatrixMeta::new("draft-14", "digest"));
        builder.append(outcome(0, "relay-a", 0)).expect("append");
        builder.append(outcome(1, "relay-a", 1)).expect("append");
        builder.append(outcome(2, "relay-b", 127)).expect("append");
        let matrix = builder.finalize();

        let summary = matrix.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pass, 1);
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.unsupported, 1);
        assert!(summary.has_problems());

        let cells = matrix.cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].relay, "relay-a");
        assert_eq!(cells[0].summary.total, 2);

        assert_eq!(matrix.findings().len(), 1);
    }

    #[test]
    fn test_empty_matrix_is_reportable() {
        let matrix = MatrixBuilder::new(MatrixMeta::new("draft-14", "digest")).finalize();
        assert!(matrix.is_empty());
        assert!(!matrix.summary().has_problems());
        let json = matrix.to_json_pretty().expect("serialize");
        assert!(json.contains("\"outcomes\": []"));
    }
}
