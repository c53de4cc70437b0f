//! Trial planning.
//!
//! [`PairingEngine::build`] crosses every relay with every client and every
//! test case. Ordering is relay id, then client id, then test case declaration
//! order, so identical inputs always produce identical plans.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::registry::{Implementation, Registry};
use crate::domain::trial::{TestCase, Trial, VersionClassification};

/// Optional scoping of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFilter {
    /// Only these relays (all when `None`).
    pub relays: Option<BTreeSet<String>>,
    /// Only these clients (all when `None`).
    pub clients: Option<BTreeSet<String>>,
    /// Drop pairs that share no protocol version.
    pub exclude_mismatched: bool,
}

impl PairFilter {
    pub fn relay(mut self, id: impl Into<String>) -> Self {
        self.relays.get_or_insert_with(BTreeSet::new).insert(id.into());
        self
    }

    pub fn client(mut self, id: impl Into<String>) -> Self {
        self.clients.get_or_insert_with(BTreeSet::new).insert(id.into());
        self
    }

    pub fn exclude_mismatched(mut self) -> Self {
        self.exclude_mismatched = true;
        self
    }

    /// Whether the (relay, client) pair is in scope.
    pub fn allows(&self, relay: &str, client: &str, classification: VersionClassification) -> bool {
        let relay_ok = self.relays.as_ref().map_or(true, |s| s.contains(relay));
        let client_ok = self.clients.as_ref().map_or(true, |s| s.contains(client));
        let version_ok =
            !(self.exclude_mismatched && classification == VersionClassification::Mismatched);
        relay_ok && client_ok && version_ok
    }
}

/// Produces the ordered trial set for a run.
pub struct PairingEngine;

impl PairingEngine {
    /// Build the trial list.
    ///
    /// Mismatched pairs are kept unless `filter` excludes them: a cross-version
    /// failure is still a signal worth recording.
    pub fn build(
        registry: &Registry,
        test_cases: &[TestCase],
        current_target: &str,
        filter: Option<&PairFilter>,
    ) -> Vec<Trial> {
        let mut trials = Vec::new();

        for relay in registry.relays() {
            for client in registry.clients() {
                let (classification, common_versions) = VersionClassification::compare(
                    &relay.draft_versions,
                    &client.draft_versions,
                    current_target,
                );

                if let Some(filter) = filter {
                    if !filter.allows(&relay.id, &client.id, classification) {
                        debug!(relay = %relay.id, client = %client.id, "pair excluded by filter");
                        continue;
                    }
                }

                for test_case in test_cases {
                    trials.push(Trial {
                        sequence: trials.len(),
                        relay: relay.id.clone(),
                        client: client.id.clone(),
                        test_case: test_case.clone(),
                        classification,
                        common_versions: common_versions.clone(),
                    });
                }
            }
        }

        debug!(count = trials.len(), target = %current_target, "pairing complete");
        trials
    }

    /// Distinct (relay, client) pairs that appear in `trials`, in order.
    pub fn pairs(trials: &[Trial]) -> Vec<(String, String, VersionClassification)> {
        let mut out: Vec<(String, String, VersionClassification)> = Vec::new();
        for trial in trials {
            let seen = out
                .last()
                .is_some_and(|(r, c, _)| r == &trial.relay && c == &trial.client);
            if !seen {
                out.push((trial.relay.clone(), trial.client.clone(), trial.classification));
            }
        }
        out
    }
}

/// Human-facing summary line for an implementation pair.
pub fn describe_pair(relay: &Implementation, client: &Implementation) -> String {
    format!("{} ({}) -> {} ({})", relay.name, relay.id, client.name, client.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_json_str(
            r#"{ "implementations": {
                "relay-b": { "draft_versions": ["draft-14"],
                    "roles": { "relay": { "docker": { "image": "b" } } } },
                "relay-a": { "draft_versions": ["draft-13"],
                    "roles": { "relay": { "docker": { "image": "a" } } } },
                "client-x": { "draft_versions": ["draft-14", "draft-13"],
                    "roles": { "client": { "docker": { "image": "x" } } } }
            } }"#,
        )
        .expect("valid registry")
    }

    #[test]
    fn test_relays_sorted_before_clients() {
        let cases = TestCase::select(&["setup-only".to_string()]).expect("known");
        let trials = PairingEngine::build(&registry(), &cases, "draft-14", None);
        let labels: Vec<_> = trials.iter().map(Trial::label).collect();
        assert_eq!(
            labels,
            vec!["relay-a/client-x/setup-only", "relay-b/client-x/setup-only"]
        );
        assert_eq!(trials[0].classification, VersionClassification::MatchedLegacy);
        assert_eq!(trials[1].classification, VersionClassification::MatchedCurrent);
    }

    #[test]
    fn test_sequence_matches_position() {
        let trials = PairingEngine::build(&registry(), &TestCase::builtin(), "draft-14", None);
        assert_eq!(trials.len(), 12);
        for (i, trial) in trials.iter().enumerate() {
            assert_eq!(trial.sequence, i);
        }
    }

    #[test]
    fn test_filter_scopes_to_one_relay() {
        let filter = PairFilter::default().relay("relay-b");
        let trials =
            PairingEngine::build(&registry(), &TestCase::builtin(), "draft-14", Some(&filter));
        assert!(trials.iter().all(|t| t.relay == "relay-b"));
        assert_eq!(trials.len(), 6);
        assert_eq!(trials[0].sequence, 0);
    }

    #[test]
    fn test_pairs_deduplicates_consecutive_trials() {
        let trials = PairingEngine::build(&registry(), &TestCase::builtin(), "draft-14", None);
        let pairs = PairingEngine::pairs(&trials);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "relay-a");
    }
}
