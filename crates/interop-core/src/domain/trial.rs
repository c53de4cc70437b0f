//! Test cases, trials and version classification.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::SchemaError;

/// A test case identifier plus its description. The body is opaque to the
/// engine; the client knows how to run it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub description: String,
}

const BUILTIN_CASES: &[(&str, &str)] = &[
    ("setup-only", "Connect to the relay and complete the session setup exchange"),
    ("announce-only", "Publish a namespace and receive the relay's acknowledgement"),
    (
        "publish-namespace-done",
        "Publish a namespace, then withdraw it with PUBLISH_NAMESPACE_DONE",
    ),
    (
        "subscribe-error",
        "Subscribe to a track nobody publishes and expect a subscribe error",
    ),
    (
        "announce-subscribe",
        "One session publishes a namespace, a second session subscribes to it",
    ),
    (
        "subscribe-before-announce",
        "Subscribe first, then publish the namespace the subscription targets",
    ),
];

impl TestCase {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }

    /// The standard catalogue, in declaration order.
    pub fn builtin() -> Vec<TestCase> {
        BUILTIN_CASES
            .iter()
            .map(|(id, description)| TestCase::new(*id, *description))
            .collect()
    }

    /// Resolve `ids` against the built-in catalogue, keeping catalogue order.
    ///
    /// An empty selection returns the whole catalogue.
    pub fn select(ids: &[String]) -> std::result::Result<Vec<TestCase>, SchemaError> {
        let catalogue = Self::builtin();
        if ids.is_empty() {
            return Ok(catalogue);
        }
        if let Some(unknown) = ids.iter().find(|id| !catalogue.iter().any(|c| &c.id == *id)) {
            return Err(SchemaError::UnknownTestCase(unknown.clone()));
        }
        Ok(catalogue
            .into_iter()
            .filter(|c| ids.contains(&c.id))
            .collect())
    }
}

/// How a relay's and a client's declared versions relate to the run target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionClassification {
    /// Both sides support the current target.
    MatchedCurrent,
    /// They share a tag, but not the current target.
    MatchedLegacy,
    /// No common tag at all.
    Mismatched,
}

impl VersionClassification {
    /// Compare two version sets against `current_target`.
    ///
    /// Returns the classification and the sorted common tags.
    pub fn compare(
        relay: &BTreeSet<String>,
        client: &BTreeSet<String>,
        current_target: &str,
    ) -> (Self, Vec<String>) {
        let common: Vec<String> = relay.intersection(client).cloned().collect();
        let classification = if common.is_empty() {
            VersionClassification::Mismatched
        } else if common.iter().any(|v| v == current_target) {
            VersionClassification::MatchedCurrent
        } else {
            VersionClassification::MatchedLegacy
        };
        (classification, common)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionClassification::MatchedCurrent => "matched-current",
            VersionClassification::MatchedLegacy => "matched-legacy",
            VersionClassification::Mismatched => "mismatched",
        }
    }
}

impl fmt::Display for VersionClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (relay, client, test case) execution unit.
///
/// The classification is computed once, at pairing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    /// Position in pairing order; the matrix sorts by it.
    pub sequence: usize,
    pub relay: String,
    pub client: String,
    pub test_case: TestCase,
    pub classification: VersionClassification,
    pub common_versions: Vec<String>,
}

impl Trial {
    /// Short `relay/client/case` label for logs.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.relay, self.client, self.test_case.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_matched_current() {
        let (class, common) = VersionClassification::compare(
            &set(&["draft-14", "draft-13"]),
            &set(&["draft-14"]),
            "draft-14",
        );
        assert_eq!(class, VersionClassification::MatchedCurrent);
        assert_eq!(common, vec!["draft-14".to_string()]);
    }

    #[test]
    fn test_matched_legacy_when_only_one_side_has_current() {
        let (class, common) = VersionClassification::compare(
            &set(&["draft-14", "draft-13"]),
            &set(&["draft-13"]),
            "draft-14",
        );
        assert_eq!(class, VersionClassification::MatchedLegacy);
        assert_eq!(common, vec!["draft-13".to_string()]);
    }

    #[test]
    fn test_mismatched() {
        let (class, common) =
            VersionClassification::compare(&set(&["draft-14"]), &set(&["draft-12"]), "draft-14");
        assert_eq!(class, VersionClassification::Mismatched);
        assert!(common.is_empty());
    }

    #[test]
    fn test_classification_serializes_kebab_case() {
        let json = serde_json::to_string(&VersionClassification::MatchedCurrent).expect("serialize");
        assert_eq!(json, "\"matched-current\"");
        assert_eq!(VersionClassification::Mismatched.to_string(), "mismatched");
    }

    #[test]
    fn test_builtin_catalogue_order() {
        let ids: Vec<_> = TestCase::builtin().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.first().map(String::as_str), Some("setup-only"));
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_select_keeps_catalogue_order() {
        let selected = TestCase::select(&[
            "subscribe-error".to_string(),
            "setup-only".to_string(),
        ])
        .expect("known cases");
        let ids: Vec<_> = selected.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["setup-only", "subscribe-error"]);
    }

    #[test]
    fn test_select_rejects_unknown_case() {
        let err = TestCase::select(&["no-such-case".to_string()]).unwrap_err();
        assert!(err.to_string().contains("no-such-case"));
    }
}
