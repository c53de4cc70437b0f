//! Typed view of the implementation catalogue.
//!
//! The registry is a JSON document keyed by implementation identifier. Loading
//! checks three things only: identifier format, a usable endpoint for every
//! declared role, and a non-empty set of protocol versions. Everything else in
//! the document is the registry maintainers' concern.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::SchemaError;

/// Capability an implementation can play in a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Relay,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Relay => write!(f, "relay"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Transport a remote endpoint speaks.
///
/// Unrecognised names load as [`TransportKind::Other`] and are written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportKind {
    WebTransport,
    Quic,
    Other(String),
}

impl TransportKind {
    pub fn as_str(&self) -> &str {
        match self {
            TransportKind::WebTransport => "webtransport",
            TransportKind::Quic => "quic",
            TransportKind::Other(name) => name,
        }
    }
}

impl From<String> for TransportKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "webtransport" | "web-transport" => TransportKind::WebTransport,
            "quic" | "raw-quic" => TransportKind::Quic,
            _ => TransportKind::Other(name),
        }
    }
}

impl From<TransportKind> for String {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A publicly reachable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub url: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub tls_disable_verify: bool,
}

/// A container image that runs the implementation locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    pub image: String,
}

/// Endpoints declared for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEndpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote: Vec<RemoteEndpoint>,
}

impl RoleEndpoints {
    /// Usable descriptors, local container first.
    pub fn descriptors(&self) -> Vec<EndpointDescriptor> {
        let local = self
            .docker
            .iter()
            .filter(|d| !d.image.trim().is_empty())
            .map(|d| EndpointDescriptor::Local {
                image: d.image.clone(),
            });
        let remote = self
            .remote
            .iter()
            .filter(|r| !r.url.trim().is_empty())
            .cloned()
            .map(EndpointDescriptor::Remote);
        local.chain(remote).collect()
    }
}

/// Either a remote endpoint or a local container reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointDescriptor {
    Local { image: String },
    Remote(RemoteEndpoint),
}

/// One entry of the registry after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Implementation {
    pub id: String,
    pub name: String,
    pub draft_versions: BTreeSet<String>,
    pub roles: BTreeMap<Role, RoleEndpoints>,
}

impl Implementation {
    /// Whether the implementation declares `role`.
    pub fn supports(&self, role: Role) -> bool {
        self.roles.contains_key(&role)
    }

    /// Whether `tag` is among the declared protocol versions.
    pub fn supports_version(&self, tag: &str) -> bool {
        self.draft_versions.contains(tag)
    }

    /// Usable endpoint descriptors for `role` (empty if undeclared).
    pub fn endpoints(&self, role: Role) -> Vec<EndpointDescriptor> {
        self.roles
            .get(&role)
            .map(RoleEndpoints::descriptors)
            .unwrap_or_default()
    }

    /// Container image for `role`, if one is declared.
    pub fn docker_image(&self, role: Role) -> Option<&str> {
        self.roles
            .get(&role)
            .and_then(|r| r.docker.as_ref())
            .map(|d| d.image.as_str())
            .filter(|image| !image.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    current_target: Option<String>,
    implementations: BTreeMap<String, ImplementationEntry>,
}

#[derive(Debug, Deserialize)]
struct ImplementationEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    draft_versions: Vec<String>,
    #[serde(default)]
    roles: RoleTable,
}

#[derive(Debug, Default, Deserialize)]
struct RoleTable {
    #[serde(default)]
    relay: Option<RoleEndpoints>,
    #[serde(default)]
    client: Option<RoleEndpoints>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Validated implementation catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registry {
    current_target: Option<String>,
    implementations: BTreeMap<String, Implementation>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("static pattern"))
}

/// Whether `id` follows the registry key format.
pub fn is_valid_identifier(id: &str) -> bool {
    identifier_pattern().is_match(id)
}

impl Registry {
    /// Load and validate a registry file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a registry document held in memory.
    pub fn from_json_str(raw: &str) -> std::result::Result<Self, SchemaError> {
        let doc: RegistryDocument = serde_json::from_str(raw)?;
        Self::from_document(doc)
    }

    fn from_document(doc: RegistryDocument) -> std::result::Result<Self, SchemaError> {
        let mut implementations = BTreeMap::new();

        for (id, entry) in doc.implementations {
            if !is_valid_identifier(&id) {
                return Err(SchemaError::InvalidIdentifier { id });
            }
            if entry.draft_versions.is_empty() {
                return Err(SchemaError::EmptyVersions { id });
            }
            if entry.draft_versions.iter().any(|v| v.trim().is_empty()) {
                return Err(SchemaError::EmptyVersionTag { id });
            }

            let mut roles = BTreeMap::new();
            let declared = [
                (Role::Relay, entry.roles.relay),
                (Role::Client, entry.roles.client),
            ];
            for (role, endpoints) in declared {
                let Some(endpoints) = endpoints else {
                    continue;
                };
                if endpoints.descriptors().is_empty() {
                    return Err(SchemaError::MissingEndpoint { id, role });
                }
                roles.insert(role, endpoints);
            }

            let implementation = Implementation {
                name: entry.name.unwrap_or_else(|| id.clone()),
                draft_versions: entry.draft_versions.into_iter().collect(),
                roles,
                id: id.clone(),
            };
            implementations.insert(id, implementation);
        }

        Ok(Self {
            current_target: doc.current_target.filter(|t| !t.trim().is_empty()),
            implementations,
        })
    }

    /// Target version declared by the registry itself, if any.
    pub fn current_target(&self) -> Option<&str> {
        self.current_target.as_deref()
    }

    /// Implementations declaring the relay role, sorted by identifier.
    pub fn relays(&self) -> Vec<&Implementation> {
        self.with_role(Role::Relay)
    }

    /// Implementations declaring the client role, sorted by identifier.
    pub fn clients(&self) -> Vec<&Implementation> {
        self.with_role(Role::Client)
    }

    fn with_role(&self, role: Role) -> Vec<&Implementation> {
        // BTreeMap iteration is already identifier-ordered.
        self.implementations
            .values()
            .filter(|i| i.supports(role))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Implementation> {
        self.implementations.get(id)
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Implementation> {
        self.implementations.values()
    }

    /// SHA-256 over the canonical serialization of the validated registry.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing BTreeMaps and plain structs cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "current_target": "draft-14",
        "implementations": {
            "moq-rs": {
                "name": "moq-rs",
                "draft_versions": ["draft-14", "draft-13"],
                "roles": {
                    "relay": {
                        "docker": { "image": "moq-rs-relay:latest" },
                        "remote": [
                            { "url": "https://relay.example.net:4443", "transport": "webtransport" }
                        ]
                    },
                    "client": { "docker": { "image": "moq-rs-client:latest" } }
                }
            },
            "libquicr": {
                "draft_versions": ["draft-14"],
                "roles": {
                    "client": { "docker": { "image": "libquicr-client:latest" } }
                }
            }
        }
    }"#;

    #[test]
    fn test_identifier_format() {
        assert!(is_valid_identifier("moq-rs"));
        assert!(is_valid_identifier("relay2"));
        assert!(!is_valid_identifier("Moq-RS"));
        assert!(!is_valid_identifier("moq_rs"));
        assert!(!is_valid_identifier("-moq"));
        assert!(!is_valid_identifier("moq--rs"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_load_sample_registry() {
        let registry = Registry::from_json_str(SAMPLE).expect("valid registry");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.current_target(), Some("draft-14"));

        let relays: Vec<_> = registry.relays().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(relays, vec!["moq-rs"]);

        let clients: Vec<_> = registry.clients().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(clients, vec!["libquicr", "moq-rs"]);
    }

    #[test]
    fn test_name_defaults_to_identifier() {
        let registry = Registry::from_json_str(SAMPLE).expect("valid registry");
        assert_eq!(registry.get("libquicr").map(|i| i.name.as_str()), Some("libquicr"));
    }

    #[test]
    fn test_endpoints_local_first() {
        let registry = Registry::from_json_str(SAMPLE).expect("valid registry");
        let moq = registry.get("moq-rs").expect("present");
        let endpoints = moq.endpoints(Role::Relay);
        assert_eq!(endpoints.len(), 2);
        assert!(matches!(endpoints[0], EndpointDescriptor::Local { .. }));
        assert!(matches!(endpoints[1], EndpointDescriptor::Remote(_)));
        assert!(moq.endpoints(Role::Client).len() == 1);
    }

    #[test]
    fn test_remote_tls_flag_defaults_false() {
        let registry = Registry::from_json_str(SAMPLE).expect("valid registry");
        let moq = registry.get("moq-rs").expect("present");
        let remote = moq.roles[&Role::Relay].remote[0].clone();
        assert!(!remote.tls_disable_verify);
        assert_eq!(remote.transport, TransportKind::WebTransport);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = Registry::from_json_str(SAMPLE).expect("valid registry");
        let b = Registry::from_json_str(SAMPLE).expect("valid registry");
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_rejects_empty_docker_image() {
        let raw = r#"{ "implementations": { "x": {
            "draft_versions": ["draft-14"],
            "roles": { "relay": { "docker": { "image": "  " } } }
        } } }"#;
        let err = Registry::from_json_str(raw).unwrap_err();
        assert!(matches!(err, SchemaError::MissingEndpoint { role: Role::Relay, .. }));
    }
}
