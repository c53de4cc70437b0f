//! Registry loading and schema validation.

use interop_core::domain::registry::{EndpointDescriptor, TransportKind};
use interop_core::{Registry, Role, SchemaError};

fn load(raw: &str) -> Result<Registry, SchemaError> {
    Registry::from_json_str(raw)
}

/// Test: loading from a file on disk
#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("implementations.json");
    std::fs::write(
        &path,
        r#"{ "implementations": { "relay-a": {
            "name": "Relay A",
            "draft_versions": ["draft-16"],
            "roles": { "relay": { "remote": [
                { "url": "https://relay-a.example:4443", "transport": "quic", "tls_disable_verify": true }
            ] } }
        } } }"#,
    )
    .expect("write registry");

    let registry = Registry::load(&path).expect("load failed");
    let relay = registry.get("relay-a").expect("relay present");
    assert_eq!(relay.name, "Relay A");
    assert!(relay.supports(Role::Relay));
    assert!(!relay.supports(Role::Client));
    match &relay.endpoints(Role::Relay)[0] {
        EndpointDescriptor::Remote(remote) => assert!(remote.tls_disable_verify),
        other => panic!("expected remote endpoint, got {other:?}"),
    }
}

/// Test: unreadable file reports the path
#[test]
fn test_missing_file() {
    let err = Registry::load("/nonexistent/implementations.json").unwrap_err();
    assert!(matches!(err, SchemaError::Unreadable { .. }));
    assert!(err.to_string().contains("/nonexistent/implementations.json"));
}

/// Test: identifier format is enforced
#[test]
fn test_invalid_identifier() {
    let err = load(
        r#"{ "implementations": { "Moq_RS": { "draft_versions": ["draft-14"],
            "roles": { "client": { "docker": { "image": "x" } } } } } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidIdentifier { ref id } if id == "Moq_RS"));
}

/// Test: a declared role needs an endpoint
#[test]
fn test_role_without_endpoint() {
    let err = load(
        r#"{ "implementations": { "moq-rs": { "draft_versions": ["draft-14"],
            "roles": { "client": {} } } } }"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        SchemaError::MissingEndpoint {
            role: Role::Client,
            ..
        }
    ));
}

/// Test: remote list with only blank URLs is not usable
#[test]
fn test_role_with_blank_remote() {
    let err = load(
        r#"{ "implementations": { "moq-rs": { "draft_versions": ["draft-14"],
            "roles": { "relay": { "remote": [{ "url": "", "transport": "webtransport" }] } } } } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::MissingEndpoint { .. }));
}

/// Test: transports the engine does not know still load
#[test]
fn test_unknown_transport_loads() {
    let registry = load(
        r#"{ "implementations": { "moq-rs": { "draft_versions": ["draft-14"],
            "roles": { "relay": { "remote": [
                { "url": "https://relay.example:443", "transport": "webtransport-h3" },
                { "url": "https://relay.example:4443", "transport": "raw-quic" }
            ] } } } } }"#,
    )
    .expect("unknown transport accepted");
    let remote = &registry.get("moq-rs").expect("present").roles[&Role::Relay].remote;
    assert_eq!(
        remote[0].transport,
        TransportKind::Other("webtransport-h3".to_string())
    );
    assert_eq!(remote[1].transport, TransportKind::Quic);

    let written = serde_json::to_value(&remote[0]).expect("serialize");
    assert_eq!(written["transport"], "webtransport-h3");
}

/// Test: empty version set is rejected
#[test]
fn test_empty_versions() {
    let err = load(
        r#"{ "implementations": { "moq-rs": { "draft_versions": [],
            "roles": { "client": { "docker": { "image": "x" } } } } } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::EmptyVersions { ref id } if id == "moq-rs"));
}

/// Test: malformed JSON surfaces as a schema error
#[test]
fn test_malformed_json() {
    let err = load("{ not json").unwrap_err();
    assert!(matches!(err, SchemaError::Malformed(_)));
}

/// Test: unknown fields are ignored, duplicate versions collapse
#[test]
fn test_extra_fields_and_duplicate_versions() {
    let registry = load(
        r#"{ "$schema": "./schema.json", "implementations": { "moq-rs": {
            "url": "https://github.com/kixelated/moq",
            "draft_versions": ["draft-14", "draft-14"],
            "roles": { "client": { "docker": { "image": "x" } } } } } }"#,
    )
    .expect("valid registry");
    let moq = registry.get("moq-rs").expect("present");
    assert_eq!(moq.draft_versions.len(), 1);
    assert!(moq.supports_version("draft-14"));
    assert_eq!(registry.current_target(), None);
}

/// Test: an implementation without any roles is kept but never paired
#[test]
fn test_roleless_implementation() {
    let registry = load(
        r#"{ "implementations": { "idle": { "draft_versions": ["draft-14"] } } }"#,
    )
    .expect("valid registry");
    assert_eq!(registry.len(), 1);
    assert!(registry.relays().is_empty());
    assert!(registry.clients().is_empty());
}
