//! Where a client should connect for a trial.
//!
//! A relay is either a remote endpoint, used as declared, or a local container
//! whose URL is synthesized. Starting and stopping that container is someone
//! else's job; the runner only needs the address.

use std::sync::Arc;

use interop_core::{EndpointDescriptor, Implementation, RemoteEndpoint, Role, TransportKind};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// A relay a client can be pointed at.
pub trait RelayTarget: Send + Sync + std::fmt::Debug {
    /// Value of `RELAY_URL` for the client.
    fn relay_url(&self) -> String;

    /// Value of `TLS_DISABLE_VERIFY` for the client.
    fn tls_disable_verify(&self) -> bool;

    /// `"remote"` or `"local"`, for logs.
    fn kind(&self) -> &'static str;
}

/// A publicly reachable relay.
#[derive(Debug, Clone)]
pub struct RemoteRelay {
    endpoint: RemoteEndpoint,
}

impl RemoteRelay {
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn transport(&self) -> &TransportKind {
        &self.endpoint.transport
    }
}

impl RelayTarget for RemoteRelay {
    fn relay_url(&self) -> String {
        self.endpoint.url.clone()
    }

    fn tls_disable_verify(&self) -> bool {
        self.endpoint.tls_disable_verify
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}

/// A container-backed relay reachable by host name on the run's network.
#[derive(Debug, Clone)]
pub struct LocalRelay {
    pub image: String,
    pub host: String,
    pub port: u16,
}

impl RelayTarget for LocalRelay {
    fn relay_url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }

    fn tls_disable_verify(&self) -> bool {
        // Local relays serve the self-signed certificate mounted into the container.
        true
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// Picks a [`RelayTarget`] for a relay implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResolver {
    /// Port local relays listen on.
    pub port: u16,
    /// Host name for local relays; defaults to the relay's identifier.
    pub local_host: Option<String>,
    /// Use the container even when a remote endpoint exists.
    pub prefer_local: bool,
}

impl RelayResolver {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            local_host: None,
            prefer_local: false,
        }
    }

    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = Some(host.into());
        self
    }

    pub fn prefer_local(mut self, prefer: bool) -> Self {
        self.prefer_local = prefer;
        self
    }

    pub fn resolve(&self, relay: &Implementation) -> RunnerResult<Arc<dyn RelayTarget>> {
        let endpoints = relay.endpoints(Role::Relay);

        let local = endpoints.iter().find_map(|e| match e {
            EndpointDescriptor::Local { image } => Some(image.clone()),
            EndpointDescriptor::Remote(_) => None,
        });
        let remote = endpoints.iter().find_map(|e| match e {
            EndpointDescriptor::Remote(r) => Some(r.clone()),
            EndpointDescriptor::Local { .. } => None,
        });

        let local = local.map(|image| {
            Arc::new(LocalRelay {
                image,
                host: self.local_host.clone().unwrap_or_else(|| relay.id.clone()),
                port: self.port,
            }) as Arc<dyn RelayTarget>
        });
        let remote = remote.map(|r| Arc::new(RemoteRelay::new(r)) as Arc<dyn RelayTarget>);

        let chosen = if self.prefer_local {
            local.or(remote)
        } else {
            remote.or(local)
        };

        chosen.ok_or_else(|| RunnerError::NoRelayEndpoint {
            id: relay.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_core::Registry;

    fn registry() -> Registry {
        Registry::from_json_str(
            r#"{ "implementations": {
                "both": { "draft_versions": ["draft-14"], "roles": { "relay": {
                    "docker": { "image": "both-relay" },
                    "remote": [{ "url": "https://both.example:443/moq", "transport": "webtransport" }]
                } } },
                "local-only": { "draft_versions": ["draft-14"], "roles": { "relay": {
                    "docker": { "image": "local-relay" }
                } } },
                "client-only": { "draft_versions": ["draft-14"], "roles": { "client": {
                    "docker": { "image": "c" }
                } } }
            } }"#,
        )
        .expect("valid registry")
    }

    #[test]
    fn test_remote_preferred_by_default() {
        let registry = registry();
        let target = RelayResolver::new(4443)
            .resolve(registry.get("both").expect("present"))
            .expect("resolvable");
        assert_eq!(target.kind(), "remote");
        assert_eq!(target.relay_url(), "https://both.example:443/moq");
        assert!(!target.tls_disable_verify());
    }

    #[test]
    fn test_unrecognised_transport_passes_through() {
        let relay = RemoteRelay::new(RemoteEndpoint {
            url: "https://relay.example:443".to_string(),
            transport: TransportKind::from("webtransport-h3".to_string()),
            tls_disable_verify: false,
        });
        assert_eq!(relay.transport().as_str(), "webtransport-h3");
        assert_eq!(relay.relay_url(), "https://relay.example:443");
    }

    #[test]
    fn test_prefer_local() {
        let registry = registry();
        let target = RelayResolver::new(4443)
            .prefer_local(true)
            .resolve(registry.get("both").expect("present"))
            .expect("resolvable");
        assert_eq!(target.kind(), "local");
        assert_eq!(target.relay_url(), "https://both:4443");
        assert!(target.tls_disable_verify());
    }

    #[test]
    fn test_local_host_override() {
        let registry = registry();
        let target = RelayResolver::new(9000)
            .with_local_host("relay")
            .resolve(registry.get("local-only").expect("present"))
            .expect("resolvable");
        assert_eq!(target.relay_url(), "https://relay:9000");
    }

    #[test]
    fn test_non_relay_has_no_endpoint() {
        let registry = registry();
        let err = RelayResolver::new(4443)
            .resolve(registry.get("client-only").expect("present"))
            .unwrap_err();
        assert!(matches!(err, RunnerError::NoRelayEndpoint { .. }));
    }
}
