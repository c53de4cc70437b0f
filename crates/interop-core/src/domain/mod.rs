//! Domain models for the interop engine.
//!
//! - `Registry` / `Implementation`: the validated catalogue
//! - `TestCase` / `Trial`: what gets executed
//! - `RawResult`: what the runner observed

pub mod error;
pub mod raw;
pub mod registry;
pub mod trial;

pub use error::{InteropError, ParseError, Result, SchemaError};
pub use raw::{RawResult, RawStatus, EXIT_FAIL, EXIT_PASS, EXIT_UNSUPPORTED};
pub use registry::{
    is_valid_identifier, DockerImage, EndpointDescriptor, Implementation, Registry, RemoteEndpoint,
    Role, RoleEndpoints, TransportKind,
};
pub use trial::{TestCase, Trial, VersionClassification};
