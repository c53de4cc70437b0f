//! Interop Core
//!
//! The orchestration-and-classification engine for MoQ interoperability runs:
//! registry model, trial pairing, TAP parsing, result classification and the
//! interop matrix. Process execution lives in `interop-runner`.

pub mod classify;
pub mod config;
pub mod domain;
pub mod matrix;
pub mod pairing;
pub mod tap;
pub mod telemetry;

pub use classify::{ResultClassifier, TrialOutcome, TrialStatus};
pub use config::RunConfig;
pub use domain::{
    EndpointDescriptor, Implementation, InteropError, ParseError, RawResult, RawStatus, Registry,
    RemoteEndpoint, Result, Role, SchemaError, TestCase, TransportKind, Trial,
    VersionClassification, EXIT_FAIL, EXIT_PASS, EXIT_UNSUPPORTED,
};
pub use matrix::{InteropMatrix, MatrixBuilder, MatrixCell, MatrixMeta, MatrixSummary};
pub use pairing::{PairFilter, PairingEngine};
pub use tap::{parse_tap, Anomaly, Assertion, AssertionOutcome, ParsedResult, TapParser};
pub use telemetry::init_tracing;
