//! Runner error types.
//!
//! Per-trial problems never leave the runner as errors; they are folded into
//! a `RawResult`. Only failures that make the whole run pointless surface
//! through [`RunnerError`].

use interop_core::InteropError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The trial references an implementation missing from the registry.
    #[error("implementation {id} is not in the registry")]
    UnknownImplementation { id: String },

    /// The relay declares no endpoint this runner can use.
    #[error("relay {id} has no usable endpoint")]
    NoRelayEndpoint { id: String },

    /// The client cannot be launched by the configured launcher.
    #[error("client {id} cannot be launched by {launcher}: {reason}")]
    ClientNotLaunchable {
        id: String,
        launcher: &'static str,
        reason: String,
    },

    /// No client process can be started at all.
    #[error("client launcher {launcher} is unavailable: {reason}")]
    LauncherUnavailable {
        launcher: &'static str,
        reason: String,
    },

    /// A timed out or cancelled client could not be stopped.
    #[error("failed to stop client instance {instance}: {reason}")]
    TerminateFailed { instance: String, reason: String },

    #[error("invalid run: {0}")]
    Interop(#[from] InteropError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
