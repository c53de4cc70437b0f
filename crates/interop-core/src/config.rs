//! Run-scoped configuration.
//!
//! Everything a run needs is passed explicitly through [`RunConfig`]; nothing
//! is held in process-wide state, so independent runs can share a process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{InteropError, Result};

/// Default number of trials executed at once.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default per-trial wall-clock limit.
pub const DEFAULT_TRIAL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default cap on captured client output.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;
/// Port a containerised relay listens on (`MOQT_PORT`).
pub const DEFAULT_RELAY_PORT: u16 = 4443;

/// Configuration for a single interop run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Protocol version treated as the compatibility baseline.
    pub current_target: String,

    /// Maximum concurrent trials.
    pub concurrency: usize,

    #[serde(with = "secs", rename = "trial_timeout_secs")]
    pub trial_timeout: Duration,

    /// Passed to clients as `VERBOSE`.
    pub verbose: bool,

    /// Captured output beyond this is dropped and the result marked truncated.
    pub output_limit_bytes: usize,

    /// Port used when synthesizing a local relay URL.
    pub relay_port: u16,
}

impl RunConfig {
    pub fn new(current_target: impl Into<String>) -> Self {
        Self {
            current_target: current_target.into(),
            concurrency: DEFAULT_CONCURRENCY,
            trial_timeout: DEFAULT_TRIAL_TIMEOUT,
            verbose: false,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            relay_port: DEFAULT_RELAY_PORT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn with_relay_port(mut self, port: u16) -> Self {
        self.relay_port = port;
        self
    }

    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.current_target.trim().is_empty() {
            return Err(InteropError::InvalidConfig(
                "current target must not be empty".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(InteropError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.trial_timeout.is_zero() {
            return Err(InteropError::InvalidConfig(
                "trial timeout must be non-zero".to_string(),
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(InteropError::InvalidConfig(
                "output limit must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
