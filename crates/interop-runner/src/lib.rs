//! Interop Runner
//!
//! Turns planned trials into an interop matrix: resolves relay targets,
//! launches client processes with the environment contract, enforces
//! per-trial timeouts and runs the whole set on a bounded worker pool.

pub mod cancel;
pub mod capture;
pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod relay;
pub mod runner;

pub use cancel::{CancelHandle, CancelSignal};
pub use capture::OutputBuffer;
pub use error::{RunnerError, RunnerResult};
pub use launcher::{ClientEnv, ClientLauncher, CommandLauncher, DockerLauncher};
pub use orchestrator::{evaluate, run_trials, InteropRun};
pub use relay::{LocalRelay, RelayResolver, RelayTarget, RemoteRelay};
pub use runner::{TrialExecutor, TrialRunner};
