//! Execution of a single trial.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use interop_core::{RawResult, Registry, RunConfig, Trial};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::capture::{spawn_drain, OutputBuffer};
use crate::error::{RunnerError, RunnerResult};
use crate::launcher::{ClientEnv, ClientLauncher};
use crate::relay::RelayResolver;

/// How long output readers may keep draining after the client is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes trials. Implementations must never panic on a misbehaving client;
/// every problem becomes a [`RawResult`].
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    async fn execute(&self, trial: &Trial, timeout: Duration, cancel: &CancelSignal) -> RawResult;
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled(String),
}

/// Runs client processes against resolved relays.
pub struct TrialRunner {
    registry: Arc<Registry>,
    launcher: Arc<dyn ClientLauncher>,
    resolver: RelayResolver,
    verbose: bool,
    output_limit: usize,
    instance_prefix: String,
}

impl TrialRunner {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Arc<dyn ClientLauncher>,
        resolver: RelayResolver,
        config: &RunConfig,
    ) -> Self {
        Self {
            registry,
            launcher,
            resolver,
            verbose: config.verbose,
            output_limit: config.output_limit_bytes,
            instance_prefix: format!("moq-interop-{}", std::process::id()),
        }
    }

    /// Prefix for per-trial instance names. Trials append their sequence.
    pub fn with_instance_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.instance_prefix = prefix.into();
        self
    }

    pub fn instance_name(&self, trial: &Trial) -> String {
        format!("{}-{}", self.instance_prefix, trial.sequence)
    }

    pub fn launcher(&self) -> &dyn ClientLauncher {
        self.launcher.as_ref()
    }

    fn prepare(&self, trial: &Trial) -> RunnerResult<tokio::process::Command> {
        let relay = self
            .registry
            .get(&trial.relay)
            .ok_or_else(|| RunnerError::UnknownImplementation {
                id: trial.relay.clone(),
            })?;
        let client = self
            .registry
            .get(&trial.client)
            .ok_or_else(|| RunnerError::UnknownImplementation {
                id: trial.client.clone(),
            })?;

        let target = self.resolver.resolve(relay)?;
        debug!(kind = target.kind(), url = %target.relay_url(), "relay resolved");

        let env = ClientEnv::new(target.as_ref(), &trial.test_case.id, self.verbose)
            .with_instance(self.instance_name(trial));
        let mut cmd = self.launcher.command(client, &env)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl TrialExecutor for TrialRunner {
    #[instrument(skip_all, fields(trial = %trial.label()))]
    async fn execute(&self, trial: &Trial, timeout: Duration, cancel: &CancelSignal) -> RawResult {
        let start = Instant::now();

        let mut cmd = match self.prepare(trial) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(error = %e, "trial could not be prepared");
                return RawResult::spawn_failed(start.elapsed(), e.to_string());
            }
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(launcher = self.launcher.name(), error = %e, "failed to spawn client");
                return RawResult::spawn_failed(start.elapsed(), e.to_string());
            }
        };
        info!(pid = child.id(), "client started");

        let buffer = Arc::new(Mutex::new(OutputBuffer::new(self.output_limit)));
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain(stdout, Arc::clone(&buffer)));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_drain(stderr, Arc::clone(&buffer)));
        }

        let mut cancel = cancel.clone();
        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(timeout) => Ending::TimedOut,
            reason = cancel.cancelled() => Ending::Cancelled(reason),
        };

        if !matches!(ending, Ending::Exited(_)) {
            let instance = self.instance_name(trial);
            if let Err(e) = self.launcher.terminate(&instance).await {
                warn!(%instance, error = %e, "failed to stop client instance");
            }
            // kill() also reaps the child.
            match child.kill().await {
                Ok(()) => debug!("client terminated"),
                Err(e) => warn!(error = %e, "failed to terminate client"),
            }
        }

        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        for mut drain in drains {
            if tokio::time::timeout_at(deadline, &mut drain).await.is_err() {
                debug!("output still open after client exit; abandoning reader");
                drain.abort();
            }
        }

        let elapsed = start.elapsed();
        let (output, truncated) = buffer.lock().await.take();
        if truncated {
            warn!(limit = self.output_limit, "client output truncated");
        }

        match ending {
            Ending::Exited(Ok(status)) => {
                info!(exit_code = ?status.code(), elapsed_ms = elapsed.as_millis() as u64, "client exited");
                RawResult::exited(status.code(), elapsed, output, truncated)
            }
            Ending::Exited(Err(e)) => {
                warn!(error = %e, "failed to wait for client");
                let mut raw = RawResult::spawn_failed(elapsed, format!("failed to wait for client: {e}"));
                raw.captured_output = output;
                raw.truncated = truncated;
                raw
            }
            Ending::TimedOut => {
                warn!(timeout_ms = timeout.as_millis() as u64, "client timed out");
                RawResult::timed_out(elapsed, output, truncated)
            }
            Ending::Cancelled(reason) => {
                info!(%reason, "client cancelled");
                RawResult::cancelled(elapsed, output, truncated, reason)
            }
        }
    }
}
