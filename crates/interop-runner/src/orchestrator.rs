//! Driving a trial set into an interop matrix.
//!
//! Trials run on a semaphore-bounded pool. Workers never touch the matrix;
//! they send finished outcomes over a channel to one aggregation task, which
//! is the matrix's only writer.

use std::sync::Arc;

use interop_core::{
    parse_tap, InteropMatrix, MatrixBuilder, MatrixMeta, RawResult, RawStatus, Registry,
    ResultClassifier, RunConfig, Trial, TrialOutcome, EXIT_UNSUPPORTED,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::error::RunnerResult;
use crate::launcher::ClientLauncher;
use crate::relay::RelayResolver;
use crate::runner::{TrialExecutor, TrialRunner};

/// Parse (when useful) and classify a finished trial.
///
/// Exit 127 is final regardless of output, and spawn failures have no output,
/// so neither is parsed. Timeouts and cancellations are parsed for the partial
/// report they may carry.
pub fn evaluate(trial: Trial, raw: RawResult) -> TrialOutcome {
    let parse = match raw.status {
        RawStatus::SpawnFailed => false,
        RawStatus::Exited => raw.exit_code != Some(EXIT_UNSUPPORTED),
        RawStatus::Timeout | RawStatus::Cancelled => !raw.captured_output.is_empty(),
    };
    let parsed = parse.then(|| parse_tap(&raw.captured_output, raw.exit_code));
    ResultClassifier::classify(trial, raw, parsed)
}

fn not_started(trial: Trial, reason: &str) -> TrialOutcome {
    let raw = RawResult::cancelled(
        std::time::Duration::ZERO,
        String::new(),
        false,
        format!("cancelled before start ({reason})"),
    );
    ResultClassifier::classify(trial, raw, None)
}

fn lost(trial: Trial) -> TrialOutcome {
    let raw = RawResult::spawn_failed(
        std::time::Duration::ZERO,
        "trial worker aborted before reporting",
    );
    ResultClassifier::classify(trial, raw, None)
}

/// Execute `trials` and return the finalized matrix.
///
/// Always returns a matrix with exactly one outcome per trial, even when the
/// run is cancelled or every trial errors.
#[instrument(skip_all, fields(run_id = %meta.run_id, trials = trials.len()))]
pub async fn run_trials(
    executor: Arc<dyn TrialExecutor>,
    trials: Vec<Trial>,
    config: &RunConfig,
    meta: MatrixMeta,
    cancel: CancelSignal,
) -> InteropMatrix {
    let concurrency = config.concurrency.max(1);
    let timeout = config.trial_timeout;
    let total = trials.len();

    let (tx, mut rx) = mpsc::channel::<TrialOutcome>(concurrency * 2);

    let aggregator = tokio::spawn(async move {
        let mut builder = MatrixBuilder::new(meta);
        while let Some(outcome) = rx.recv().await {
            info!(
                trial = %outcome.trial.label(),
                status = %outcome.status,
                classification = %outcome.trial.classification,
                done = builder.len() + 1,
                total,
                "trial finished"
            );
            if let Err(e) = builder.append(outcome) {
                warn!(error = %e, "ignoring outcome");
            }
        }
        builder
    });

    let sem = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for trial in trials.iter().cloned() {
        let executor = Arc::clone(&executor);
        let sem = Arc::clone(&sem);
        let tx = tx.clone();
        let mut cancel = cancel.clone();

        tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                reason = cancel.cancelled() => {
                    let _ = tx.send(not_started(trial, &reason)).await;
                    return;
                }
                permit = sem.acquire_owned() => permit,
            };

            info!(
                relay = %trial.relay,
                client = %trial.client,
                test_case = %trial.test_case.id,
                "trial starting"
            );
            let raw = executor.execute(&trial, timeout, &cancel).await;
            let _ = tx.send(evaluate(trial, raw)).await;
        });
    }
    drop(tx);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "trial worker failed");
        }
    }

    let mut builder = match aggregator.await {
        Ok(builder) => builder,
        Err(e) => {
            warn!(error = %e, "aggregation task failed; rebuilding matrix from scratch");
            // Outcomes are lost with the task; every trial is reported as lost.
            let meta = MatrixMeta::new(config.current_target.clone(), String::new());
            MatrixBuilder::new(meta)
        }
    };

    for trial in trials {
        if !builder.contains(trial.sequence) {
            let _ = builder.append(lost(trial));
        }
    }

    let matrix = builder.finalize();
    let summary = matrix.summary();
    info!(
        total = summary.total,
        pass = summary.pass,
        fail = summary.fail,
        unsupported = summary.unsupported,
        error = summary.error,
        timeout = summary.timeout,
        "run complete"
    );
    matrix
}

/// A fully wired run: registry, launcher and configuration.
pub struct InteropRun {
    registry: Arc<Registry>,
    launcher: Arc<dyn ClientLauncher>,
    resolver: RelayResolver,
    config: RunConfig,
}

impl InteropRun {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Arc<dyn ClientLauncher>,
        resolver: RelayResolver,
        config: RunConfig,
    ) -> Self {
        Self {
            registry,
            launcher,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Validate, preflight the launcher, then run every trial.
    ///
    /// Errors only when the run cannot start at all.
    pub async fn execute(&self, trials: Vec<Trial>, cancel: CancelSignal) -> RunnerResult<InteropMatrix> {
        self.config.validate()?;
        self.launcher.preflight().await?;

        let meta = MatrixMeta::new(self.config.current_target.clone(), self.registry.digest());
        let runner = TrialRunner::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.launcher),
            self.resolver.clone(),
            &self.config,
        )
        .with_instance_prefix(format!("moq-interop-{}", meta.run_id.simple()));
        Ok(run_trials(Arc::new(runner), trials, &self.config, meta, cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_core::{TestCase, TrialStatus, VersionClassification};
    use std::time::Duration;

    fn trial() -> Trial {
        Trial {
            sequence: 0,
            relay: "relay-a".to_string(),
            client: "client-b".to_string(),
            test_case: TestCase::new("setup-only", "setup"),
            classification: VersionClassification::MatchedCurrent,
            common_versions: vec!["draft-16".to_string()],
        }
    }

    #[test]
    fn test_evaluate_skips_parsing_for_unsupported() {
        let raw = RawResult::exited(Some(127), Duration::from_millis(1), String::new(), false);
        let outcome = evaluate(trial(), raw);
        assert_eq!(outcome.status, TrialStatus::Unsupported);
        assert!(outcome.parse_error.is_none());
    }

    #[test]
    fn test_evaluate_parses_partial_timeout_output() {
        let raw = RawResult::timed_out(
            Duration::from_secs(1),
            "TAP version 14\n1..2\nok 1 - setup\n".to_string(),
            false,
        );
        let outcome = evaluate(trial(), raw);
        assert_eq!(outcome.status, TrialStatus::Timeout);
        let parsed = outcome.parsed.expect("partial report kept");
        assert_eq!(parsed.assertions.len(), 1);
    }

    #[test]
    fn test_not_started_is_error() {
        let outcome = not_started(trial(), "operator interrupt");
        assert_eq!(outcome.status, TrialStatus::Error);
        assert!(outcome
            .reason
            .as_deref()
            .unwrap_or("")
            .contains("cancelled before start"));
    }
}
