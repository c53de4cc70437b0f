//! MoQ Interop - relay/client interoperability runner
//!
//! The `moq-interop` command pairs every registered relay with every
//! registered client, runs each test case and reports the interop matrix.
//!
//! ## Commands
//!
//! - `validate`: Load a registry and report its implementations
//! - `plan`: Print the ordered trial set without running anything
//! - `run`: Execute the trial set and write the matrix
//! - `parse-tap`: Parse a captured client output

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use interop_core::pairing::describe_pair;
use interop_core::{
    config, parse_tap, InteropMatrix, PairFilter, PairingEngine, Registry, Role, RunConfig,
    TestCase, Trial, TrialStatus,
};
use interop_runner::{
    CancelHandle, ClientLauncher, CommandLauncher, DockerLauncher, InteropRun, RelayResolver,
};

#[derive(Parser)]
#[command(name = "moq-interop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MoQ relay/client interoperability runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which trials a command covers.
#[derive(Args, Debug, Clone)]
struct Scope {
    /// Path to the implementation registry (JSON)
    #[arg(long, env = "MOQ_INTEROP_REGISTRY")]
    registry: PathBuf,

    /// Draft version under test (overrides the registry's current_target)
    #[arg(long, env = "MOQ_INTEROP_TARGET")]
    target: Option<String>,

    /// Only run these relays (repeatable)
    #[arg(long = "relay", value_name = "ID")]
    relays: Vec<String>,

    /// Only run these clients (repeatable)
    #[arg(long = "client", value_name = "ID")]
    clients: Vec<String>,

    /// Only run these test cases (repeatable, default: all)
    #[arg(long = "test-case", value_name = "ID")]
    test_cases: Vec<String>,

    /// Skip pairs that share no draft version
    #[arg(long)]
    exclude_mismatched: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a registry and report its implementations
    Validate {
        /// Path to the implementation registry (JSON)
        #[arg(long, env = "MOQ_INTEROP_REGISTRY")]
        registry: PathBuf,
    },

    /// Print the ordered trial set
    Plan {
        #[command(flatten)]
        scope: Scope,

        /// Print the trials as JSON instead of a table
        #[arg(long)]
        emit_json: bool,
    },

    /// Run every trial and write the interop matrix
    Run {
        #[command(flatten)]
        scope: Scope,

        /// Maximum trials in flight
        #[arg(long, env = "MOQ_INTEROP_CONCURRENCY", default_value_t = config::DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Per-trial timeout in seconds
        #[arg(long, env = "MOQ_INTEROP_TIMEOUT_SECS", default_value_t = config::DEFAULT_TRIAL_TIMEOUT.as_secs())]
        timeout_secs: u64,

        /// Where to write the matrix JSON
        #[arg(short, long, default_value = "interop-matrix.json")]
        output: PathBuf,

        /// Docker network clients join (to reach local relays by name)
        #[arg(long, value_name = "NAME")]
        docker_network: Option<String>,

        /// Run this local program as every client instead of its container
        #[arg(long, value_name = "PROGRAM", conflicts_with = "docker_network")]
        client_command: Option<String>,

        /// Use local relay containers even when a remote endpoint exists
        #[arg(long)]
        prefer_local: bool,

        /// Port local relays listen on
        #[arg(long, default_value_t = config::DEFAULT_RELAY_PORT)]
        relay_port: u16,

        /// Cap on captured output per trial
        #[arg(long, default_value_t = config::DEFAULT_OUTPUT_LIMIT_BYTES)]
        output_limit_bytes: usize,
    },

    /// Parse captured client output and print the structured result
    ParseTap {
        /// File holding the client's output
        file: PathBuf,

        /// Exit code the client returned
        #[arg(long)]
        exit_code: Option<i32>,
    },
}

/// Options of the `run` command that are not part of the scope.
struct RunOptions {
    concurrency: usize,
    timeout_secs: u64,
    output: PathBuf,
    docker_network: Option<String>,
    client_command: Option<String>,
    prefer_local: bool,
    relay_port: u16,
    output_limit_bytes: usize,
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    interop_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { registry } => cmd_validate(&registry),
        Commands::Plan { scope, emit_json } => cmd_plan(&scope, emit_json),
        Commands::Run {
            scope,
            concurrency,
            timeout_secs,
            output,
            docker_network,
            client_command,
            prefer_local,
            relay_port,
            output_limit_bytes,
        } => {
            let options = RunOptions {
                concurrency,
                timeout_secs,
                output,
                docker_network,
                client_command,
                prefer_local,
                relay_port,
                output_limit_bytes,
                verbose: cli.verbose,
            };
            cmd_run(&scope, options).await
        }
        Commands::ParseTap { file, exit_code } => cmd_parse_tap(&file, exit_code),
    }
}

fn load_registry(path: &Path) -> Result<Registry> {
    Registry::load(path).with_context(|| format!("Failed to load registry {}", path.display()))
}

/// The CLI target wins over the registry's; one of them is required.
fn resolve_target(flag: Option<&str>, registry: &Registry) -> Result<String> {
    match flag.filter(|t| !t.trim().is_empty()) {
        Some(target) => Ok(target.to_string()),
        None => registry.current_target().map(str::to_string).ok_or_else(|| {
            anyhow::anyhow!("No target version: pass --target or set current_target in the registry")
        }),
    }
}

fn build_filter(scope: &Scope) -> Option<PairFilter> {
    if scope.relays.is_empty() && scope.clients.is_empty() && !scope.exclude_mismatched {
        return None;
    }
    let mut filter = PairFilter::default();
    for id in &scope.relays {
        filter = filter.relay(id);
    }
    for id in &scope.clients {
        filter = filter.client(id);
    }
    if scope.exclude_mismatched {
        filter = filter.exclude_mismatched();
    }
    Some(filter)
}

/// Resolve the target and build the trial set for `scope`.
fn plan_trials(registry: &Registry, scope: &Scope) -> Result<(String, Vec<Trial>)> {
    let target = resolve_target(scope.target.as_deref(), registry)?;

    for id in scope.relays.iter().chain(&scope.clients) {
        if registry.get(id).is_none() {
            anyhow::bail!("Unknown implementation: {}", id);
        }
    }

    let test_cases = TestCase::select(&scope.test_cases).context("Invalid test case selection")?;
    let filter = build_filter(scope);
    let trials = PairingEngine::build(registry, &test_cases, &target, filter.as_ref());
    Ok((target, trials))
}

/// Load and report a registry
fn cmd_validate(path: &Path) -> Result<()> {
    let registry = load_registry(path)?;

    println!("Registry: {}", path.display());
    println!("Digest: {}", registry.digest());
    if let Some(target) = registry.current_target() {
        println!("Current target: {}", target);
    }
    println!();

    for implementation in registry.iter() {
        let roles: Vec<String> = implementation.roles.keys().map(Role::to_string).collect();
        let versions: Vec<&str> = implementation
            .draft_versions
            .iter()
            .map(String::as_str)
            .collect();
        println!(
            "  ✓ {} ({}) roles: {} versions: {}",
            implementation.id,
            implementation.name,
            roles.join(", "),
            versions.join(", ")
        );
    }

    println!();
    println!(
        "{} implementations ({} relays, {} clients)",
        registry.len(),
        registry.relays().len(),
        registry.clients().len()
    );
    Ok(())
}

/// Print the ordered trial set
fn cmd_plan(scope: &Scope, emit_json: bool) -> Result<()> {
    let registry = load_registry(&scope.registry)?;
    let (target, trials) = plan_trials(&registry, scope)?;

    if emit_json {
        println!("{}", serde_json::to_string_pretty(&trials)?);
        return Ok(());
    }

    println!("Target: {}", target);
    println!();
    for (relay, client, classification) in PairingEngine::pairs(&trials) {
        let heading = match (registry.get(&relay), registry.get(&client)) {
            (Some(r), Some(c)) => describe_pair(r, c),
            _ => format!("{} -> {}", relay, client),
        };
        println!("{} [{}]", heading, classification);
        for trial in trials
            .iter()
            .filter(|t| t.relay == relay && t.client == client)
        {
            println!("  #{:<4} {}", trial.sequence, trial.test_case.id);
        }
    }
    println!();
    println!("{} trials", trials.len());
    Ok(())
}

fn launcher_for(options: &RunOptions) -> Arc<dyn ClientLauncher> {
    match &options.client_command {
        Some(program) => Arc::new(CommandLauncher::new(program.clone())),
        None => {
            let mut docker = DockerLauncher::default();
            if let Some(network) = &options.docker_network {
                docker = docker.with_network(network.clone());
            }
            Arc::new(docker)
        }
    }
}

/// Execute the trial set and write the matrix
async fn cmd_run(scope: &Scope, options: RunOptions) -> Result<()> {
    let registry = Arc::new(load_registry(&scope.registry)?);
    let (target, trials) = plan_trials(&registry, scope)?;

    let config = RunConfig::new(target.clone())
        .with_concurrency(options.concurrency)
        .with_trial_timeout(Duration::from_secs(options.timeout_secs))
        .with_verbose(options.verbose)
        .with_output_limit(options.output_limit_bytes)
        .with_relay_port(options.relay_port);
    let resolver = RelayResolver::new(config.relay_port).prefer_local(options.prefer_local);
    let launcher = launcher_for(&options);

    println!("Target: {}", target);
    println!("Trials: {}", trials.len());
    println!("Launcher: {}", launcher.name());
    println!();

    let (handle, signal) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel("operator interrupt");
        }
    });

    let run = InteropRun::new(Arc::clone(&registry), launcher, resolver, config);
    let matrix = run
        .execute(trials, signal)
        .await
        .context("Interop run could not start")?;

    print_summary(&matrix);

    matrix
        .write_json(&options.output)
        .with_context(|| format!("Failed to write matrix to {}", options.output.display()))?;
    info!(path = %options.output.display(), "matrix written");
    println!("\nMatrix: {}", options.output.display());

    let summary = matrix.summary();
    if summary.has_problems() {
        anyhow::bail!(
            "Interop run had problems: {} failed, {} errored, {} timed out",
            summary.fail,
            summary.error,
            summary.timeout
        )
    }
    println!("\n✓ All trials passed or were unsupported");
    Ok(())
}

fn status_mark(status: TrialStatus) -> &'static str {
    match status {
        TrialStatus::Pass => "✓",
        TrialStatus::Unsupported => "-",
        TrialStatus::Fail | TrialStatus::Error | TrialStatus::Timeout => "✗",
    }
}

fn print_summary(matrix: &InteropMatrix) {
    println!("Run ID: {}", matrix.meta().run_id);
    println!();

    for outcome in matrix.outcomes() {
        let mut line = format!(
            "  {} {} [{}] {} ({}ms)",
            status_mark(outcome.status),
            outcome.trial.label(),
            outcome.trial.classification,
            outcome.status,
            outcome.raw.elapsed.as_millis()
        );
        if let Some(reason) = &outcome.reason {
            line.push_str(&format!(": {}", reason));
        }
        println!("{}", line);
    }

    println!();
    for cell in matrix.cells() {
        println!(
            "  {} -> {} [{}]: {} pass, {} fail, {} unsupported, {} error, {} timeout",
            cell.relay,
            cell.client,
            cell.classification,
            cell.summary.pass,
            cell.summary.fail,
            cell.summary.unsupported,
            cell.summary.error,
            cell.summary.timeout
        );
    }

    let findings = matrix.findings();
    if !findings.is_empty() {
        println!();
        println!("Findings on the current target:");
        for outcome in findings {
            println!("  - {} ({})", outcome.trial.label(), outcome.status);
        }
    }

    let summary = matrix.summary();
    println!();
    println!(
        "Summary: {}/{} passed, {} fail, {} unsupported, {} error, {} timeout",
        summary.pass,
        summary.total,
        summary.fail,
        summary.unsupported,
        summary.error,
        summary.timeout
    );
}

/// Parse a captured output file
fn cmd_parse_tap(file: &Path, exit_code: Option<i32>) -> Result<()> {
    let output = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed = parse_tap(&output, exit_code).context("Output is not a TAP report")?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}
