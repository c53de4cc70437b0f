//! Client process construction and the environment contract.
//!
//! Every client receives exactly four variables:
//!
//! | Variable             | Value                                   |
//! |----------------------|-----------------------------------------|
//! | `RELAY_URL`          | resolved relay address                  |
//! | `TESTCASE`           | test case identifier                    |
//! | `TLS_DISABLE_VERIFY` | `1` when certificate checks are skipped |
//! | `VERBOSE`            | `1` for verbose client logging          |
//!
//! Each trial also gets an instance name. It is not exported to the client;
//! launchers use it to find and stop whatever they started.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use interop_core::{Implementation, Role};
use tokio::process::Command;

use crate::error::{RunnerError, RunnerResult};
use crate::relay::RelayTarget;

pub const ENV_RELAY_URL: &str = "RELAY_URL";
pub const ENV_TESTCASE: &str = "TESTCASE";
pub const ENV_TLS_DISABLE_VERIFY: &str = "TLS_DISABLE_VERIFY";
pub const ENV_VERBOSE: &str = "VERBOSE";

/// The environment handed to a client process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEnv {
    pub relay_url: String,
    pub test_case: String,
    pub tls_disable_verify: bool,
    pub verbose: bool,
    pub instance: String,
}

impl ClientEnv {
    pub fn new(relay: &dyn RelayTarget, test_case: impl Into<String>, verbose: bool) -> Self {
        Self {
            relay_url: relay.relay_url(),
            test_case: test_case.into(),
            tls_disable_verify: relay.tls_disable_verify(),
            verbose,
            instance: String::new(),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Variables in a stable order.
    pub fn vars(&self) -> [(&'static str, String); 4] {
        [
            (ENV_RELAY_URL, self.relay_url.clone()),
            (ENV_TESTCASE, self.test_case.clone()),
            (ENV_TLS_DISABLE_VERIFY, flag(self.tls_disable_verify)),
            (ENV_VERBOSE, flag(self.verbose)),
        ]
    }

    /// Set the contract variables on `cmd`.
    pub fn apply(&self, cmd: &mut Command) {
        for (key, value) in self.vars() {
            cmd.env(key, value);
        }
    }
}

fn flag(on: bool) -> String {
    if on { "1" } else { "0" }.to_string()
}

/// Builds the process that runs a client for one trial.
#[async_trait]
pub trait ClientLauncher: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Command for `client` with `env` applied. Stdio is configured by the runner.
    fn command(&self, client: &Implementation, env: &ClientEnv) -> RunnerResult<Command>;

    /// Check that clients can be started at all.
    async fn preflight(&self) -> RunnerResult<()> {
        Ok(())
    }

    /// Stop anything `instance` left running outside the spawned process.
    ///
    /// Called on timeout or cancellation, before the process is killed.
    async fn terminate(&self, _instance: &str) -> RunnerResult<()> {
        Ok(())
    }
}

/// Runs each client's container image with `docker run`.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    pub binary: String,
    pub network: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for DockerLauncher {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            network: None,
            extra_args: Vec::new(),
        }
    }
}

impl DockerLauncher {
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Arguments after the binary name.
    pub fn args(&self, image: &str, env: &ClientEnv) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if !env.instance.is_empty() {
            args.push("--name".to_string());
            args.push(env.instance.clone());
        }
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for (key, value) in env.vars() {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(image.to_string());
        args
    }

    /// `docker rm -f <instance>`, which stops the container and removes it.
    pub fn remove_command(&self, instance: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["rm", "-f", instance])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ClientLauncher for DockerLauncher {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn command(&self, client: &Implementation, env: &ClientEnv) -> RunnerResult<Command> {
        let image = client
            .docker_image(Role::Client)
            .ok_or_else(|| RunnerError::ClientNotLaunchable {
                id: client.id.clone(),
                launcher: self.name(),
                reason: "no client container image declared".to_string(),
            })?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(image, env));
        env.apply(&mut cmd);
        Ok(cmd)
    }

    async fn preflight(&self) -> RunnerResult<()> {
        let mut version = Command::new(&self.binary);
        version
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(15), version.output())
            .await
            .map_err(|_| RunnerError::LauncherUnavailable {
                launcher: self.name(),
                reason: "`docker version` did not answer within 15 seconds".to_string(),
            })?
            .map_err(|e| RunnerError::LauncherUnavailable {
                launcher: self.name(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RunnerError::LauncherUnavailable {
                launcher: self.name(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn terminate(&self, instance: &str) -> RunnerResult<()> {
        if instance.is_empty() {
            return Ok(());
        }
        let mut remove = self.remove_command(instance);
        let output = tokio::time::timeout(Duration::from_secs(15), remove.output())
            .await
            .map_err(|_| RunnerError::TerminateFailed {
                instance: instance.to_string(),
                reason: "`docker rm -f` did not answer within 15 seconds".to_string(),
            })?
            .map_err(|e| RunnerError::TerminateFailed {
                instance: instance.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RunnerError::TerminateFailed {
                instance: instance.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Runs the same local program for every client.
///
/// Used for locally built client binaries and for exercising the runner
/// against scripted clients.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `sh -c <script>`, handy for scripted clients.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }
}

#[async_trait]
impl ClientLauncher for CommandLauncher {
    fn name(&self) -> &'static str {
        "command"
    }

    fn command(&self, _client: &Implementation, env: &ClientEnv) -> RunnerResult<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        env.apply(&mut cmd);
        Ok(cmd)
    }
}
