//! `tmux`-backed [`Multiplexer`] implementation.
//!
//! Each operation spawns one `tmux` subprocess with `kill_on_drop(true)` and
//! a hard timeout, so a wedged tmux server cannot stall the caller.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{Multiplexer, MuxFuture};
use crate::config::MultiplexerConfig;
use crate::{AppError, Result};

/// stderr fragments tmux prints when there is simply nothing running.
const NO_SERVER_MARKERS: [&str; 4] = [
    "no server running",
    "no sessions",
    "error connecting",
    "can't find session",
];

/// Multiplexer driving the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
    socket_name: Option<String>,
    timeout: Duration,
}

impl TmuxMultiplexer {
    /// Construct a tmux driver.
    #[must_use]
    pub fn new(binary: impl Into<String>, socket_name: Option<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            socket_name,
            timeout,
        }
    }

    /// Construct a tmux driver from the `[multiplexer]` configuration table.
    #[must_use]
    pub fn from_config(config: &MultiplexerConfig) -> Self {
        Self::new(
            config.binary.clone(),
            config.socket_name.clone(),
            config.command_timeout(),
        )
    }

    /// Full argument vector for a tmux subcommand, including the socket flag.
    #[must_use]
    pub fn command_args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(ref socket) = self.socket_name {
            full.push("-L".to_owned());
            full.push(socket.clone());
        }
        full.extend(args.iter().map(|arg| (*arg).to_owned()));
        full
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let full_args = self.command_args(args);
        debug!(binary = %self.binary, args = ?full_args, "running multiplexer command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => Err(
                AppError::LaunchFailure(format!("{} binary not found", self.binary)),
            ),
            Ok(Err(err)) => Err(AppError::Multiplexer(format!(
                "failed to run {}: {err}",
                self.binary
            ))),
            Err(_) => Err(AppError::HealthCheckTimeout(format!(
                "{} {} exceeded {}s",
                self.binary,
                args.first().copied().unwrap_or_default(),
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Exact-match session target (`=name`), immune to tmux prefix matching.
fn exact_target(name: &str) -> String {
    format!("={name}")
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

fn is_nothing_running(stderr: &str) -> bool {
    NO_SERVER_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Split `list-sessions -F '#{session_name}'` output into names.
#[must_use]
pub fn parse_session_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

impl Multiplexer for TmuxMultiplexer {
    fn session_exists(&self, name: &str) -> MuxFuture<'_, bool> {
        let target = exact_target(name);
        Box::pin(async move {
            let output = self.run(&["has-session", "-t", target.as_str()]).await?;
            Ok(output.status.success())
        })
    }

    fn create_session(&self, name: &str, initial_command: &str) -> MuxFuture<'_, ()> {
        let name = name.to_owned();
        let initial_command = initial_command.to_owned();
        Box::pin(async move {
            let output = self
                .run(&["new-session", "-d", "-s", name.as_str(), initial_command.as_str()])
                .await?;
            if output.status.success() {
                Ok(())
            } else {
                Err(AppError::LaunchFailure(format!(
                    "new-session {name} failed: {}",
                    stderr_text(&output)
                )))
            }
        })
    }

    fn kill_session(&self, name: &str) -> MuxFuture<'_, ()> {
        let target = exact_target(name);
        Box::pin(async move {
            let output = self.run(&["kill-session", "-t", target.as_str()]).await?;
            let stderr = stderr_text(&output);
            if output.status.success() || is_nothing_running(&stderr) {
                Ok(())
            } else {
                Err(AppError::Multiplexer(format!(
                    "kill-session {target} failed: {stderr}"
                )))
            }
        })
    }

    fn list_sessions(&self) -> MuxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let output = self
                .run(&["list-sessions", "-F", "#{session_name}"])
                .await?;
            if output.status.success() {
                return Ok(parse_session_names(&String::from_utf8_lossy(
                    &output.stdout,
                )));
            }
            let stderr = stderr_text(&output);
            if is_nothing_running(&stderr) {
                Ok(Vec::new())
            } else {
                Err(AppError::Multiplexer(format!(
                    "list-sessions failed: {stderr}"
                )))
            }
        })
    }

    fn send_keys(&self, name: &str, keys: &str, literal: bool) -> MuxFuture<'_, ()> {
        let target = format!("{}:", exact_target(name));
        let keys = keys.to_owned();
        Box::pin(async move {
            let mut args = vec!["send-keys", "-t", target.as_str()];
            if literal {
                args.push("-l");
            }
            args.push(keys.as_str());
            let output = self.run(&args).await?;
            if output.status.success() {
                Ok(())
            } else {
                Err(AppError::Multiplexer(format!(
                    "send-keys {target} failed: {}",
                    stderr_text(&output)
                )))
            }
        })
    }
}
