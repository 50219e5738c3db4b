//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for stored credentials.
const KEYRING_SERVICE: &str = "agent-bridge";

/// Backend CLI agent launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable started inside each multiplexer session.
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    /// Working directory the agent is started in.
    pub work_dir: String,
    /// Extra command-line options passed to the agent.
    #[serde(default = "default_agent_options")]
    pub options: String,
}

fn default_agent_binary() -> String {
    "claude".into()
}

fn default_agent_options() -> String {
    "--dangerously-skip-permissions".into()
}

/// Terminal multiplexer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MultiplexerConfig {
    /// Multiplexer executable.
    #[serde(default = "default_multiplexer_binary")]
    pub binary: String,
    /// Session name prefix; sessions are named `<prefix>-<id>`.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// Optional dedicated server socket (`tmux -L`).
    #[serde(default)]
    pub socket_name: Option<String>,
    /// Upper bound for every multiplexer subprocess call.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Pause between typing a message and pressing Enter.
    #[serde(default = "default_send_keys_delay")]
    pub send_keys_delay_millis: u64,
}

fn default_multiplexer_binary() -> String {
    "tmux".into()
}

fn default_session_prefix() -> String {
    "claude-session".into()
}

fn default_command_timeout() -> u64 {
    10
}

fn default_send_keys_delay() -> u64 {
    200
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            binary: default_multiplexer_binary(),
            session_prefix: default_session_prefix(),
            socket_name: None,
            command_timeout_seconds: default_command_timeout(),
            send_keys_delay_millis: default_send_keys_delay(),
        }
    }
}

impl MultiplexerConfig {
    /// Per-call subprocess timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

/// Health supervision and recovery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryConfig {
    /// Whether the background monitor is started with the daemon.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pause between two monitoring sweeps.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    /// Consecutive failed recoveries before a session is given up.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Backoff before the second recovery invocation.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_seconds: u64,
    /// Backoff ceiling.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: u64,
    /// Fixed pause between create attempts inside one recovery.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// Pause after an unexpected sweep failure.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
    /// Number of recovery records kept on disk.
    #[serde(default = "default_history_max_entries")]
    pub history_max_entries: usize,
    /// How long `stop()` waits for the monitor task to finish.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    60
}

fn default_retry_delay() -> u64 {
    2
}

fn default_error_backoff() -> u64 {
    5
}

fn default_history_max_entries() -> usize {
    1000
}

fn default_stop_timeout() -> u64 {
    10
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            health_check_interval_seconds: default_health_check_interval(),
            max_retry_attempts: default_max_retry_attempts(),
            base_backoff_seconds: default_base_backoff(),
            max_backoff_seconds: default_max_backoff(),
            retry_delay_seconds: default_retry_delay(),
            error_backoff_seconds: default_error_backoff(),
            history_max_entries: default_history_max_entries(),
            stop_timeout_seconds: default_stop_timeout(),
        }
    }
}

/// Outbound notification settings.
///
/// The webhook URL is loaded at runtime via OS keychain or environment
/// variable, never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotifierConfig {
    /// Whether notifications are posted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Webhook endpoint (populated at runtime).
    #[serde(skip)]
    pub webhook_url: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
        }
    }
}

fn default_session_id() -> u32 {
    1
}

fn default_ipc_name() -> String {
    "agent-bridge".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the session mapping, recovery history and attachments.
    pub data_dir: PathBuf,
    /// Session used for channels without an explicit mapping.
    #[serde(default = "default_session_id")]
    pub default_session: u32,
    /// Channel bootstrapped into an empty registry at startup.
    #[serde(default)]
    pub default_channel_id: Option<String>,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Backend agent launch settings.
    pub agent: AgentConfig,
    /// Multiplexer settings.
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    /// Recovery and monitoring settings.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Notification settings.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the notifier webhook URL from OS keychain with env-var fallback.
    ///
    /// A missing credential is not an error: notifications then go to the
    /// log only.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.notifier.webhook_url =
            load_credential("notifier_webhook_url", "AGENT_BRIDGE_WEBHOOK_URL").await?;
        Ok(())
    }

    /// Path of the channel mapping file.
    #[must_use]
    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    /// Path of the persisted recovery history.
    #[must_use]
    pub fn recovery_history_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("recovery_history.json")
    }

    /// Root directory for downloaded attachments.
    #[must_use]
    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    /// Attachment directory owned by a single session.
    #[must_use]
    pub fn session_attachments_dir(&self, session_id: u32) -> PathBuf {
        self.attachments_dir().join(format!("session_{session_id}"))
    }

    fn validate(&mut self) -> Result<()> {
        if self.default_session == 0 {
            return Err(AppError::Config(
                "default_session must be greater than zero".into(),
            ));
        }

        let prefix = &self.multiplexer.session_prefix;
        if prefix.is_empty() {
            return Err(AppError::Config("session_prefix must not be empty".into()));
        }
        if prefix.contains([':', '.']) {
            return Err(AppError::Config(format!(
                "session_prefix '{prefix}' must not contain ':' or '.'"
            )));
        }
        if self.multiplexer.command_timeout_seconds == 0 {
            return Err(AppError::Config(
                "command_timeout_seconds must be greater than zero".into(),
            ));
        }

        let recovery = &self.recovery;
        if recovery.max_retry_attempts == 0 {
            return Err(AppError::Config(
                "max_retry_attempts must be greater than zero".into(),
            ));
        }
        if recovery.base_backoff_seconds > recovery.max_backoff_seconds {
            return Err(AppError::Config(
                "base_backoff_seconds must not exceed max_backoff_seconds".into(),
            ));
        }
        if recovery.history_max_entries == 0 {
            return Err(AppError::Config(
                "history_max_entries must be greater than zero".into(),
            ));
        }
        if recovery.health_check_interval_seconds == 0 {
            return Err(AppError::Config(
                "health_check_interval_seconds must be greater than zero".into(),
            ));
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|err| AppError::Config(format!("data_dir cannot be created: {err}")))?;
        self.data_dir = self
            .data_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("data_dir invalid: {err}")))?;

        Ok(())
    }
}

/// Load a single optional credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    Ok(env::var(env_key).ok().filter(|value| !value.is_empty()))
}
