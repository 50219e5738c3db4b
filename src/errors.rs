//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Mapping or history file could not be read or written.
    Persistence(String),
    /// Channel is already mapped to another session.
    DuplicateChannel(String),
    /// Session id is absent from the registry or the controller cache.
    UnknownSession(String),
    /// Multiplexer could not start the backend agent process.
    LaunchFailure(String),
    /// External multiplexer call exceeded its time bound.
    HealthCheckTimeout(String),
    /// Multiplexer command failed for a reason other than launch.
    Multiplexer(String),
    /// Recovery gave up after exhausting its attempts.
    RecoveryFailed(String),
    /// Notification delivery failure.
    Notify(String),
    /// IPC communication failure.
    Ipc(String),
    /// Request is well-formed but not valid in the current state.
    InvalidRequest(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::DuplicateChannel(msg) => write!(f, "duplicate channel: {msg}"),
            Self::UnknownSession(msg) => write!(f, "unknown session: {msg}"),
            Self::LaunchFailure(msg) => write!(f, "launch failure: {msg}"),
            Self::HealthCheckTimeout(msg) => write!(f, "health check timeout: {msg}"),
            Self::Multiplexer(msg) => write!(f, "multiplexer: {msg}"),
            Self::RecoveryFailed(msg) => write!(f, "recovery failed: {msg}"),
            Self::Notify(msg) => write!(f, "notify: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
