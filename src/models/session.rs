//! Session registry entry and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for a registered session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is routable and supervised.
    Active,
    /// Session is registered but not routable.
    Inactive,
    /// Last health check failed.
    Error,
    /// Backend process is not running.
    Stopped,
    /// Backend process was relaunched by recovery.
    Recovered,
    /// Recovery gave up after exhausting its attempts.
    RecoveryFailed,
}

impl SessionStatus {
    /// Lower-case name used in CLI output and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Recovered => "recovered",
            Self::RecoveryFailed => "recovery_failed",
        }
    }
}

/// One channel ↔ session mapping plus its runtime health bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionEntry {
    /// Positive, monotonically assigned identifier.
    pub session_id: u32,
    /// External chat channel identifier; unique across entries.
    pub channel_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// When the entry was created or loaded.
    pub created_at: DateTime<Utc>,
    /// Last time the monitor looked at this session.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Last successful recovery.
    pub last_recovery: Option<DateTime<Utc>>,
    /// Working directory the backend agent was launched in.
    pub work_dir: Option<String>,
    /// Options the backend agent was launched with.
    pub launch_options: Option<String>,
    /// Successful recoveries since the last healthy check.
    pub recovery_count: u32,
}

impl SessionEntry {
    /// Construct a fresh active entry.
    #[must_use]
    pub fn new(session_id: u32, channel_id: String) -> Self {
        Self {
            session_id,
            channel_id,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            last_health_check: None,
            last_recovery: None,
            work_dir: None,
            launch_options: None,
            recovery_count: 0,
        }
    }

    /// Whether the entry is routable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
