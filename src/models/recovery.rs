//! Recovery audit records and aggregate statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recovery invocation, appended to the persisted history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryAttempt {
    /// Session the recovery targeted.
    pub session_id: u32,
    /// 1-based attempt number within the current failure chain.
    pub attempt_number: u32,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Whether the session came back healthy.
    pub success: bool,
    /// Failure description, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock duration of the attempt.
    pub duration_seconds: f64,
}

impl RecoveryAttempt {
    /// Record a successful attempt.
    #[must_use]
    pub fn succeeded(session_id: u32, attempt_number: u32, duration_seconds: f64) -> Self {
        Self {
            session_id,
            attempt_number,
            timestamp: Utc::now(),
            success: true,
            error_message: None,
            duration_seconds,
        }
    }

    /// Record a failed attempt.
    #[must_use]
    pub fn failed(
        session_id: u32,
        attempt_number: u32,
        error_message: String,
        duration_seconds: f64,
    ) -> Self {
        Self {
            session_id,
            attempt_number,
            timestamp: Utc::now(),
            success: false,
            error_message: Some(error_message),
            duration_seconds,
        }
    }
}

/// Aggregate view over the recovery history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryStats {
    /// Records currently retained.
    pub total_attempts: usize,
    /// Retained records that succeeded.
    pub successful: usize,
    /// Percentage of successful records, 0 when empty.
    pub success_rate: f64,
    /// Records newer than 24 hours.
    pub recent_24h: usize,
    /// Whether the monitor loop is running.
    pub monitoring: bool,
    /// Sessions with a non-zero pending attempt counter, ascending.
    pub sessions_with_issues: Vec<u32>,
}
