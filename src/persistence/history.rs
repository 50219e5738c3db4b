//! Bounded, file-backed recovery history.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::atomic::{read_json, write_json_atomic};
use crate::models::recovery::RecoveryAttempt;
use crate::Result;

/// Append-oriented log of [`RecoveryAttempt`] records capped at `max_entries`.
///
/// Records are kept in memory and rewritten wholesale on [`save`](Self::save);
/// the oldest records are dropped once the cap is reached.
pub struct RecoveryHistory {
    path: PathBuf,
    max_entries: usize,
    entries: Mutex<VecDeque<RecoveryAttempt>>,
}

impl RecoveryHistory {
    /// Load the history from `path`, keeping only the newest `max_entries`.
    ///
    /// An unreadable or corrupt file is logged and treated as empty so a
    /// damaged audit log never blocks supervision.
    #[must_use]
    pub fn load(path: PathBuf, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        let entries = match read_json::<Vec<RecoveryAttempt>>(&path) {
            Ok(Some(records)) => {
                let skip = records.len().saturating_sub(max_entries);
                let kept: VecDeque<_> = records.into_iter().skip(skip).collect();
                info!(count = kept.len(), "loaded recovery history");
                kept
            }
            Ok(None) => VecDeque::new(),
            Err(err) => {
                warn!(%err, path = %path.display(), "recovery history unreadable, starting empty");
                VecDeque::new()
            }
        };

        Self {
            path,
            max_entries,
            entries: Mutex::new(entries),
        }
    }

    /// Append a record in memory, dropping the oldest beyond the cap.
    pub async fn append(&self, attempt: RecoveryAttempt) {
        let mut guard = self.entries.lock().await;
        guard.push_back(attempt);
        while guard.len() > self.max_entries {
            guard.pop_front();
        }
    }

    /// Rewrite the history file with the retained records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file cannot be written.
    pub async fn save(&self) -> Result<()> {
        let snapshot: Vec<RecoveryAttempt> = self.entries.lock().await.iter().cloned().collect();
        write_json_atomic(&self.path, &snapshot)
    }

    /// Snapshot of all retained records, oldest first.
    pub async fn entries(&self) -> Vec<RecoveryAttempt> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Records for one session, oldest first.
    pub async fn for_session(&self, session_id: u32) -> Vec<RecoveryAttempt> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Total, successful, and last-24h record counts.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let cutoff = Utc::now() - Duration::hours(24);
        let guard = self.entries.lock().await;
        let successful = guard.iter().filter(|a| a.success).count();
        let recent = guard.iter().filter(|a| a.timestamp > cutoff).count();
        (guard.len(), successful, recent)
    }

    /// Number of retained records.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no records are retained.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
