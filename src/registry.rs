//! Channel ↔ session registry backed by the `sessions.json` mapping file.
//!
//! The mapping file is the source of truth; the in-memory maps are a cache
//! rebuilt on [`SessionRegistry::open`] and [`SessionRegistry::reload`].
//! Every mutation holds the registry lock across read-modify-write-persist
//! and restores the previous cache snapshot if the write fails.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::GlobalConfig;
use crate::models::session::{SessionEntry, SessionStatus};
use crate::persistence::atomic::{read_json, write_json_atomic};
use crate::{AppError, Result};

/// Aggregate registry counters.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    /// All registered sessions.
    pub total: usize,
    /// Sessions in `active` status.
    pub active: usize,
    /// Sessions in `error` status.
    pub error: usize,
    /// Channels with a mapping.
    pub channels_mapped: usize,
}

#[derive(Debug, Clone, Default)]
struct RegistryState {
    sessions: BTreeMap<u32, SessionEntry>,
    channel_map: HashMap<String, u32>,
}

/// Authoritative channel ↔ session mapping.
pub struct SessionRegistry {
    path: PathBuf,
    default_session: u32,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    /// Open the registry stored at `path`.
    ///
    /// A missing file yields an empty registry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file exists but cannot be read
    /// or is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>, default_session: u32) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?;
        info!(
            sessions = state.sessions.len(),
            path = %path.display(),
            "session registry loaded"
        );
        Ok(Self {
            path,
            default_session,
            state: Mutex::new(state),
        })
    }

    /// Open the registry at the configured mapping path.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Self::open(config.sessions_path(), config.default_session)
    }

    /// Discard the cache and rebuild it from the mapping file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file cannot be read; the
    /// current cache is kept in that case.
    pub fn reload(&self) -> Result<()> {
        let fresh = load_state(&self.path)?;
        *self.lock() = fresh;
        Ok(())
    }

    /// Path of the backing mapping file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve the active session mapped to `channel_id`.
    #[must_use]
    pub fn lookup_session(&self, channel_id: &str) -> Option<u32> {
        let state = self.lock();
        let found = state
            .channel_map
            .get(channel_id)
            .and_then(|id| state.sessions.get(id))
            .filter(|entry| entry.is_active())
            .map(|entry| entry.session_id);
        if found.is_none() {
            debug!(channel_id, "no active session for channel");
        }
        found
    }

    /// Entry mapped to `channel_id`, whatever its status.
    #[must_use]
    pub fn mapped_entry(&self, channel_id: &str) -> Option<SessionEntry> {
        let state = self.lock();
        state
            .channel_map
            .get(channel_id)
            .and_then(|id| state.sessions.get(id))
            .cloned()
    }

    /// Resolve the channel of an active session.
    #[must_use]
    pub fn lookup_channel(&self, session_id: u32) -> Option<String> {
        self.lock()
            .sessions
            .get(&session_id)
            .filter(|entry| entry.is_active())
            .map(|entry| entry.channel_id.clone())
    }

    /// Register `channel_id` under the next session id (`max + 1`, or 1).
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateChannel` if the channel is already mapped,
    /// or `AppError::Persistence` if the highest id is `u32::MAX` or the
    /// mapping file cannot be written (the cache is rolled back).
    pub fn add(&self, channel_id: &str) -> Result<u32> {
        let span = info_span!("registry_add", channel_id);
        let _guard = span.enter();

        let mut state = self.lock();
        if let Some(existing) = state.channel_map.get(channel_id) {
            return Err(AppError::DuplicateChannel(format!(
                "channel {channel_id} is already mapped to session {existing}"
            )));
        }

        let backup = state.clone();
        let session_id = match state.sessions.keys().next_back() {
            None => 1,
            Some(max) => max.checked_add(1).ok_or_else(|| {
                AppError::Persistence(format!("session id space exhausted after {max}"))
            })?,
        };

        state
            .sessions
            .insert(session_id, SessionEntry::new(session_id, channel_id.to_owned()));
        state.channel_map.insert(channel_id.to_owned(), session_id);

        if let Err(err) = persist(&self.path, &state) {
            *state = backup;
            warn!(%err, "failed to persist new session, rolled back");
            return Err(err);
        }

        info!(session_id, "session added");
        Ok(session_id)
    }

    /// Remove a session and its channel mapping.
    ///
    /// Returns `Ok(false)` if the session is unknown. On-disk attachment
    /// directories are left untouched; see [`purge_artifacts`](Self::purge_artifacts).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the mapping file cannot be written
    /// (the cache is rolled back).
    pub fn remove(&self, session_id: u32) -> Result<bool> {
        let span = info_span!("registry_remove", session_id);
        let _guard = span.enter();

        let mut state = self.lock();
        if !state.sessions.contains_key(&session_id) {
            warn!(session_id, "session not found for removal");
            return Ok(false);
        }

        let backup = state.clone();
        if let Some(entry) = state.sessions.remove(&session_id) {
            state.channel_map.remove(&entry.channel_id);
        }

        if let Err(err) = persist(&self.path, &state) {
            *state = backup;
            warn!(%err, "failed to persist session removal, rolled back");
            return Err(err);
        }

        info!(session_id, "session removed");
        Ok(true)
    }

    /// All entries ordered by ascending session id.
    #[must_use]
    pub fn list_all(&self) -> Vec<SessionEntry> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Snapshot of a single entry.
    #[must_use]
    pub fn get(&self, session_id: u32) -> Option<SessionEntry> {
        self.lock().sessions.get(&session_id).cloned()
    }

    /// Whether the session exists and is `active`.
    #[must_use]
    pub fn is_active(&self, session_id: u32) -> bool {
        self.lock()
            .sessions
            .get(&session_id)
            .is_some_and(SessionEntry::is_active)
    }

    /// Number of `active` sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|entry| entry.is_active())
            .count()
    }

    /// Record a health check result. No-op for unknown sessions.
    ///
    /// A healthy check also clears the recovery counter.
    pub fn update_health(&self, session_id: u32, is_healthy: bool) {
        let mut state = self.lock();
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            entry.last_health_check = Some(Utc::now());
            if is_healthy {
                entry.status = SessionStatus::Active;
                entry.recovery_count = 0;
            } else {
                entry.status = SessionStatus::Error;
            }
            debug!(session_id, is_healthy, "session health updated");
        }
    }

    /// Record a successful recovery: bump the counter and reactivate.
    pub fn record_recovery(&self, session_id: u32) {
        let mut state = self.lock();
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            let now = Utc::now();
            entry.status = SessionStatus::Active;
            entry.recovery_count += 1;
            entry.last_recovery = Some(now);
            entry.last_health_check = Some(now);
        }
    }

    /// Force a status. Returns `false` for unknown sessions.
    pub fn set_status(&self, session_id: u32, status: SessionStatus) -> bool {
        let mut state = self.lock();
        match state.sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    /// Remember the launch parameters used for a session's backend process.
    pub fn set_launch_params(&self, session_id: u32, work_dir: &str, options: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            entry.work_dir = Some(work_dir.to_owned());
            entry.launch_options = Some(options.to_owned());
        }
    }

    /// Session used when a channel has no mapping.
    #[must_use]
    pub fn default_session_id(&self) -> u32 {
        self.default_session
    }

    /// Aggregate counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        let count = |status| {
            state
                .sessions
                .values()
                .filter(|entry| entry.status == status)
                .count()
        };
        RegistryStats {
            total: state.sessions.len(),
            active: count(SessionStatus::Active),
            error: count(SessionStatus::Error),
            channels_mapped: state.channel_map.len(),
        }
    }

    /// Delete the attachment directory of a removed session.
    ///
    /// Returns `Ok(false)` if there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` while the session is still
    /// registered, or `AppError::Io` if the directory cannot be removed.
    pub fn purge_artifacts(&self, attachments_root: &Path, session_id: u32) -> Result<bool> {
        if self.lock().sessions.contains_key(&session_id) {
            return Err(AppError::InvalidRequest(format!(
                "session {session_id} is still registered; remove it first"
            )));
        }

        let dir = attachments_root.join(format!("session_{session_id}"));
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(session_id, dir = %dir.display(), "session artifacts purged");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::Io(format!(
                "failed to purge {}: {err}",
                dir.display()
            ))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // State is restored before any error return, so a poisoned guard
        // still holds a consistent snapshot.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_state(path: &Path) -> Result<RegistryState> {
    let raw: BTreeMap<String, String> = read_json(path)?.unwrap_or_default();
    let mut state = RegistryState::default();

    for (key, channel_id) in raw {
        let session_id = match key.parse::<u32>() {
            Ok(id) if id > 0 => id,
            _ => {
                warn!(key, "invalid session id in mapping file, skipping");
                continue;
            }
        };
        if let Some(other) = state.channel_map.get(&channel_id) {
            warn!(
                session_id,
                other,
                channel_id,
                "channel mapped twice in mapping file, keeping the first"
            );
            continue;
        }
        state.channel_map.insert(channel_id.clone(), session_id);
        state
            .sessions
            .insert(session_id, SessionEntry::new(session_id, channel_id));
    }

    Ok(state)
}

fn persist(path: &Path, state: &RegistryState) -> Result<()> {
    let mapping: BTreeMap<u32, &str> = state
        .sessions
        .values()
        .map(|entry| (entry.session_id, entry.channel_id.as_str()))
        .collect();
    write_json_atomic(path, &mapping)?;
    debug!(count = mapping.len(), "session mapping persisted");
    Ok(())
}
