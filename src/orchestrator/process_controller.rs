//! Backend process session lifecycle: create, check, kill, list, recover.
//!
//! Each registry session id owns one multiplexer session named
//! `<prefix>-<id>` running one agent process. The controller keeps a cache
//! of launch parameters and last-observed state per id; the live
//! multiplexer list is the ground truth and [`ProcessSessionController::list_active`]
//! is the reconciliation point.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::session::SessionStatus;
use crate::multiplexer::Multiplexer;
use crate::{AppError, Result};

/// Static settings for the controller, derived from configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Multiplexer session name prefix.
    pub session_prefix: String,
    /// Agent executable.
    pub agent_binary: String,
    /// Working directory used when a session has none cached.
    pub default_work_dir: String,
    /// Agent options used when a session has none cached.
    pub default_options: String,
    /// Fixed pause between create attempts inside one recovery.
    pub retry_delay: Duration,
    /// Pause between typing a message and pressing Enter.
    pub send_keys_delay: Duration,
}

impl ControllerSettings {
    /// Build settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            session_prefix: config.multiplexer.session_prefix.clone(),
            agent_binary: config.agent.binary.clone(),
            default_work_dir: config.agent.work_dir.clone(),
            default_options: config.agent.options.clone(),
            retry_delay: Duration::from_secs(config.recovery.retry_delay_seconds),
            send_keys_delay: Duration::from_millis(config.multiplexer.send_keys_delay_millis),
        }
    }
}

/// Cached runtime metadata for one backend session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessSessionInfo {
    /// Registry session id.
    pub session_id: u32,
    /// Derived multiplexer session name.
    pub session_name: String,
    /// Last known state.
    pub status: SessionStatus,
    /// Whether the last check found the multiplexer session alive.
    pub running: bool,
    /// Working directory of the last launch.
    pub work_dir: Option<String>,
    /// Agent options of the last launch.
    pub options: Option<String>,
    /// When the controller last launched this session.
    pub created_at: Option<DateTime<Utc>>,
    /// When the multiplexer was last asked about this session.
    pub last_checked: Option<DateTime<Utc>>,
    /// Last successful recovery.
    pub last_recovery: Option<DateTime<Utc>>,
    /// Successful recoveries.
    pub recovery_count: u32,
    /// Attempts used by the most recent recovery.
    pub recovery_attempts: u32,
}

impl ProcessSessionInfo {
    fn new(session_id: u32, session_name: String) -> Self {
        Self {
            session_id,
            session_name,
            status: SessionStatus::Stopped,
            running: false,
            work_dir: None,
            options: None,
            created_at: None,
            last_checked: None,
            last_recovery: None,
            recovery_count: 0,
            recovery_attempts: 0,
        }
    }
}

/// Manages one multiplexer session per registry session id.
pub struct ProcessSessionController {
    mux: Arc<dyn Multiplexer>,
    settings: ControllerSettings,
    cache: Mutex<HashMap<u32, ProcessSessionInfo>>,
    recovery_locks: Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessSessionController {
    /// Construct a controller with an empty cache. Call
    /// [`initialize`](Self::initialize) to seed it from the live session list.
    #[must_use]
    pub fn new(mux: Arc<dyn Multiplexer>, settings: ControllerSettings) -> Self {
        Self {
            mux,
            settings,
            cache: Mutex::new(HashMap::new()),
            recovery_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the cache from the multiplexer's live sessions.
    ///
    /// Failures are logged; the cache then starts empty.
    pub async fn initialize(&self) {
        match self.list_active().await {
            Ok(sessions) => info!(count = sessions.len(), "loaded live agent sessions"),
            Err(err) => error!(%err, "failed to load live agent sessions"),
        }
    }

    /// Derived multiplexer name for a session id.
    #[must_use]
    pub fn session_name(&self, session_id: u32) -> String {
        format!("{}-{session_id}", self.settings.session_prefix)
    }

    /// Extract the session id from a multiplexer name carrying our prefix.
    #[must_use]
    pub fn parse_session_id(&self, name: &str) -> Option<u32> {
        name.strip_prefix(self.settings.session_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|digits| {
                digits
                    .parse::<u32>()
                    .ok()
                    .filter(|id| id.to_string() == digits)
            })
    }

    /// Shell command that enters `work_dir` and starts the agent.
    #[must_use]
    pub fn launch_command(&self, work_dir: &str, options: &str) -> String {
        format!(
            "cd {} && {} {}",
            shell_quote(work_dir),
            self.settings.agent_binary,
            options
        )
        .trim_end()
        .to_owned()
    }

    /// Whether the backend session currently exists.
    ///
    /// Multiplexer errors, including timeouts, count as "absent".
    pub async fn exists(&self, session_id: u32) -> bool {
        let name = self.session_name(session_id);
        let exists = match self.mux.session_exists(&name).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(session_id, %err, "session existence check failed");
                false
            }
        };

        let mut cache = self.lock_cache();
        if let Some(info) = cache.get_mut(&session_id) {
            info.last_checked = Some(Utc::now());
            info.running = exists;
            if !exists {
                info.status = SessionStatus::Stopped;
            }
        }
        exists
    }

    /// Health check; a session is healthy when its multiplexer session exists.
    pub async fn health(&self, session_id: u32) -> bool {
        self.exists(session_id).await
    }

    /// Launch the backend session unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LaunchFailure` (or the multiplexer's timeout error)
    /// if the session could not be started.
    pub async fn create(&self, session_id: u32, work_dir: &str, options: &str) -> Result<()> {
        if self.exists(session_id).await {
            info!(session_id, "agent session already exists");
            return Ok(());
        }

        let name = self.session_name(session_id);
        let command = self.launch_command(work_dir, options);
        if let Err(err) = self.mux.create_session(&name, &command).await {
            error!(session_id, %err, "failed to create agent session");
            return Err(err);
        }

        let now = Utc::now();
        let mut cache = self.lock_cache();
        let info = cache
            .entry(session_id)
            .or_insert_with(|| ProcessSessionInfo::new(session_id, name.clone()));
        info.status = SessionStatus::Active;
        info.running = true;
        info.work_dir = Some(work_dir.to_owned());
        info.options = Some(options.to_owned());
        info.created_at = Some(now);
        info.last_checked = Some(now);

        info!(session_id, session_name = %name, "agent session created");
        Ok(())
    }

    /// Terminate the backend session. Absent sessions count as success.
    ///
    /// # Errors
    ///
    /// Returns the multiplexer error if termination was rejected.
    pub async fn kill(&self, session_id: u32) -> Result<()> {
        if !self.exists(session_id).await {
            debug!(session_id, "agent session already absent");
            return Ok(());
        }

        let name = self.session_name(session_id);
        self.mux
            .kill_session(&name)
            .await
            .inspect_err(|err| error!(session_id, %err, "failed to kill agent session"))?;
        self.mark_stopped(session_id);

        info!(session_id, session_name = %name, "agent session killed");
        Ok(())
    }

    /// Kill every session carrying our prefix; one failure does not stop
    /// the rest. Returns the ids actually killed.
    ///
    /// # Errors
    ///
    /// Returns the multiplexer error if the live session list is unavailable.
    pub async fn kill_all(&self) -> Result<Vec<u32>> {
        let sessions = self.list_active().await?;
        let mut killed = Vec::with_capacity(sessions.len());

        for (session_id, name) in sessions {
            match self.mux.kill_session(&name).await {
                Ok(()) => {
                    self.mark_stopped(session_id);
                    killed.push(session_id);
                    info!(session_id, "agent session killed");
                }
                Err(err) => {
                    error!(session_id, %err, "failed to kill agent session");
                }
            }
        }

        info!(count = killed.len(), "killed agent sessions");
        Ok(killed)
    }

    /// Live sessions carrying our prefix, ascending by id. Refreshes the cache.
    ///
    /// # Errors
    ///
    /// Returns the multiplexer error if the session list is unavailable.
    pub async fn list_active(&self) -> Result<Vec<(u32, String)>> {
        let names = self.mux.list_sessions().await?;
        let prefix = format!("{}-", self.settings.session_prefix);

        let mut sessions: Vec<(u32, String)> = names
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .filter_map(|name| match self.parse_session_id(&name) {
                Some(id) => Some((id, name)),
                None => {
                    warn!(session_name = %name, "invalid agent session name, skipping");
                    None
                }
            })
            .collect();
        sessions.sort_by_key(|(id, _)| *id);

        let now = Utc::now();
        let mut cache = self.lock_cache();
        for info in cache.values_mut() {
            info.running = false;
        }
        for (session_id, name) in &sessions {
            let info = cache
                .entry(*session_id)
                .or_insert_with(|| ProcessSessionInfo::new(*session_id, name.clone()));
            if info.status != SessionStatus::Recovered {
                info.status = SessionStatus::Active;
            }
            info.running = true;
            info.last_checked = Some(now);
        }

        debug!(count = sessions.len(), "listed agent sessions");
        Ok(sessions)
    }

    /// Kill and relaunch a session with its cached launch parameters,
    /// making at most `max_retries` create attempts `retry_delay` apart.
    ///
    /// Recoveries of the same id are serialized; a cancelled `cancel` token
    /// aborts between attempts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if the session has never been
    /// launched or registered with [`set_launch_params`](Self::set_launch_params),
    /// and `AppError::RecoveryFailed` once all attempts are exhausted.
    pub async fn recover(
        &self,
        session_id: u32,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lock = self.recovery_lock(session_id);
        let _serialized = lock.lock().await;

        self.recover_locked(session_id, max_retries, cancel)
            .instrument(info_span!("recover_session", session_id, max_retries))
            .await
    }

    async fn recover_locked(
        &self,
        session_id: u32,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.cached(session_id).is_none() {
            error!(session_id, "session not in cache, cannot recover");
            return Err(AppError::UnknownSession(format!(
                "session {session_id} has no launch parameters"
            )));
        }

        info!(session_id, max_retries, "starting session recovery");
        if let Err(err) = self.kill(session_id).await {
            warn!(session_id, %err, "failed to kill existing session before recovery");
        }

        let mut last_error = String::from("no attempt made");
        for attempt in 1..=max_retries {
            info!(session_id, attempt, max_retries, "recovery attempt");

            let (work_dir, options) = self.launch_params(session_id).ok_or_else(|| {
                AppError::UnknownSession(format!("session {session_id} left the cache"))
            })?;

            match self.create(session_id, &work_dir, &options).await {
                Ok(()) => {
                    if self.health(session_id).await {
                        self.mark_recovered(session_id, attempt);
                        info!(session_id, attempt, "session recovered");
                        return Ok(());
                    }
                    warn!(session_id, attempt, "session created but health check failed");
                    last_error = "health check failed after relaunch".to_owned();
                }
                Err(err) => {
                    warn!(session_id, attempt, %err, "recovery attempt failed");
                    last_error = err.to_string();
                }
            }

            if attempt < max_retries {
                tokio::select! {
                    () = cancel.cancelled() => {
                        warn!(session_id, attempt, "recovery cancelled");
                        return Err(AppError::RecoveryFailed(format!(
                            "recovery of session {session_id} cancelled after {attempt} attempt(s)"
                        )));
                    }
                    () = tokio::time::sleep(self.settings.retry_delay) => {}
                }
            }
        }

        if let Some(info) = self.lock_cache().get_mut(&session_id) {
            info.status = SessionStatus::RecoveryFailed;
            info.recovery_attempts = max_retries;
        }
        error!(session_id, max_retries, "session recovery exhausted");
        Err(AppError::RecoveryFailed(format!(
            "session {session_id} not recovered after {max_retries} attempt(s): {last_error}"
        )))
    }

    /// Whether a recovery of this id is currently running.
    #[must_use]
    pub fn is_recovering(&self, session_id: u32) -> bool {
        let locks = self
            .recovery_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let busy = locks
            .get(&session_id)
            .is_some_and(|lock| lock.try_lock().is_err());
        busy
    }

    /// Drop all cached state for a session that left the registry.
    ///
    /// After this, [`recover`](Self::recover) reports the id as unknown
    /// until it is launched or registered again. Does not touch the
    /// backend process; call [`kill`](Self::kill) first.
    pub fn forget(&self, session_id: u32) {
        let cached = self.lock_cache().remove(&session_id).is_some();
        self.recovery_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
        debug!(session_id, cached, "session state forgotten");
    }

    /// Type `text` into the session and press Enter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if the backend session is not
    /// running, or the multiplexer error if input was rejected.
    pub async fn send_message(&self, session_id: u32, text: &str) -> Result<()> {
        if !self.exists(session_id).await {
            return Err(AppError::UnknownSession(format!(
                "agent session {} is not running",
                self.session_name(session_id)
            )));
        }

        let name = self.session_name(session_id);
        self.mux.send_keys(&name, text, true).await?;
        tokio::time::sleep(self.settings.send_keys_delay).await;
        self.mux.send_keys(&name, "Enter", false).await?;

        info!(session_id, chars = text.chars().count(), "message forwarded");
        Ok(())
    }

    /// Register launch parameters for a session without launching it.
    pub fn set_launch_params(&self, session_id: u32, work_dir: &str, options: &str) {
        let name = self.session_name(session_id);
        let mut cache = self.lock_cache();
        let info = cache
            .entry(session_id)
            .or_insert_with(|| ProcessSessionInfo::new(session_id, name));
        info.work_dir = Some(work_dir.to_owned());
        info.options = Some(options.to_owned());
    }

    /// Cached metadata for one session, without querying the multiplexer.
    #[must_use]
    pub fn cached(&self, session_id: u32) -> Option<ProcessSessionInfo> {
        self.lock_cache().get(&session_id).cloned()
    }

    /// Fresh metadata for one session: re-checks liveness first.
    pub async fn detailed_status(&self, session_id: u32) -> ProcessSessionInfo {
        let running = self.exists(session_id).await;
        self.cached(session_id).unwrap_or_else(|| {
            let mut info = ProcessSessionInfo::new(session_id, self.session_name(session_id));
            info.running = running;
            if running {
                info.status = SessionStatus::Active;
            }
            info
        })
    }

    /// Metadata for every cached or live session, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns the multiplexer error if the live session list is unavailable.
    pub async fn all_statuses(&self) -> Result<Vec<ProcessSessionInfo>> {
        let live = self.list_active().await?;
        let mut ids: BTreeSet<u32> = self.lock_cache().keys().copied().collect();
        ids.extend(live.iter().map(|(id, _)| *id));

        let cache = self.lock_cache();
        Ok(ids
            .into_iter()
            .map(|id| {
                cache
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| ProcessSessionInfo::new(id, self.session_name(id)))
            })
            .collect())
    }

    fn launch_params(&self, session_id: u32) -> Option<(String, String)> {
        self.lock_cache().get(&session_id).map(|info| {
            (
                info.work_dir
                    .clone()
                    .unwrap_or_else(|| self.settings.default_work_dir.clone()),
                info.options
                    .clone()
                    .unwrap_or_else(|| self.settings.default_options.clone()),
            )
        })
    }

    fn mark_stopped(&self, session_id: u32) {
        if let Some(info) = self.lock_cache().get_mut(&session_id) {
            info.status = SessionStatus::Stopped;
            info.running = false;
            info.last_checked = Some(Utc::now());
        }
    }

    fn mark_recovered(&self, session_id: u32, attempt: u32) {
        if let Some(info) = self.lock_cache().get_mut(&session_id) {
            info.status = SessionStatus::Recovered;
            info.recovery_count += 1;
            info.last_recovery = Some(Utc::now());
            info.recovery_attempts = attempt;
        }
    }

    fn recovery_lock(&self, session_id: u32) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .recovery_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id).or_default())
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<u32, ProcessSessionInfo>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
