//! Background health supervision with automatic session recovery.
//!
//! One worker task sweeps every active registry entry at a fixed interval.
//! An unhealthy session is handed to [`ProcessSessionController::recover`];
//! successive failed invocations for the same session are paced by
//! [`RecoveryStrategy`] and capped at its attempt limit. Every invocation is
//! appended to the persisted [`RecoveryHistory`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::recovery::{RecoveryAttempt, RecoveryStats};
use crate::models::session::SessionStatus;
use crate::notify::{notify_best_effort, Notifier};
use crate::orchestrator::process_controller::ProcessSessionController;
use crate::orchestrator::recovery_strategy::RecoveryStrategy;
use crate::persistence::history::RecoveryHistory;
use crate::registry::SessionRegistry;
use crate::{AppError, Result};

/// Loop timing for the monitor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Pause between sweeps.
    pub interval: Duration,
    /// Pause after a sweep that failed as a whole.
    pub error_backoff: Duration,
    /// Bound on how long [`AutoRecoveryController::stop`] waits for the worker.
    pub stop_timeout: Duration,
    /// Create attempts per [`ProcessSessionController::recover`] call.
    pub recover_retries: u32,
}

impl MonitorSettings {
    /// Settings from the `[recovery]` table.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.recovery.health_check_interval_seconds),
            error_backoff: Duration::from_secs(config.recovery.error_backoff_seconds),
            stop_timeout: Duration::from_secs(config.recovery.stop_timeout_seconds),
            recover_retries: config.recovery.max_retry_attempts,
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct MonitorCore {
    registry: Arc<SessionRegistry>,
    controller: Arc<ProcessSessionController>,
    notifier: Arc<dyn Notifier>,
    history: Arc<RecoveryHistory>,
    strategy: RecoveryStrategy,
    settings: MonitorSettings,
    attempt_counts: Mutex<HashMap<u32, u32>>,
}

/// Supervises all registered sessions and recovers dead ones.
pub struct AutoRecoveryController {
    core: Arc<MonitorCore>,
    worker: Mutex<Option<Worker>>,
}

impl AutoRecoveryController {
    /// Construct a stopped controller.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        controller: Arc<ProcessSessionController>,
        notifier: Arc<dyn Notifier>,
        history: Arc<RecoveryHistory>,
        strategy: RecoveryStrategy,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                registry,
                controller,
                notifier,
                history,
                strategy,
                settings,
                attempt_counts: Mutex::new(HashMap::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the monitoring worker. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("auto-recovery monitor already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let core = Arc::clone(&self.core);
        let token = cancel.clone();
        let handle = tokio::spawn(
            async move { core.run(token).await }.instrument(info_span!("auto_recovery")),
        );

        *worker = Some(Worker { cancel, handle });
        info!(
            interval_secs = self.core.settings.interval.as_secs(),
            "auto-recovery monitor started"
        );
        true
    }

    /// Signal the worker to exit and wait for it, at most `stop_timeout`.
    ///
    /// A worker that does not finish in time is aborted. No-op when stopped.
    pub async fn stop(&self) {
        let worker = self.lock_worker().take();
        let Some(mut worker) = worker else {
            return;
        };

        worker.cancel.cancel();
        match tokio::time::timeout(self.core.settings.stop_timeout, &mut worker.handle).await {
            Ok(Ok(())) => info!("auto-recovery monitor stopped"),
            Ok(Err(err)) => warn!(%err, "auto-recovery worker ended abnormally"),
            Err(_) => {
                warn!(
                    timeout_secs = self.core.settings.stop_timeout.as_secs(),
                    "auto-recovery worker did not stop in time, aborting"
                );
                worker.handle.abort();
            }
        }
    }

    /// Whether the worker is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Run one sweep over all active sessions now.
    ///
    /// Returns the number of recovery records produced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the recovery history could not be
    /// saved; the records stay in memory for the next save.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<usize> {
        self.core.sweep(cancel).await
    }

    /// Recover one session immediately, outside the monitor's schedule.
    ///
    /// Serialized with the monitor through the controller's per-session
    /// lock. Success clears the session's attempt counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for ids not in the registry, or the
    /// controller's recovery error.
    pub async fn recover_now(&self, session_id: u32) -> Result<()> {
        let core = &self.core;
        if core.registry.get(session_id).is_none() {
            return Err(AppError::UnknownSession(format!(
                "session {session_id} is not registered"
            )));
        }

        let attempt = core.attempt_count(session_id) + 1;
        let started = Instant::now();
        let result = core
            .controller
            .recover(session_id, core.settings.recover_retries, &CancellationToken::new())
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(()) => {
                core.lock_counts().remove(&session_id);
                core.registry.record_recovery(session_id);
                core.history
                    .append(RecoveryAttempt::succeeded(session_id, attempt, elapsed))
                    .await;
                notify_best_effort(
                    core.notifier.as_ref(),
                    &format!("Session {session_id} recovered manually"),
                    Some(session_id),
                )
                .await;
            }
            Err(err) => {
                core.history
                    .append(RecoveryAttempt::failed(session_id, attempt, err.to_string(), elapsed))
                    .await;
            }
        }

        if let Err(err) = core.history.save().await {
            error!(%err, "failed to save recovery history");
        }
        result
    }

    /// Clear a session's attempt counter and resume supervising it.
    ///
    /// Returns `false` if there was no counter to clear.
    pub fn reset_attempts(&self, session_id: u32) -> bool {
        let cleared = self.core.lock_counts().remove(&session_id).is_some();
        if self
            .core
            .registry
            .get(session_id)
            .is_some_and(|entry| entry.status == SessionStatus::RecoveryFailed)
        {
            self.core
                .registry
                .set_status(session_id, SessionStatus::Active);
        }
        info!(session_id, cleared, "recovery attempts reset");
        cleared
    }

    /// Pending failed-invocation count for a session.
    #[must_use]
    pub fn attempt_count(&self, session_id: u32) -> u32 {
        self.core.attempt_count(session_id)
    }

    /// Aggregate statistics over the history and current counters.
    pub async fn stats(&self) -> RecoveryStats {
        let (total_attempts, successful, recent_24h) = self.core.history.counts().await;
        #[allow(clippy::cast_precision_loss)] // Counts are capped by history_max_entries.
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            successful as f64 / total_attempts as f64 * 100.0
        };

        let mut sessions_with_issues: Vec<u32> = self
            .core
            .lock_counts()
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| *id)
            .collect();
        sessions_with_issues.sort_unstable();

        RecoveryStats {
            total_attempts,
            successful,
            success_rate,
            recent_24h,
            monitoring: self.is_running(),
            sessions_with_issues,
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MonitorCore {
    async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wait = match self
                .sweep(&cancel)
                .instrument(info_span!("recovery_sweep"))
                .await
            {
                Ok(records) => {
                    debug!(records, "recovery sweep complete");
                    self.settings.interval
                }
                Err(err) => {
                    error!(%err, "recovery sweep failed");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }
        debug!("auto-recovery loop exited");
    }

    async fn sweep(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut records = 0;

        for entry in self.registry.list_all() {
            if cancel.is_cancelled() {
                break;
            }
            if !entry.is_active() {
                continue;
            }
            if self.check_session(entry.session_id, cancel).await {
                records += 1;
            }
        }

        if records > 0 {
            self.history.save().await?;
        }
        Ok(records)
    }

    /// Health-check one session and recover it if needed. Returns whether a
    /// history record was produced.
    async fn check_session(&self, session_id: u32, cancel: &CancellationToken) -> bool {
        if self.controller.is_recovering(session_id) {
            debug!(session_id, "recovery already in progress, skipping");
            return false;
        }
        if self.registry.get(session_id).is_none() {
            debug!(session_id, "session removed during sweep, skipping");
            return false;
        }

        let healthy =
            self.controller.health(session_id).await && self.registry.is_active(session_id);
        if healthy {
            self.registry.update_health(session_id, true);
            return false;
        }

        let attempt = self.attempt_count(session_id) + 1;
        let max_attempts = self.strategy.max_attempts();
        warn!(session_id, attempt, max_attempts, "session unhealthy");

        if attempt > max_attempts {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!(
                    "Session {session_id} is down and automatic recovery is exhausted; reset it manually"
                ),
                Some(session_id),
            )
            .await;
            return false;
        }

        if attempt > 1 {
            let delay = self.strategy.backoff(attempt);
            info!(session_id, attempt, delay_secs = delay.as_secs(), "backing off before recovery");
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(delay) => {}
            }
            if self.registry.get(session_id).is_none() {
                debug!(session_id, "session removed during backoff, skipping");
                return false;
            }
        }

        let started = Instant::now();
        let result = self
            .controller
            .recover(session_id, self.settings.recover_retries, cancel)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                self.lock_counts().remove(&session_id);
                self.registry.record_recovery(session_id);
                self.history
                    .append(RecoveryAttempt::succeeded(session_id, attempt, elapsed))
                    .await;
                info!(session_id, attempt, "session recovered automatically");
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!("Session {session_id} was down and has been recovered"),
                    Some(session_id),
                )
                .await;
            }
            Err(_) if cancel.is_cancelled() => {
                debug!(session_id, "recovery interrupted by shutdown");
                return false;
            }
            Err(err) => {
                self.lock_counts().insert(session_id, attempt);
                self.history
                    .append(RecoveryAttempt::failed(
                        session_id,
                        attempt,
                        err.to_string(),
                        elapsed,
                    ))
                    .await;
                error!(session_id, attempt, %err, "automatic recovery failed");

                if attempt == max_attempts {
                    self.registry
                        .set_status(session_id, SessionStatus::RecoveryFailed);
                    notify_best_effort(
                        self.notifier.as_ref(),
                        &format!(
                            "Session {session_id} could not be recovered after {attempt} attempts; manual intervention required"
                        ),
                        Some(session_id),
                    )
                    .await;
                }
            }
        }
        true
    }

    fn attempt_count(&self, session_id: u32) -> u32 {
        self.lock_counts().get(&session_id).copied().unwrap_or(0)
    }

    fn lock_counts(&self) -> MutexGuard<'_, HashMap<u32, u32>> {
        self.attempt_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
