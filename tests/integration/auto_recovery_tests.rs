//! Health supervision: sweeps, bounded automatic recovery, notifications,
//! persisted history, and worker start/stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use agent_bridge::models::recovery::RecoveryAttempt;
use agent_bridge::models::session::SessionStatus;
use agent_bridge::orchestrator::auto_recovery::MonitorSettings;
use agent_bridge::orchestrator::recovery_strategy::RecoveryStrategy;
use agent_bridge::AppError;

use super::test_helpers::{fast_monitor_settings, session_name, Harness};

#[tokio::test]
async fn healthy_sessions_produce_no_records() {
    let h = Harness::new();
    let id = h.add_running("chan-A").await;

    let records = h
        .monitor
        .sweep(&CancellationToken::new())
        .await
        .expect("sweep");

    assert_eq!(records, 0);
    assert!(h.history.is_empty().await);
    assert!(h.notifier.messages().is_empty());
    assert!(h.registry.get(id).expect("entry").last_health_check.is_some());
}

#[tokio::test]
async fn dead_session_is_recovered_and_reported() {
    let h = Harness::new();
    let id = h.add_running("chan-A").await;
    h.mux.crash(&session_name(id));

    let records = h
        .monitor
        .sweep(&CancellationToken::new())
        .await
        .expect("sweep");

    assert_eq!(records, 1);
    assert!(h.mux.is_live(&session_name(id)));
    assert_eq!(h.monitor.attempt_count(id), 0);

    let entry = h.registry.get(id).expect("entry");
    assert_eq!(entry.status, SessionStatus::Active);
    assert_eq!(entry.recovery_count, 1);

    let history = h.history.for_session(id).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].attempt_number, 1);

    let notes = h.notifier.for_session(id);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("recovered"), "got {notes:?}");
}

#[tokio::test]
async fn repeated_failures_end_in_single_failure_notification() {
    let h = Harness::new();
    let healthy = h.add_running("chan-A").await;
    let failing = h.add_stopped("chan-B");
    h.mux.fail_creates(&session_name(failing));
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        h.monitor.sweep(&cancel).await.expect("sweep");
    }

    let history = h.history.for_session(failing).await;
    assert_eq!(history.len(), 3, "one record per recovery invocation");
    assert!(history.iter().all(|a| !a.success));
    let numbers: Vec<u32> = history.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(history[0]
        .error_message
        .as_deref()
        .is_some_and(|msg| msg.starts_with("recovery failed:")));

    assert_eq!(
        h.registry.get(failing).expect("entry").status,
        SessionStatus::RecoveryFailed
    );
    assert_eq!(h.notifier.for_session(failing).len(), 1);
    assert_eq!(h.monitor.attempt_count(failing), 3);
    // Three invocations, three create attempts each.
    assert_eq!(h.mux.create_count(&session_name(failing)), 9);

    assert!(h.history.for_session(healthy).await.is_empty());
    assert_eq!(
        h.registry.get(healthy).expect("entry").status,
        SessionStatus::Active
    );
}

#[tokio::test]
async fn history_is_persisted_after_sweep() {
    let h = Harness::new();
    let id = h.add_stopped("chan-A");
    h.mux.fail_creates(&session_name(id));

    h.monitor
        .sweep(&CancellationToken::new())
        .await
        .expect("sweep");

    let raw = std::fs::read_to_string(h.config.recovery_history_path()).expect("history file");
    let saved: Vec<RecoveryAttempt> = serde_json::from_str(&raw).expect("json array");
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].session_id, id);
    assert!(!saved[0].success);
}

#[tokio::test]
async fn reset_attempts_resumes_supervision() {
    let h = Harness::new();
    let id = h.add_stopped("chan-A");
    h.mux.fail_creates(&session_name(id));
    let cancel = CancellationToken::new();
    for _ in 0..3 {
        h.monitor.sweep(&cancel).await.expect("sweep");
    }
    assert_eq!(
        h.registry.get(id).expect("entry").status,
        SessionStatus::RecoveryFailed
    );

    assert!(h.monitor.reset_attempts(id));
    assert_eq!(h.monitor.attempt_count(id), 0);
    assert!(h.registry.is_active(id));

    h.mux.heal(&session_name(id));
    h.monitor.sweep(&cancel).await.expect("sweep");
    assert!(h.mux.is_live(&session_name(id)));
    assert!(!h.monitor.reset_attempts(id), "nothing left to clear");
}

#[tokio::test]
async fn stats_reflect_history_and_counters() {
    let h = Harness::new();
    let ok = h.add_running("chan-A").await;
    let bad = h.add_stopped("chan-B");
    h.mux.crash(&session_name(ok));
    h.mux.fail_creates(&session_name(bad));

    h.monitor
        .sweep(&CancellationToken::new())
        .await
        .expect("sweep");
    let stats = h.monitor.stats().await;

    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.successful, 1);
    assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
    assert_eq!(stats.recent_24h, 2);
    assert!(!stats.monitoring);
    assert_eq!(stats.sessions_with_issues, vec![bad]);
}

#[tokio::test]
async fn recover_now_unknown_session() {
    let h = Harness::new();
    let err = h.monitor.recover_now(4).await.expect_err("not registered");
    assert!(matches!(err, AppError::UnknownSession(_)), "got {err}");
}

#[tokio::test]
async fn recover_now_relaunches_and_records() {
    let h = Harness::new();
    let id = h.add_running("chan-A").await;

    h.monitor.recover_now(id).await.expect("manual recovery");

    assert!(h.mux.is_live(&session_name(id)));
    assert_eq!(h.registry.get(id).expect("entry").recovery_count, 1);
    let history = h.history.for_session(id).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert!(h.config.recovery_history_path().exists());
}

#[tokio::test]
async fn start_is_idempotent_and_stop_joins() {
    let h = Harness::new();

    assert!(h.monitor.start());
    assert!(!h.monitor.start(), "second start is a no-op");
    assert!(h.monitor.is_running());

    h.monitor.stop().await;
    assert!(!h.monitor.is_running());
    h.monitor.stop().await;

    assert!(h.monitor.start(), "fresh start after stop");
    h.monitor.stop().await;
    assert!(!h.monitor.is_running());
}

#[tokio::test]
async fn background_loop_recovers_crashed_session() {
    let h = Harness::new();
    let id = h.add_running("chan-A").await;
    h.mux.crash(&session_name(id));

    h.monitor.start();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !h.mux.is_live(&session_name(id)) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.monitor.stop().await;

    assert!(h.mux.is_live(&session_name(id)));
    assert_eq!(h.registry.get(id).expect("entry").recovery_count, 1);
}

#[tokio::test]
async fn stop_interrupts_long_backoff() {
    let strategy = RecoveryStrategy::new(Duration::from_secs(30), Duration::from_secs(60), 3);
    let settings = MonitorSettings {
        interval: Duration::from_millis(10),
        stop_timeout: Duration::from_secs(10),
        ..fast_monitor_settings()
    };
    let h = Harness::with_strategy(strategy, settings);
    let id = h.add_stopped("chan-A");
    h.mux.fail_creates(&session_name(id));

    h.monitor.start();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.monitor.attempt_count(id) == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.monitor.attempt_count(id), 1);
    // The second invocation is now waiting out a 60s backoff.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    h.monitor.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop took {:?}",
        started.elapsed()
    );
    assert_eq!(h.history.for_session(id).await.len(), 1);
}

#[tokio::test]
async fn session_removed_during_backoff_is_not_relaunched() {
    let strategy = RecoveryStrategy::new(Duration::from_millis(400), Duration::from_secs(1), 3);
    let h = Harness::with_strategy(strategy, fast_monitor_settings());
    let id = h.add_running("chan-A").await;
    let name = session_name(id);
    h.mux.crash(&name);
    h.mux.fail_next_creates(&name, 3);

    h.monitor
        .sweep(&CancellationToken::new())
        .await
        .expect("first sweep");
    assert_eq!(h.monitor.attempt_count(id), 1);
    let creates_before = h.mux.create_count(&name);

    let monitor = Arc::clone(&h.monitor);
    let sweep = tokio::spawn(async move { monitor.sweep(&CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.registry.remove(id).expect("remove"));
    h.controller.forget(id);

    let records = sweep.await.expect("join").expect("second sweep");
    assert_eq!(records, 0);
    assert!(!h.mux.is_live(&name));
    assert_eq!(h.mux.create_count(&name), creates_before);
    assert!(h.notifier.for_session(id).is_empty());
}
