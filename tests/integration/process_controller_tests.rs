//! Backend session lifecycle through `ProcessSessionController` over an
//! in-memory multiplexer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use agent_bridge::models::session::SessionStatus;
use agent_bridge::multiplexer::Multiplexer;
use agent_bridge::orchestrator::process_controller::ProcessSessionController;
use agent_bridge::AppError;

use super::test_helpers::{controller_settings, session_name, FakeMultiplexer, OPTIONS, WORK_DIR};

fn controller() -> (Arc<FakeMultiplexer>, ProcessSessionController) {
    let mux = FakeMultiplexer::new();
    let controller = ProcessSessionController::new(
        Arc::clone(&mux) as Arc<dyn Multiplexer>,
        controller_settings(),
    );
    (mux, controller)
}

#[tokio::test]
async fn create_on_existing_session_does_not_relaunch() {
    let (mux, controller) = controller();
    mux.insert_live(&session_name(5));

    controller
        .create(5, "/work", "--flag")
        .await
        .expect("create is a no-op success");

    assert!(mux.create_calls().is_empty(), "no duplicate session launched");
    assert!(controller.exists(5).await);
}

#[tokio::test]
async fn create_launches_agent_in_work_dir() {
    let (mux, controller) = controller();

    controller
        .create(1, "/srv/it's here", "--verbose")
        .await
        .expect("create");

    let calls = mux.create_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "claude-session-1");
    assert_eq!(calls[0].1, r"cd '/srv/it'\''s here' && claude --verbose");

    let info = controller.cached(1).expect("cached");
    assert_eq!(info.status, SessionStatus::Active);
    assert!(info.running);
    assert_eq!(info.work_dir.as_deref(), Some("/srv/it's here"));
    assert_eq!(info.options.as_deref(), Some("--verbose"));
    assert!(info.created_at.is_some());
}

#[tokio::test]
async fn failed_launch_is_reported() {
    let (mux, controller) = controller();
    mux.fail_creates(&session_name(1));

    let err = controller
        .create(1, WORK_DIR, OPTIONS)
        .await
        .expect_err("launch fails");
    assert!(matches!(err, AppError::LaunchFailure(_)), "got {err}");
    assert!(controller.cached(1).is_none());
}

#[tokio::test]
async fn kill_is_idempotent() {
    let (mux, controller) = controller();
    controller.kill(3).await.expect("absent session kill succeeds");
    assert!(mux.kill_calls().is_empty());

    controller.create(3, WORK_DIR, OPTIONS).await.expect("create");
    controller.kill(3).await.expect("kill");
    assert!(!mux.is_live(&session_name(3)));
    assert_eq!(
        controller.cached(3).expect("cached").status,
        SessionStatus::Stopped
    );

    controller.kill(3).await.expect("second kill succeeds");
    assert_eq!(mux.kill_calls().len(), 1);
}

#[tokio::test]
async fn exists_marks_vanished_session_stopped() {
    let (mux, controller) = controller();
    controller.create(1, WORK_DIR, OPTIONS).await.expect("create");
    mux.crash(&session_name(1));

    assert!(!controller.exists(1).await);
    let info = controller.cached(1).expect("cached");
    assert_eq!(info.status, SessionStatus::Stopped);
    assert!(!info.running);
    assert!(info.last_checked.is_some());
}

#[tokio::test]
async fn multiplexer_timeout_counts_as_unhealthy() {
    let (mux, controller) = controller();
    controller.create(1, WORK_DIR, OPTIONS).await.expect("create");
    mux.set_exists_errors(true);

    assert!(!controller.health(1).await);
}

#[tokio::test]
async fn list_active_filters_prefix_and_sorts() {
    let (mux, controller) = controller();
    for name in [
        "claude-session-10",
        "claude-session-2",
        "claude-session-x",
        "claude-session-",
        "scratch",
    ] {
        mux.insert_live(name);
    }

    let active = controller.list_active().await.expect("list");
    assert_eq!(
        active,
        vec![
            (2, "claude-session-2".to_owned()),
            (10, "claude-session-10".to_owned()),
        ]
    );
    assert!(controller.cached(10).expect("cache refreshed").running);
}

#[tokio::test]
async fn initialize_seeds_cache_from_live_sessions() {
    let (mux, controller) = controller();
    mux.insert_live(&session_name(3));

    controller.initialize().await;

    let info = controller.cached(3).expect("seeded");
    assert_eq!(info.status, SessionStatus::Active);
    assert!(info.running);
}

#[tokio::test]
async fn kill_all_only_touches_prefixed_sessions() {
    let (mux, controller) = controller();
    mux.insert_live(&session_name(1));
    mux.insert_live(&session_name(2));
    mux.insert_live("scratch");

    let killed = controller.kill_all().await.expect("kill all");

    assert_eq!(killed, vec![1, 2]);
    assert!(mux.is_live("scratch"));
    assert!(!mux.is_live(&session_name(1)));
}

#[tokio::test]
async fn recover_without_launch_params_is_unknown_session() {
    let (mux, controller) = controller();

    let err = controller
        .recover(9, 3, &CancellationToken::new())
        .await
        .expect_err("no cache entry");
    assert!(matches!(err, AppError::UnknownSession(_)), "got {err}");
    assert!(mux.create_calls().is_empty());
}

#[tokio::test]
async fn forgotten_session_cannot_be_recovered() {
    let (mux, controller) = controller();
    controller.create(4, WORK_DIR, OPTIONS).await.expect("create");
    controller.kill(4).await.expect("kill");
    controller.forget(4);

    assert!(controller.cached(4).is_none());
    assert!(!controller.is_recovering(4));
    let err = controller
        .recover(4, 3, &CancellationToken::new())
        .await
        .expect_err("forgotten");
    assert!(matches!(err, AppError::UnknownSession(_)), "got {err}");
    assert_eq!(mux.create_count(&session_name(4)), 1);
}

#[tokio::test]
async fn recover_relaunches_with_cached_params() {
    let (mux, controller) = controller();
    controller.create(1, "/a", "--one").await.expect("create");

    controller
        .recover(1, 3, &CancellationToken::new())
        .await
        .expect("recover");

    assert_eq!(mux.kill_calls(), vec![session_name(1)]);
    let calls = mux.create_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, "cd '/a' && claude --one");

    let info = controller.cached(1).expect("cached");
    assert_eq!(info.status, SessionStatus::Recovered);
    assert_eq!(info.recovery_count, 1);
    assert_eq!(info.recovery_attempts, 1);
    assert!(info.last_recovery.is_some());
}

#[tokio::test]
async fn recover_makes_at_most_max_retries_attempts() {
    let (mux, controller) = controller();
    controller.set_launch_params(1, WORK_DIR, OPTIONS);
    mux.fail_creates(&session_name(1));

    let err = controller
        .recover(1, 3, &CancellationToken::new())
        .await
        .expect_err("recovery exhausts");

    assert!(matches!(err, AppError::RecoveryFailed(_)), "got {err}");
    assert!(err.to_string().contains("3 attempt"), "got {err}");
    assert_eq!(mux.create_count(&session_name(1)), 3);

    let info = controller.cached(1).expect("cached");
    assert_eq!(info.status, SessionStatus::RecoveryFailed);
    assert_eq!(info.recovery_attempts, 3);
    assert_eq!(info.recovery_count, 0);
}

#[tokio::test]
async fn recover_succeeds_after_transient_failure() {
    let (mux, controller) = controller();
    controller.set_launch_params(1, WORK_DIR, OPTIONS);
    mux.fail_next_creates(&session_name(1), 1);

    controller
        .recover(1, 3, &CancellationToken::new())
        .await
        .expect("second attempt succeeds");

    assert_eq!(mux.create_count(&session_name(1)), 2);
    assert_eq!(controller.cached(1).expect("cached").recovery_attempts, 2);
}

#[tokio::test]
async fn cancelled_recovery_stops_between_attempts() {
    let (mux, controller) = controller();
    controller.set_launch_params(1, WORK_DIR, OPTIONS);
    mux.fail_creates(&session_name(1));
    let cancel = CancellationToken::new();
    cancel.cancel();

    controller
        .recover(1, 3, &cancel)
        .await
        .expect_err("cancelled");

    assert_eq!(mux.create_count(&session_name(1)), 1);
}

#[tokio::test]
async fn recovery_of_one_session_leaves_others_untouched() {
    let (mux, controller) = controller();
    controller.create(1, WORK_DIR, OPTIONS).await.expect("create 1");
    controller.create(2, "/other", "--two").await.expect("create 2");
    let before = controller.cached(2).expect("cached 2");
    mux.fail_creates(&session_name(1));

    let _ = controller.recover(1, 2, &CancellationToken::new()).await;
    controller.kill(1).await.expect("kill 1");

    let after = controller.cached(2).expect("cached 2");
    assert_eq!(after.status, before.status);
    assert_eq!(after.work_dir, before.work_dir);
    assert_eq!(after.options, before.options);
    assert_eq!(after.recovery_count, before.recovery_count);
    assert!(mux.is_live(&session_name(2)));
    assert_eq!(mux.create_count(&session_name(2)), 1);
}

#[tokio::test]
async fn send_message_types_text_then_enter() {
    let (mux, controller) = controller();
    controller.create(1, WORK_DIR, OPTIONS).await.expect("create");

    controller
        .send_message(1, "hello agent")
        .await
        .expect("send");

    assert_eq!(
        mux.sent(),
        vec![
            (session_name(1), "hello agent".to_owned(), true),
            (session_name(1), "Enter".to_owned(), false),
        ]
    );
}

#[tokio::test]
async fn send_message_to_dead_session_fails() {
    let (mux, controller) = controller();

    let err = controller
        .send_message(4, "hello")
        .await
        .expect_err("not running");
    assert!(matches!(err, AppError::UnknownSession(_)), "got {err}");
    assert!(mux.sent().is_empty());
}

#[tokio::test]
async fn all_statuses_unions_cache_and_live() {
    let (mux, controller) = controller();
    controller.set_launch_params(1, WORK_DIR, OPTIONS);
    mux.insert_live(&session_name(3));

    let statuses = controller.all_statuses().await.expect("statuses");
    let ids: Vec<u32> = statuses.iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(!statuses[0].running);
    assert!(statuses[1].running);
}

#[tokio::test]
async fn detailed_status_of_unknown_session() {
    let (_mux, controller) = controller();
    let info = controller.detailed_status(8).await;
    assert_eq!(info.session_name, "claude-session-8");
    assert_eq!(info.status, SessionStatus::Stopped);
    assert!(!info.running);
}

#[test]
fn session_names_round_trip() {
    let (_mux, controller) = controller();
    assert_eq!(controller.session_name(12), "claude-session-12");
    assert_eq!(controller.parse_session_id("claude-session-12"), Some(12));
    assert_eq!(controller.parse_session_id("claude-session-"), None);
    assert_eq!(controller.parse_session_id("other-12"), None);
    assert_eq!(controller.parse_session_id("claude-session-+5"), None);
    assert_eq!(controller.parse_session_id("claude-session-05"), None);
    assert_eq!(controller.parse_session_id("claude-session-0"), Some(0));
}
