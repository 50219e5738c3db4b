use agent_bridge::models::recovery::RecoveryAttempt;
use agent_bridge::persistence::history::RecoveryHistory;

#[tokio::test]
async fn append_drops_oldest_beyond_cap() {
    let temp = tempfile::tempdir().expect("tempdir");
    let history = RecoveryHistory::load(temp.path().join("history.json"), 3);

    for n in 1..=5 {
        history.append(RecoveryAttempt::succeeded(1, n, 0.1)).await;
    }

    let numbers: Vec<u32> = history
        .entries()
        .await
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, vec![3, 4, 5]);
}

#[tokio::test]
async fn save_and_reload_round_trip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("logs").join("recovery_history.json");
    let history = RecoveryHistory::load(path.clone(), 10);
    history.append(RecoveryAttempt::succeeded(1, 1, 0.5)).await;
    history
        .append(RecoveryAttempt::failed(2, 1, "launch failure: boom".into(), 2.0))
        .await;
    history.save().await.expect("save");

    let reloaded = RecoveryHistory::load(path, 10);
    let entries = reloaded.entries().await;
    assert_eq!(entries.len(), 2);
    assert!(entries[0].success);
    assert_eq!(entries[1].error_message.as_deref(), Some("launch failure: boom"));
}

#[tokio::test]
async fn reload_keeps_only_newest_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("history.json");
    let history = RecoveryHistory::load(path.clone(), 100);
    for n in 1..=10 {
        history.append(RecoveryAttempt::succeeded(1, n, 0.0)).await;
    }
    history.save().await.expect("save");

    let capped = RecoveryHistory::load(path, 4);
    let first = capped.entries().await.first().map(|a| a.attempt_number);
    assert_eq!(capped.len().await, 4);
    assert_eq!(first, Some(7));
}

#[tokio::test]
async fn corrupt_file_starts_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("history.json");
    std::fs::write(&path, "[{ truncated").expect("seed");

    let history = RecoveryHistory::load(path, 10);
    assert!(history.is_empty().await);
}

#[tokio::test]
async fn counts_and_per_session_filter() {
    let temp = tempfile::tempdir().expect("tempdir");
    let history = RecoveryHistory::load(temp.path().join("history.json"), 10);
    history.append(RecoveryAttempt::succeeded(1, 1, 0.1)).await;
    history
        .append(RecoveryAttempt::failed(2, 1, "x".into(), 0.1))
        .await;
    history
        .append(RecoveryAttempt::failed(2, 2, "y".into(), 0.1))
        .await;

    assert_eq!(history.counts().await, (3, 1, 3));
    assert_eq!(history.for_session(2).await.len(), 2);
    assert!(history.for_session(3).await.is_empty());
}

#[test]
fn success_record_omits_error_message() {
    let json = serde_json::to_value(RecoveryAttempt::succeeded(4, 1, 1.5)).expect("serialize");
    assert!(json.get("error_message").is_none());
    assert_eq!(json["session_id"], 4);
    assert_eq!(json["success"], true);
}
