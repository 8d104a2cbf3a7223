//! Test: notification policy end to end

use crate::helpers::*;
use cirunner::core::BuildStatus;
use cirunner::execution::ExecutionEvent;
use cirunner::persistence::{InMemoryPersistence, PersistenceBackend};
use std::sync::Arc;

const CHANGE_CONFIG: &str = r#"
notifications:
  email:
    recipients: dev@example.org
    on_success: change
    on_failure: change
script: pytest
"#;

#[tokio::test]
async fn test_passing_reference_build_sends_nothing() {
    let notifier = RecordingNotifier::new();
    let result = run_build(REFERENCE_CONFIG, MockRunner::new(), notifier.clone(), None).await;

    assert_eq!(result.status, BuildStatus::Passed);
    assert!(notifier.sent().is_empty());
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::NotificationSuppressed { .. })));
}

#[tokio::test]
async fn test_failing_reference_build_sends_one_message_to_both() {
    let notifier = RecordingNotifier::new();
    let runner = MockRunner::new().exit_with("pytest .", 1);
    let result = run_build(REFERENCE_CONFIG, runner, notifier.clone(), None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);

    let (report, recipients) = &sent[0];
    assert_eq!(
        recipients,
        &vec![
            "henrik.kjeldsberg@example.org".to_string(),
            "aslak.bergersen@example.org".to_string()
        ]
    );
    assert_eq!(report.status, BuildStatus::Failed);
    assert_eq!(report.project, "morphman");
}

#[tokio::test]
async fn test_errored_build_uses_on_failure() {
    let notifier = RecordingNotifier::new();
    let runner = MockRunner::new().exit_with("wget", 4);
    let result = run_build(REFERENCE_CONFIG, runner, notifier.clone(), None).await;

    assert_eq!(result.status, BuildStatus::Errored);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_change_policy_follows_history() {
    let history: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());
    let notifier = RecordingNotifier::new();

    // first build counts as a change
    run_build(CHANGE_CONFIG, MockRunner::new(), notifier.clone(), Some(history.clone())).await;
    assert_eq!(notifier.sent().len(), 1);

    // still passing
    run_build(CHANGE_CONFIG, MockRunner::new(), notifier.clone(), Some(history.clone())).await;
    assert_eq!(notifier.sent().len(), 1);

    // broken
    let failing = MockRunner::new().exit_with("pytest", 1);
    run_build(CHANGE_CONFIG, failing, notifier.clone(), Some(history.clone())).await;
    assert_eq!(notifier.sent().len(), 2);

    // fixed
    run_build(CHANGE_CONFIG, MockRunner::new(), notifier.clone(), Some(history.clone())).await;
    assert_eq!(notifier.sent().len(), 3);

    assert_eq!(history.list_builds("morphman").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_notifier_failure_keeps_build_status() {
    let runner = MockRunner::new().exit_with("pytest .", 1);
    let result = run_build(REFERENCE_CONFIG, runner, RecordingNotifier::failing(), None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::NotificationFailed { .. })));
}

#[tokio::test]
async fn test_disabled_email_sends_nothing() {
    let yaml = r#"
notifications:
  email: false
script: pytest
"#;
    let notifier = RecordingNotifier::new();
    let runner = MockRunner::new().exit_with("pytest", 1);
    let result = run_build(yaml, runner, notifier.clone(), None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert!(notifier.sent().is_empty());
}
