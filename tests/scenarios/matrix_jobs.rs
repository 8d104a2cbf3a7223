//! Test: build matrices with several jobs

use crate::helpers::*;
use cirunner::core::BuildStatus;
use cirunner::execution::ExecutionEvent;

const TWO_PYTHONS: &str = r#"
python:
  - "3.6"
  - "3.7"
env:
  - BACKEND=vtk
  - BACKEND=itk
script: pytest
"#;

#[tokio::test]
async fn test_every_job_runs_in_order() {
    let runner = MockRunner::new();
    let result = run_build(TWO_PYTHONS, runner.clone(), RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Passed);
    assert_eq!(result.build.jobs.len(), 4);
    assert_eq!(result.build.state.passed_jobs, 4);

    let jobs: Vec<String> = runner.commands().into_iter().map(|(job, _)| job).collect();
    assert_eq!(jobs, vec!["1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_one_failing_job_fails_build() {
    let runner = MockRunner::new().exit_in_job("3", "pytest", 1);
    let result = run_build(TWO_PYTHONS, runner, RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.job_status("3"), BuildStatus::Failed);
    assert_eq!(result.job_status("4"), BuildStatus::Passed);
    assert_eq!(result.build.state.failed_jobs, 1);
}

#[tokio::test]
async fn test_allowed_failure_does_not_fail_build() {
    let yaml = r#"
python: ["3.6", "3.7"]
matrix:
  allow_failures:
    - python: "3.7"
script: pytest
"#;
    let runner = MockRunner::new().exit_in_job("2", "pytest", 1);
    let result = run_build(yaml, runner, RecordingNotifier::new(), None).await;

    assert_eq!(result.job_status("2"), BuildStatus::Failed);
    assert_eq!(result.status, BuildStatus::Passed);
}

#[tokio::test]
async fn test_fast_finish_cancels_remaining_jobs() {
    let yaml = r#"
python: ["3.6", "3.7", "3.8"]
matrix:
  fast_finish: true
script: pytest
"#;
    let runner = MockRunner::new().exit_in_job("1", "pytest", 1);
    let result = run_build(yaml, runner.clone(), RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.job_status("2"), BuildStatus::Canceled);
    assert_eq!(result.job_status("3"), BuildStatus::Canceled);
    assert!(runner.commands().iter().all(|(job, _)| job == "1"));

    let canceled = result
        .events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::JobCanceled { .. }))
        .count();
    assert_eq!(canceled, 2);
}

#[tokio::test]
async fn test_include_only_matrix() {
    let yaml = r#"
matrix:
  include:
    - os: linux
      python: "3.6"
    - os: osx
      python: "3.7"
      name: mac
script: pytest
"#;
    let result = run_build(yaml, MockRunner::new(), RecordingNotifier::new(), None).await;

    assert_eq!(result.build.jobs.len(), 2);
    assert_eq!(result.build.jobs[1].spec.os, "osx");
    assert_eq!(result.build.jobs[1].spec.label(), "mac");
    assert_eq!(result.status, BuildStatus::Passed);
}
