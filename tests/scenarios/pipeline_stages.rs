//! Test: lifecycle phases of a single job

use crate::helpers::*;
use cirunner::core::{BuildStatus, Phase};
use cirunner::execution::ExecutionEvent;

#[tokio::test]
async fn test_reference_build_passes_when_everything_succeeds() {
    let runner = MockRunner::new();
    let result = run_build(REFERENCE_CONFIG, runner.clone(), RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Passed);
    assert_eq!(result.build.jobs.len(), 1);

    let commands: Vec<String> = runner.commands().into_iter().map(|(_, c)| c).collect();
    assert_eq!(commands.len(), 10);
    assert_eq!(commands[3], "hash -r");
    assert_eq!(commands[8], "source activate morphman");
    assert_eq!(commands.last().unwrap(), "cd test && pytest .");
}

#[tokio::test]
async fn test_failing_install_never_reaches_script() {
    let runner = MockRunner::new().exit_with("conda create", 1);
    let result = run_build(REFERENCE_CONFIG, runner.clone(), RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Errored);
    assert!(!runner.ran("source activate morphman"));
    assert!(!runner.ran("cd test && pytest ."));

    let job = &result.build.jobs[0];
    let failed = job.failed_command().unwrap();
    assert_eq!(failed.phase, Phase::Install);
    assert_eq!(failed.exit_code, Some(1));
}

#[tokio::test]
async fn test_failing_script_fails_build() {
    let runner = MockRunner::new().exit_with("pytest .", 1);
    let result = run_build(REFERENCE_CONFIG, runner, RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.job_status("1"), BuildStatus::Failed);
    assert_eq!(result.build.state.failed_jobs, 1);
}

#[tokio::test]
async fn test_after_phases_do_not_change_outcome() {
    let yaml = r#"
script: pytest
after_success: codecov
after_script: cleanup
"#;
    let runner = MockRunner::new().exit_with("codecov", 2).exit_with("cleanup", 1);
    let result = run_build(yaml, runner.clone(), RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Passed);
    assert!(runner.ran("codecov"));
    assert!(runner.ran("cleanup"));
}

#[tokio::test]
async fn test_events_follow_phase_order() {
    let yaml = r#"
before_install: echo start
install: pip install .
script: pytest
"#;
    let result = run_build(yaml, MockRunner::new(), RecordingNotifier::new(), None).await;

    let phases: Vec<Phase> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::PhaseStarted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![Phase::BeforeInstall, Phase::Install, Phase::Script]);

    assert!(matches!(result.events.first(), Some(ExecutionEvent::BuildStarted { .. })));
    assert!(matches!(
        result.events.last(),
        Some(ExecutionEvent::BuildFinished {
            status: BuildStatus::Passed,
            ..
        })
    ));
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CommandOutput { line, .. } if line == "ran pytest")));
}

#[tokio::test]
async fn test_conda_section_provisions_before_install() {
    let yaml = include_str!("../../demos/travis.yml");
    let runner = MockRunner::new();
    let result = run_build(yaml, runner.clone(), RecordingNotifier::new(), None).await;

    assert_eq!(result.status, BuildStatus::Passed);
    let commands: Vec<String> = runner.commands().into_iter().map(|(_, c)| c).collect();
    let create = commands
        .iter()
        .position(|c| c.starts_with("conda create -q -n morphman python=3.6"))
        .unwrap();
    let info = commands.iter().position(|c| c == "conda info -a").unwrap();
    assert!(create < info);
    assert!(commands[create].contains("vmtk::vmtk"));
}
