//! Test utilities for build scenarios

use async_trait::async_trait;
use cirunner::core::config::BuildConfig;
use cirunner::core::{Build, BuildStatus, JobEnvironment};
use cirunner::execution::{
    BuildEngine, CommandOutcome, CommandRunner, ExecutionEvent, HomeDir, RunnerError,
    ShellSession, Workspace,
};
use cirunner::notify::{BuildReport, Notifier, NotifyError};
use cirunner::persistence::PersistenceBackend;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REFERENCE_CONFIG: &str = include_str!("../fixtures/travis.yml");

/// Runner whose commands exit zero unless they contain a scripted fragment
#[derive(Clone, Default)]
pub struct MockRunner {
    exits: Arc<Vec<(Option<String>, String, i32)>>,
    commands: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command containing `fragment` exit with `code`
    pub fn exit_with(mut self, fragment: &str, code: i32) -> Self {
        Arc::make_mut(&mut self.exits).push((None, fragment.to_string(), code));
        self
    }

    /// Like [`MockRunner::exit_with`], limited to one job number
    pub fn exit_in_job(mut self, job: &str, fragment: &str, code: i32) -> Self {
        Arc::make_mut(&mut self.exits).push((Some(job.to_string()), fragment.to_string(), code));
        self
    }

    /// Commands run so far as (job number, command)
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, command: &str) -> bool {
        self.commands().iter().any(|(_, c)| c == command)
    }
}

struct MockSession {
    runner: MockRunner,
    job: String,
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn open(&self, env: &JobEnvironment) -> Result<Box<dyn ShellSession>, RunnerError> {
        Ok(Box::new(MockSession {
            runner: self.clone(),
            job: env.var("TRAVIS_JOB_NUMBER").unwrap_or_default().to_string(),
        }))
    }
}

#[async_trait]
impl ShellSession for MockSession {
    async fn run(
        &mut self,
        command: &str,
        on_line: cirunner::execution::runner::LineCallback<'_>,
    ) -> Result<CommandOutcome, RunnerError> {
        self.runner
            .commands
            .lock()
            .unwrap()
            .push((self.job.clone(), command.to_string()));

        let exit_code = self
            .runner
            .exits
            .iter()
            .find(|(job, fragment, _)| {
                job.as_ref().map_or(true, |j| *j == self.job) && command.contains(fragment.as_str())
            })
            .map_or(0, |(_, _, code)| *code);

        let line = format!("ran {}", command);
        if let Some(cb) = on_line {
            cb(&line);
        }

        Ok(CommandOutcome {
            exit_code,
            output_tail: vec![line],
            duration: Duration::from_millis(1),
        })
    }

    async fn close(&mut self) {}
}

/// Notifier that keeps every report it is asked to deliver
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(BuildReport, Vec<String>)>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries fail
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(BuildReport, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, report: &BuildReport, recipients: &[String]) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((report.clone(), recipients.to_vec()));
        if self.fail {
            return Err(NotifyError::Delivery {
                program: "recording".to_string(),
                code: Some(1),
                stderr: "refused".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of running a build in a scenario
pub struct BuildTestResult {
    pub status: BuildStatus,
    pub build: Build,
    pub events: Vec<ExecutionEvent>,
}

impl BuildTestResult {
    pub fn job_status(&self, number: &str) -> BuildStatus {
        self.build
            .job(number)
            .unwrap_or_else(|| panic!("Job {} not found", number))
            .status()
    }
}

/// Run a configuration with the given runner and notifier
pub async fn run_build(
    yaml: &str,
    runner: MockRunner,
    notifier: RecordingNotifier,
    history: Option<Arc<dyn PersistenceBackend>>,
) -> BuildTestResult {
    let config = BuildConfig::from_yaml(yaml).expect("configuration should parse");
    let mut build = config.to_build("morphman").expect("configuration should expand");

    let workspace = Workspace::new("/src/morphman", HomeDir::Scoped, "/usr/bin:/bin");
    let mut engine = BuildEngine::new(runner, workspace).with_notifier(Arc::new(notifier));
    if let Some(history) = history {
        engine = engine.with_history(history);
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let status = engine.execute(&mut build).await;
    let events = events.lock().unwrap().clone();

    BuildTestResult {
        status,
        build,
        events,
    }
}
