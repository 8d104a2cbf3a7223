//! Main execution engine - orchestrates a whole build

use crate::{
    core::{environment::parse_assignments, Build, BuildStatus, Job, JobEnvironment, JobState},
    execution::{
        events::{EventBus, ExecutionEvent},
        executor::{JobExecutor, JobOutcome},
        runner::CommandRunner,
    },
    notify::{policy, BuildReport, Notifier, NotifyDecision, NullNotifier},
    persistence::{create_summary, PersistenceBackend},
};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Where a job's HOME lives
#[derive(Debug, Clone)]
pub enum HomeDir {
    /// A fixed directory, reused across jobs and builds
    Fixed(PathBuf),
    /// A fresh temporary directory per job, removed when the job ends
    Scoped,
}

/// Host-side settings shared by all jobs of a build
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Repository root; commands start here
    pub build_dir: PathBuf,

    /// HOME strategy
    pub home: HomeDir,

    /// PATH jobs start from
    pub base_path: String,

    /// Variables applied after everything else
    pub overrides: Vec<(String, String)>,
}

impl Workspace {
    pub fn new(build_dir: impl Into<PathBuf>, home: HomeDir, base_path: impl Into<String>) -> Self {
        Self {
            build_dir: build_dir.into(),
            home,
            base_path: base_path.into(),
            overrides: Vec::new(),
        }
    }
}

/// HOME of a running job; a scoped directory is deleted on drop
enum JobHome {
    Fixed(PathBuf),
    Scoped(TempDir),
}

impl JobHome {
    fn path(&self) -> &Path {
        match self {
            JobHome::Fixed(path) => path.as_path(),
            JobHome::Scoped(dir) => dir.path(),
        }
    }
}

/// Main build execution engine
pub struct BuildEngine<R> {
    executor: JobExecutor<R>,
    workspace: Workspace,
    notifier: Arc<dyn Notifier>,
    history: Option<Arc<dyn PersistenceBackend>>,
    events: EventBus,
}

impl<R: CommandRunner> BuildEngine<R> {
    pub fn new(runner: R, workspace: Workspace) -> Self {
        Self {
            executor: JobExecutor::new(runner),
            workspace,
            notifier: Arc::new(NullNotifier),
            history: None,
            events: EventBus::new(),
        }
    }

    /// Deliver notifications through this sink
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Record builds and read the previous outcome from this backend
    pub fn with_history(mut self, history: Arc<dyn PersistenceBackend>) -> Self {
        self.history = Some(history);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
    }

    /// Execute the entire build and return its outcome
    pub async fn execute(&self, build: &mut Build) -> BuildStatus {
        let build_id = build.state.build_id;
        let previous = self.previous_status(&build.project).await;

        info!(
            "Starting build {} for {} ({} jobs)",
            build_id,
            build.project,
            build.jobs.len()
        );
        build.state.start(build.jobs.len());
        self.events.emit(ExecutionEvent::BuildStarted {
            build_id,
            project: build.project.clone(),
            jobs: build.jobs.len(),
        });

        for index in 0..build.jobs.len() {
            if build.fast_finish() && build.has_required_failure() {
                let reason = "fast_finish: build already failed".to_string();
                self.events.emit(ExecutionEvent::JobCanceled {
                    job: build.jobs[index].number.clone(),
                    reason: reason.clone(),
                });
                build.jobs[index].state = JobState::Canceled { reason };
                continue;
            }

            self.run_job(build, index).await;
            build.update_counts();
        }

        let status = build.outcome();
        build.state.finish(status);
        build.update_counts();
        info!("Build {} finished: {}", build_id, status);

        self.record(build).await;
        self.notify(build, previous).await;

        self.events.emit(ExecutionEvent::BuildFinished { build_id, status });
        status
    }

    async fn run_job(&self, build: &mut Build, index: usize) {
        let started_at = Utc::now();
        let number = build.jobs[index].number.clone();
        build.jobs[index].state = JobState::Running { started_at };
        self.events.emit(ExecutionEvent::JobStarted {
            job: number.clone(),
            label: build.jobs[index].spec.label(),
        });

        let outcome = match self.prepare_home() {
            Ok(home) => {
                let job = &build.jobs[index];
                match self.job_environment(build, job, home.path()) {
                    Ok(env) => {
                        self.executor
                            .execute(&build.config, job, env, &self.events)
                            .await
                    }
                    Err(e) => JobOutcome::errored(format!("{:#}", e)),
                }
                // `home` dropped here; a scoped HOME is removed
            }
            Err(e) => JobOutcome::errored(format!("{:#}", e)),
        };

        if let Some(error) = &outcome.error {
            warn!("Job {} error: {}", number, error);
        }

        let job = &mut build.jobs[index];
        job.commands = outcome.commands;
        job.error = outcome.error;
        job.state = JobState::Finished {
            status: outcome.status,
            started_at,
            finished_at: Utc::now(),
        };
        self.events.emit(ExecutionEvent::JobFinished {
            job: number,
            status: outcome.status,
        });
    }

    fn prepare_home(&self) -> Result<JobHome> {
        match &self.workspace.home {
            HomeDir::Fixed(path) => {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create home {}", path.display()))?;
                Ok(JobHome::Fixed(path.clone()))
            }
            HomeDir::Scoped => {
                let dir = tempfile::Builder::new()
                    .prefix("cirunner-home-")
                    .tempdir()
                    .context("Failed to create temporary home")?;
                debug!("Using temporary home {}", dir.path().display());
                Ok(JobHome::Scoped(dir))
            }
        }
    }

    /// Environment for one job: CI markers, global env, job env, overrides
    fn job_environment(&self, build: &Build, job: &Job, home: &Path) -> Result<JobEnvironment> {
        let workspace = &self.workspace;
        let mut env = JobEnvironment::new(home, &workspace.build_dir, &workspace.base_path);

        env.set_var("CI", "true");
        env.set_var("CONTINUOUS_INTEGRATION", "true");
        env.set_var("TRAVIS", "true");
        env.set_var("TRAVIS_OS_NAME", job.spec.os.clone());
        if let Some(python) = &job.spec.python {
            env.set_var("TRAVIS_PYTHON_VERSION", python.clone());
        }
        env.set_var("TRAVIS_JOB_NUMBER", job.number.clone());
        env.set_var(
            "TRAVIS_BUILD_DIR",
            workspace.build_dir.display().to_string(),
        );

        for entry in &build.config.env.global {
            for (key, value) in parse_assignments(entry)? {
                env.set_var(key, value);
            }
        }
        for (key, value) in job.spec.variables()? {
            env.set_var(key, value);
        }
        for (key, value) in &workspace.overrides {
            env.set_var(key.clone(), value.clone());
        }

        Ok(env)
    }

    async fn previous_status(&self, project: &str) -> Option<BuildStatus> {
        let history = self.history.as_ref()?;
        match history.latest_build(project).await {
            Ok(summary) => summary.map(|s| s.status),
            Err(e) => {
                warn!("Could not read build history for {}: {:#}", project, e);
                None
            }
        }
    }

    async fn record(&self, build: &Build) {
        if let Some(history) = &self.history {
            if let Err(e) = history.save_build(&create_summary(build)).await {
                warn!("Could not record build {}: {:#}", build.state.build_id, e);
            }
        }
    }

    async fn notify(&self, build: &Build, previous: Option<BuildStatus>) {
        let email = match build.email() {
            Some(email) => email,
            None => {
                debug!("No e-mail notifications configured");
                return;
            }
        };

        match policy::decide(email, build.state.status, previous) {
            NotifyDecision::Send if email.recipients.is_empty() => {
                self.events.emit(ExecutionEvent::NotificationSuppressed {
                    reason: "no recipients".to_string(),
                });
            }
            NotifyDecision::Send => {
                let report = BuildReport::from_build(build);
                match self.notifier.notify(&report, &email.recipients).await {
                    Ok(()) => {
                        info!("Notified {}", email.recipients.join(", "));
                        self.events.emit(ExecutionEvent::NotificationSent {
                            recipients: email.recipients.clone(),
                        });
                    }
                    Err(e) => {
                        warn!("Notification failed: {}", e);
                        self.events.emit(ExecutionEvent::NotificationFailed {
                            error: e.to_string(),
                        });
                    }
                }
            }
            NotifyDecision::Suppress(reason) => {
                debug!("Notification suppressed: {}", reason);
                self.events
                    .emit(ExecutionEvent::NotificationSuppressed { reason });
            }
        }
    }
}
