//! Build domain model

use crate::core::{
    config::{BuildConfig, EmailNotification},
    matrix::{self, JobSpec},
    state::{BuildState, BuildStatus, CommandRecord, JobState},
};
use anyhow::{Context, Result};
use serde::Serialize;

/// A single job of a build
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Job number within the build, starting at "1"
    pub number: String,

    /// Matrix coordinates
    pub spec: JobSpec,

    /// Runtime state
    pub state: JobState,

    /// Commands executed so far, in order
    pub commands: Vec<CommandRecord>,

    /// Runner or provisioning error, if the job errored outside a command
    pub error: Option<String>,
}

impl Job {
    pub fn status(&self) -> BuildStatus {
        self.state.status()
    }

    /// First command that changed the job outcome, if any
    pub fn failed_command(&self) -> Option<&CommandRecord> {
        self.commands
            .iter()
            .find(|c| c.phase.affects_outcome() && !c.succeeded())
    }
}

/// A build: one configuration expanded into jobs
#[derive(Debug, Clone)]
pub struct Build {
    /// Project the build belongs to (history key)
    pub project: String,

    /// Configuration the build was created from
    pub config: BuildConfig,

    /// Jobs in matrix order
    pub jobs: Vec<Job>,

    /// Execution state
    pub state: BuildState,
}

impl Build {
    /// Create a build from configuration
    pub fn from_config(config: &BuildConfig, project: &str) -> Result<Self> {
        let jobs = matrix::expand(config)
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                spec.variables()
                    .with_context(|| format!("Invalid env for job {}", index + 1))?;
                Ok(Job {
                    number: (index + 1).to_string(),
                    spec,
                    state: JobState::Pending,
                    commands: Vec::new(),
                    error: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if jobs.is_empty() {
            anyhow::bail!("Build matrix is empty: matrix.exclude removes every job");
        }

        Ok(Build {
            project: project.to_string(),
            config: config.clone(),
            jobs,
            state: BuildState::new(),
        })
    }

    /// Get a job by number
    pub fn job(&self, number: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.number == number)
    }

    /// Whether remaining jobs should be skipped
    pub fn fast_finish(&self) -> bool {
        self.config.matrix.as_ref().is_some_and(|m| m.fast_finish)
    }

    /// E-mail settings of the build, when enabled
    pub fn email(&self) -> Option<&EmailNotification> {
        self.config.email().filter(|e| e.enabled)
    }

    /// Whether a job that counts toward the outcome has already failed
    pub fn has_required_failure(&self) -> bool {
        self.jobs
            .iter()
            .any(|j| !j.spec.allow_failure && j.status().is_failure())
    }

    /// Build outcome from the jobs that count toward it
    ///
    /// Errored wins over failed; jobs in `allow_failures` and canceled jobs
    /// are ignored.
    pub fn outcome(&self) -> BuildStatus {
        let counted: Vec<BuildStatus> = self
            .jobs
            .iter()
            .filter(|j| !j.spec.allow_failure)
            .map(Job::status)
            .filter(|s| *s != BuildStatus::Canceled)
            .collect();

        if counted.contains(&BuildStatus::Errored) {
            BuildStatus::Errored
        } else if counted.contains(&BuildStatus::Failed) {
            BuildStatus::Failed
        } else if counted.iter().all(|s| s.is_success()) {
            BuildStatus::Passed
        } else {
            BuildStatus::Running
        }
    }

    /// Recount passed/failed jobs into the build state
    pub fn update_counts(&mut self) {
        self.state.total_jobs = self.jobs.len();
        self.state.passed_jobs = self.jobs.iter().filter(|j| j.status().is_success()).count();
        self.state.failed_jobs = self.jobs.iter().filter(|j| j.status().is_failure()).count();
    }
}
