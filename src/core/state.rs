//! Execution state models

use crate::core::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Outcome of a build or a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Not started
    Pending,
    /// Currently running
    Running,
    /// Every command that affects the outcome exited zero
    Passed,
    /// A script command exited non-zero
    Failed,
    /// Setup (provisioning, install) failed or the runner broke
    Errored,
    /// Not run because the outcome was already decided
    Canceled,
}

impl BuildStatus {
    pub fn is_success(self) -> bool {
        self == BuildStatus::Passed
    }

    pub fn is_failure(self) -> bool {
        matches!(self, BuildStatus::Failed | BuildStatus::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Passed => "passed",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => BuildStatus::Pending,
            "running" => BuildStatus::Running,
            "passed" => BuildStatus::Passed,
            "failed" => BuildStatus::Failed,
            "errored" => BuildStatus::Errored,
            "canceled" => BuildStatus::Canceled,
            other => anyhow::bail!("unknown build status: {}", other),
        })
    }
}

/// State of a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Job has not started
    Pending,
    /// Job is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Job ran to an outcome
    Finished {
        status: BuildStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// Job was never started
    Canceled {
        reason: String,
    },
}

impl JobState {
    /// Status this state stands for
    pub fn status(&self) -> BuildStatus {
        match self {
            JobState::Pending => BuildStatus::Pending,
            JobState::Running { .. } => BuildStatus::Running,
            JobState::Finished { status, .. } => *status,
            JobState::Canceled { .. } => BuildStatus::Canceled,
        }
    }
}

/// A command that was executed, with its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub phase: Phase,
    pub command: String,
    /// `None` when the runner failed before the command produced a status
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Last lines of combined stdout/stderr
    pub output_tail: Vec<String>,
}

impl CommandRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Overall build state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildState {
    /// Unique build ID
    pub build_id: Uuid,

    /// Current status
    pub status: BuildStatus,

    /// When the build started
    pub started_at: Option<DateTime<Utc>>,

    /// When the build finished
    pub finished_at: Option<DateTime<Utc>>,

    /// Total number of jobs
    pub total_jobs: usize,

    /// Number of passed jobs
    pub passed_jobs: usize,

    /// Number of failed or errored jobs
    pub failed_jobs: usize,
}

impl BuildState {
    /// Create a new build state
    pub fn new() -> Self {
        Self {
            build_id: Uuid::new_v4(),
            status: BuildStatus::Pending,
            started_at: None,
            finished_at: None,
            total_jobs: 0,
            passed_jobs: 0,
            failed_jobs: 0,
        }
    }

    /// Mark build as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = BuildStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Mark build as finished with an outcome
    pub fn finish(&mut self, status: BuildStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

impl Default for BuildState {
    fn default() -> Self {
        Self::new()
    }
}
