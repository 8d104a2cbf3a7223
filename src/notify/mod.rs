//! Build outcome notification
//!
//! [`policy`] decides whether a finished build is worth reporting,
//! [`email`] renders and delivers the report, and the sinks here cover
//! logging-only and silent runs.

pub mod email;
pub mod policy;

pub use email::SendmailNotifier;
pub use policy::{decide, NotifyDecision};

use crate::core::{Build, BuildStatus, Phase};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Error types for notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Delivery {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Notification timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-job part of a report
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub number: String,
    pub label: String,
    pub status: BuildStatus,
    pub allow_failure: bool,
    /// Phase and text of the command that decided the outcome
    pub failed_command: Option<(Phase, String)>,
    pub exit_code: Option<i32>,
    pub output_tail: Vec<String>,
    pub error: Option<String>,
}

/// What a notification says about a build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub build_id: Uuid,
    pub project: String,
    pub status: BuildStatus,
    pub duration_secs: Option<i64>,
    pub jobs: Vec<JobReport>,
}

impl BuildReport {
    pub fn from_build(build: &Build) -> Self {
        let jobs = build
            .jobs
            .iter()
            .map(|job| {
                let failed = job.failed_command();
                JobReport {
                    number: job.number.clone(),
                    label: job.spec.label(),
                    status: job.status(),
                    allow_failure: job.spec.allow_failure,
                    failed_command: failed.map(|c| (c.phase, c.command.clone())),
                    exit_code: failed.and_then(|c| c.exit_code),
                    output_tail: failed.map(|c| c.output_tail.clone()).unwrap_or_default(),
                    error: job.error.clone(),
                }
            })
            .collect();

        let duration_secs = match (build.state.started_at, build.state.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        };

        Self {
            build_id: build.state.build_id,
            project: build.project.clone(),
            status: build.state.status,
            duration_secs,
            jobs,
        }
    }
}

/// Trait for notification sinks
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one report to all recipients
    async fn notify(&self, report: &BuildReport, recipients: &[String]) -> Result<(), NotifyError>;
}

/// Writes the report through the log instead of delivering it
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &BuildReport, recipients: &[String]) -> Result<(), NotifyError> {
        info!(
            to = %recipients.join(", "),
            subject = %email::subject(report),
            "Notification"
        );
        for line in email::render_body(report).lines() {
            info!("  {}", line);
        }
        Ok(())
    }
}

/// Drops every notification
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _report: &BuildReport, _recipients: &[String]) -> Result<(), NotifyError> {
        Ok(())
    }
}
