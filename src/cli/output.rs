//! CLI output formatting

use crate::{
    core::{BuildStatus, Job},
    execution::ExecutionEvent,
    persistence::BuildSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static MAIL: Emoji<'_, '_> = Emoji("📧 ", "@ ");

/// Spinner shown while a command runs
pub fn create_command_spinner(command: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(command.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a build status for display
pub fn format_status(status: BuildStatus) -> String {
    match status {
        BuildStatus::Pending => style("PENDING").dim().to_string(),
        BuildStatus::Running => style("RUNNING").yellow().to_string(),
        BuildStatus::Passed => style("PASSED").green().to_string(),
        BuildStatus::Failed => style("FAILED").red().to_string(),
        BuildStatus::Errored => style("ERRORED").red().bold().to_string(),
        BuildStatus::Canceled => style("CANCELED").yellow().to_string(),
    }
}

fn status_icon(status: BuildStatus) -> Emoji<'static, 'static> {
    match status {
        BuildStatus::Passed => CHECK,
        BuildStatus::Failed | BuildStatus::Errored => CROSS,
        BuildStatus::Running => SPINNER,
        _ => INFO,
    }
}

/// Format a history entry for display
pub fn format_build_summary(summary: &BuildSummary) -> String {
    format!(
        "{}{} - {} - {} ({}/{} passed) - {}",
        status_icon(summary.status),
        style(&summary.build_id.to_string()[..8]).dim(),
        style(&summary.project).bold(),
        format_status(summary.status),
        summary.passed_jobs,
        summary.total_jobs,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Multi-line view of one recorded build
pub fn format_build_detail(summary: &BuildSummary) -> String {
    let finished = summary
        .finished_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}Build {}\n  Project:  {}\n  Status:   {}\n  Jobs:     {} passed, {} failed, {} total\n  Started:  {}\n  Finished: {}",
        status_icon(summary.status),
        summary.build_id,
        style(&summary.project).bold(),
        format_status(summary.status),
        summary.passed_jobs,
        summary.failed_jobs,
        summary.total_jobs,
        summary.started_at.format("%Y-%m-%d %H:%M:%S"),
        finished
    )
}

/// One line per job of an expanded matrix
pub fn format_job_line(job: &Job) -> String {
    let allowed = if job.spec.allow_failure {
        style(" (allow failure)").yellow().to_string()
    } else {
        String::new()
    };
    format!("  {}. {}{}", style(&job.number).cyan(), job.spec.label(), allowed)
}

/// Format an execution event for display; `None` for events shown elsewhere
pub fn format_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::BuildStarted {
            build_id,
            project,
            jobs,
        } => format!(
            "{}Starting build of {} ({}, {} jobs)",
            ROCKET,
            style(project).bold(),
            style(&build_id.to_string()[..8]).dim(),
            jobs
        ),
        ExecutionEvent::PhaseStarted { phase, .. } => {
            format!("{}", style(format!("# {}", phase)).cyan())
        }
        ExecutionEvent::CommandFinished {
            command,
            exit_code,
            duration_ms,
            ..
        } => match exit_code {
            Some(0) => format!(
                "{}{} {}",
                CHECK,
                command,
                style(format_duration(Duration::from_millis(*duration_ms))).dim()
            ),
            Some(code) => format!(
                "{}{} {}",
                CROSS,
                style(command).red(),
                style(format!("(exit {})", code)).dim()
            ),
            None => format!("{}{} {}", CROSS, style(command).red(), style("(did not run)").dim()),
        },
        ExecutionEvent::JobFinished { job, status } => {
            format!("{}Job {} {}", status_icon(*status), job, format_status(*status))
        }
        ExecutionEvent::JobCanceled { job, reason } => {
            format!("{}Job {} {} ({})", WARN, job, format_status(BuildStatus::Canceled), reason)
        }
        ExecutionEvent::NotificationSent { recipients } => {
            format!("{}Notified {}", MAIL, recipients.join(", "))
        }
        ExecutionEvent::NotificationSuppressed { reason } => {
            format!("{}No notification: {}", INFO, style(reason).dim())
        }
        ExecutionEvent::NotificationFailed { error } => {
            format!("{}Notification failed: {}", WARN, style(error).red())
        }
        ExecutionEvent::BuildFinished { build_id, status } => format!(
            "{}Build {} {}",
            status_icon(*status),
            style(&build_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
        ExecutionEvent::JobStarted { .. }
        | ExecutionEvent::CommandStarted { .. }
        | ExecutionEvent::CommandOutput { .. } => return None,
    };
    Some(line)
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
