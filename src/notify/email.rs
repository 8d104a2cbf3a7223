//! E-mail reports delivered through a sendmail-compatible program

use crate::core::BuildStatus;
use crate::notify::{BuildReport, Notifier, NotifyError};
use chrono::Utc;
use std::fmt::Write as _;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_FROM: &str = "cirunner@localhost";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Subject line, e.g. `[morphman] Build failed (1 of 2 jobs passed)`
pub fn subject(report: &BuildReport) -> String {
    let passed = report
        .jobs
        .iter()
        .filter(|j| j.status.is_success())
        .count();
    format!(
        "[{}] Build {} ({} of {} jobs passed)",
        report.project,
        report.status,
        passed,
        report.jobs.len()
    )
}

/// Plain-text body of the report
pub fn render_body(report: &BuildReport) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Project: {}", report.project);
    let _ = writeln!(body, "Build:   {}", report.build_id);
    let _ = writeln!(body, "Status:  {}", report.status);
    if let Some(secs) = report.duration_secs {
        let _ = writeln!(body, "Elapsed: {}s", secs);
    }

    for job in &report.jobs {
        let _ = writeln!(body);
        let allowed = if job.allow_failure { " (allowed to fail)" } else { "" };
        let _ = writeln!(body, "Job {} [{}]: {}{}", job.number, job.label, job.status, allowed);

        if let Some((phase, command)) = &job.failed_command {
            let code = job
                .exit_code
                .map_or_else(|| "no exit status".to_string(), |c| format!("exit {}", c));
            let _ = writeln!(body, "  {} command `{}` failed ({})", phase, command, code);
        }
        if let Some(error) = &job.error {
            let _ = writeln!(body, "  error: {}", error);
        }
        if !job.output_tail.is_empty() && job.status != BuildStatus::Passed {
            let _ = writeln!(body, "  last output:");
            for line in &job.output_tail {
                let _ = writeln!(body, "    {}", line);
            }
        }
    }

    body
}

/// Complete RFC 822 message addressed to every recipient
pub fn render_message(report: &BuildReport, from: &str, recipients: &[String]) -> String {
    let mut message = String::new();
    let _ = write!(message, "From: {}\r\n", from);
    let _ = write!(message, "To: {}\r\n", recipients.join(", "));
    let _ = write!(message, "Subject: {}\r\n", subject(report));
    let _ = write!(message, "Date: {}\r\n", Utc::now().to_rfc2822());
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n");
    message.push_str("\r\n");
    for line in render_body(report).lines() {
        message.push_str(line);
        message.push_str("\r\n");
    }
    message
}

/// Pipes reports into `sendmail -t -i` (or a compatible program)
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: String,
    args: Vec<String>,
    from: String,
    timeout: Duration,
}

impl SendmailNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-t".to_string(), "-i".to_string()],
            from: DEFAULT_FROM.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Replace the default `-t -i` arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sender address for the `From:` header
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Give up on delivery after this long
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn deliver(&self, message: &str) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| NotifyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(message.as_bytes()).await {
                Ok(()) => {}
                // the exit status says more than the broken pipe
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Default for SendmailNotifier {
    fn default() -> Self {
        Self::new("sendmail")
    }
}

#[async_trait::async_trait]
impl Notifier for SendmailNotifier {
    async fn notify(&self, report: &BuildReport, recipients: &[String]) -> Result<(), NotifyError> {
        let message = render_message(report, &self.from, recipients);
        debug!("Sending report via {} to {}", self.program, recipients.join(", "));

        tokio::time::timeout(self.timeout, self.deliver(&message))
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout.as_secs()))?
    }
}
