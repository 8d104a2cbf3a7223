//! Shell sessions that run job commands
//!
//! A job keeps one shell process for its whole lifetime, so `export`, `cd`
//! and `source activate` in the install phase stay in effect for the script
//! phase. Each command is written to the shell's stdin followed by a marker
//! line carrying its exit status; output is read back line by line until
//! the marker shows up.
//!
//! The shell leads its own process group, so a timeout or a dropped session
//! takes down everything the job started, not just the shell.

use crate::core::environment::{shell_quote, JobEnvironment};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of output lines kept per command
pub const OUTPUT_TAIL_LINES: usize = 50;

/// Default per-command timeout (50 minutes)
pub const DEFAULT_TIMEOUT_SECS: u64 = 3000;

/// Error types for command execution
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start shell `{shell}`: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: io::Error,
    },

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Shell session is closed")]
    SessionClosed,

    #[error("Shell I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result of one command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    /// Last lines of combined stdout/stderr
    pub output_tail: Vec<String>,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Receives each output line as it is read
pub type LineCallback<'a> = Option<&'a (dyn Fn(&str) + Send + Sync)>;

/// Opens shell sessions for jobs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Start a session in the given environment
    async fn open(&self, env: &JobEnvironment) -> Result<Box<dyn ShellSession>, RunnerError>;
}

/// A live shell that runs commands one at a time
#[async_trait]
pub trait ShellSession: Send {
    /// Run a command and wait for its exit status
    async fn run(
        &mut self,
        command: &str,
        on_line: LineCallback<'_>,
    ) -> Result<CommandOutcome, RunnerError>;

    /// End the session
    async fn close(&mut self);
}

/// Runs commands in a real shell process
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell executable (e.g., "bash", "/bin/sh")
    shell: String,

    /// Timeout for a single command in seconds
    timeout_secs: u64,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            shell: shell.into(),
            timeout_secs,
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("bash", DEFAULT_TIMEOUT_SECS)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn open(&self, env: &JobEnvironment) -> Result<Box<dyn ShellSession>, RunnerError> {
        debug!(
            "Starting {} session in {}",
            self.shell,
            env.build_dir.display()
        );

        let mut command = Command::new(&self.shell);
        command
            .current_dir(&env.build_dir)
            .envs(env.exported())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                shell: self.shell.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "shell stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "shell stdout unavailable"))?;

        let mut session = ProcessSession {
            group: child.id(),
            child,
            stdin,
            reader: BufReader::new(stdout),
            marker: format!("__cirunner_{}", Uuid::new_v4().simple()),
            timeout_secs: self.timeout_secs,
            closed: false,
        };
        session.send("exec 2>&1\n").await?;

        Ok(Box::new(session))
    }
}

struct ProcessSession {
    child: Child,
    /// Process group id; equal to the shell's pid
    group: Option<u32>,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    marker: String,
    timeout_secs: u64,
    closed: bool,
}

impl ProcessSession {
    async fn send(&mut self, text: &str) -> Result<(), RunnerError> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn kill(&mut self) {
        if let Some(group) = self.group.take() {
            kill_process_group(group);
        }
        if let Err(e) = self.child.kill().await {
            debug!("Failed to kill shell session: {}", e);
        }
        self.closed = true;
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Some(group) = self.group.take() {
                kill_process_group(group);
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(group: u32) {
    // SAFETY: killpg only sends a signal; an unknown group yields ESRCH.
    let result = unsafe { libc::killpg(group as libc::pid_t, libc::SIGKILL) };
    if result != 0 {
        debug!(
            "Failed to signal process group {}: {}",
            group,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: u32) {}

#[async_trait]
impl ShellSession for ProcessSession {
    async fn run(
        &mut self,
        command: &str,
        on_line: LineCallback<'_>,
    ) -> Result<CommandOutcome, RunnerError> {
        if self.closed {
            return Err(RunnerError::SessionClosed);
        }

        let started = Instant::now();
        // The command is quoted and handed to `eval`, so a syntax error in it
        // becomes a non-zero status instead of eating the marker line.
        // `command eval` keeps a POSIX sh alive after such an error. The
        // brace group runs it in the current shell; stdin is redirected so
        // the command cannot swallow the rest of the script.
        let script = format!(
            "{{ command eval {command}\n}} </dev/null\n__cirunner_rc=$?\nprintf '\\n%s %s\\n' '{marker}' \"$__cirunner_rc\"\n",
            command = shell_quote(command),
            marker = self.marker
        );
        if let Err(e) = self.send(&script).await {
            self.closed = true;
            return Err(e);
        }

        let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            read_until_marker(&mut self.reader, &self.marker, &mut tail, on_line),
        )
        .await;

        let exit_code = match result {
            Err(_) => {
                warn!(
                    "Command timed out after {}s, killing session: {}",
                    self.timeout_secs, command
                );
                self.kill().await;
                return Err(RunnerError::Timeout(self.timeout_secs));
            }
            Ok(Err(e)) => {
                self.closed = true;
                return Err(e.into());
            }
            Ok(Ok(Some(code))) => code,
            Ok(Ok(None)) => {
                // The shell exited (e.g. `exit 1` in the command)
                self.closed = true;
                let status = self.child.wait().await?;
                debug!("Shell session ended with {}", status);
                status.code().unwrap_or(-1)
            }
        };

        Ok(CommandOutcome {
            exit_code,
            output_tail: tail.into_iter().collect(),
            duration: started.elapsed(),
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.send("exit 0\n").await.is_ok() {
            if timeout(Duration::from_secs(5), self.child.wait()).await.is_ok() {
                // Background jobs the commands left behind
                if let Some(group) = self.group.take() {
                    kill_process_group(group);
                }
                self.closed = true;
                return;
            }
        }
        self.kill().await;
    }
}

/// Read output until the marker line; `None` when the shell hit EOF first
async fn read_until_marker(
    reader: &mut BufReader<ChildStdout>,
    marker: &str,
    tail: &mut VecDeque<String>,
    on_line: LineCallback<'_>,
) -> io::Result<Option<i32>> {
    let mut buf = Vec::new();
    // The marker is printed after a newline, so one blank line before it is
    // an artifact; hold blank lines back until the next line arrives.
    let mut held_blank = false;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(|c| c == '\n' || c == '\r');

        if let Some(rest) = line.strip_prefix(marker) {
            return Ok(Some(rest.trim().parse().unwrap_or(-1)));
        }

        if held_blank {
            push_line(tail, on_line, "");
        }
        held_blank = line.is_empty();
        if !held_blank {
            push_line(tail, on_line, line);
        }
    }

    if held_blank {
        push_line(tail, on_line, "");
    }
    Ok(None)
}

fn push_line(tail: &mut VecDeque<String>, on_line: LineCallback<'_>, line: &str) {
    if let Some(callback) = on_line {
        callback(line);
    }
    if tail.len() == OUTPUT_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

/// Runner that reports every command as successful without running it
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

struct DryRunSession;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn open(&self, _env: &JobEnvironment) -> Result<Box<dyn ShellSession>, RunnerError> {
        Ok(Box::new(DryRunSession))
    }
}

#[async_trait]
impl ShellSession for DryRunSession {
    async fn run(
        &mut self,
        _command: &str,
        _on_line: LineCallback<'_>,
    ) -> Result<CommandOutcome, RunnerError> {
        Ok(CommandOutcome {
            exit_code: 0,
            output_tail: Vec::new(),
            duration: Duration::ZERO,
        })
    }

    async fn close(&mut self) {}
}
