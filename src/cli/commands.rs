//! CLI command definitions

use crate::execution::runner::DEFAULT_TIMEOUT_SECS;
use clap::Args;
use uuid::Uuid;

const DEFAULT_CONFIG: &str = ".travis.yml";

/// Run a build
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the build configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub file: String,

    /// HOME for jobs; a temporary directory per job when unset
    #[arg(long)]
    pub home: Option<String>,

    /// Where notifications go
    #[arg(long, value_enum, default_value_t = NotifyArg::Log)]
    pub notify: NotifyArg,

    /// sendmail-compatible program used by `--notify sendmail`
    #[arg(long, default_value = "sendmail")]
    pub sendmail: String,

    /// Sender address of notification mails
    #[arg(long)]
    pub mail_from: Option<String>,

    /// Seconds to wait for the mail program before giving up
    #[arg(long)]
    pub mail_timeout: Option<u64>,

    /// Shell that runs the job's commands
    #[arg(long, default_value = "bash")]
    pub shell: String,

    /// Per-command timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Print commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Don't read or save build history
    #[arg(long)]
    pub no_history: bool,

    /// Project name used for history; defaults to the repository directory name
    #[arg(long)]
    pub project: Option<String>,

    /// Variable overrides (KEY=VALUE)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,
}

/// Validate a build configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the build configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub file: String,

    /// Print the normalized configuration as JSON
    #[arg(long, conflicts_with = "yaml")]
    pub json: bool,

    /// Print the normalized configuration as YAML
    #[arg(long)]
    pub yaml: bool,
}

/// Show the expanded build matrix
#[derive(Debug, Args, Clone)]
pub struct MatrixCommand {
    /// Path to the build configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show build history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Project to filter by
    #[arg(short, long)]
    pub project: Option<String>,

    /// Number of recent builds to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single build by its ID
    #[arg(long, conflicts_with_all = ["project", "limit"])]
    pub build: Option<Uuid>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Notification sink argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NotifyArg {
    /// Write the report to the log
    Log,
    /// Pipe the report into sendmail
    Sendmail,
    /// Drop notifications
    None,
}

/// Parse KEY=VALUE pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid KEY=VALUE pair: {}", s)),
    }
}
