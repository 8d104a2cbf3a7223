//! Command-line interface

pub mod commands;
pub mod output;
pub mod terminal_output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, MatrixCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Runs Travis-style CI configurations locally
#[derive(Debug, Parser, Clone)]
#[command(name = "cirunner")]
#[command(version)]
#[command(about = "Run a Travis-style CI configuration: provision, test, notify", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a build
    Run(RunCommand),

    /// Validate a build configuration
    Validate(ValidateCommand),

    /// Show the jobs a configuration expands to
    Matrix(MatrixCommand),

    /// Show build history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::NotifyArg;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["cirunner", "run"]).unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.file, ".travis.yml");
        assert_eq!(run.notify, NotifyArg::Log);
        assert_eq!(run.shell, "bash");
        assert!(run.home.is_none());
        assert!(!run.dry_run);
    }

    #[test]
    fn test_run_options() {
        let cli = Cli::try_parse_from([
            "cirunner", "-v", "run", "-f", "ci.yml", "--notify", "sendmail", "--var", "A=1",
            "--var", "B=x=y", "--timeout", "60", "--no-history",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.file, "ci.yml");
        assert_eq!(run.notify, NotifyArg::Sendmail);
        assert_eq!(run.timeout, 60);
        assert!(run.no_history);
        assert_eq!(
            run.var,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string())
            ]
        );
    }

    #[test]
    fn test_bad_var_is_rejected() {
        assert!(Cli::try_parse_from(["cirunner", "run", "--var", "novalue"]).is_err());
    }

    #[test]
    fn test_run_mail_options() {
        let cli = Cli::try_parse_from([
            "cirunner", "run", "--notify", "sendmail", "--mail-from", "ci@example.org",
            "--mail-timeout", "15",
        ])
        .unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.mail_from.as_deref(), Some("ci@example.org"));
        assert_eq!(run.mail_timeout, Some(15));
    }

    #[test]
    fn test_history_single_build() {
        let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let cli = Cli::try_parse_from(["cirunner", "history", "--build", id]).unwrap();
        let Command::History(history) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(history.build.map(|b| b.to_string()).as_deref(), Some(id));

        assert!(Cli::try_parse_from(["cirunner", "history", "--build", "not-a-uuid"]).is_err());
        assert!(
            Cli::try_parse_from(["cirunner", "history", "--build", id, "--project", "p"]).is_err()
        );
    }

    #[test]
    fn test_validate_formats_conflict() {
        assert!(Cli::try_parse_from(["cirunner", "validate", "--json", "--yaml"]).is_err());
    }
}
