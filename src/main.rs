use anyhow::{Context, Result};
use cirunner::cli::commands::{HistoryCommand, MatrixCommand, NotifyArg, RunCommand, ValidateCommand};
use cirunner::cli::output::*;
use cirunner::cli::terminal_output::TerminalOutput;
use cirunner::cli::{Cli, Command};
use cirunner::core::config::BuildConfig;
use cirunner::core::{Build, BuildStatus};
use cirunner::execution::{BuildEngine, CommandRunner, DryRunRunner, HomeDir, ShellRunner, Workspace};
use cirunner::notify::{LogNotifier, Notifier, NullNotifier, SendmailNotifier};
use cirunner::persistence::{PersistenceBackend, SqliteBuildStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Command::Run(cmd) => run_build(cmd, cli.verbose).await,
        Command::Validate(cmd) => validate_config(cmd),
        Command::Matrix(cmd) => show_matrix(cmd),
        Command::History(cmd) => show_history(cmd).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

/// Load and validate a configuration, printing the error on failure
fn load_config(file: &str) -> Option<BuildConfig> {
    match BuildConfig::from_file(file) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("{}Invalid configuration {}:", CROSS, style(file).bold());
            for cause in e.chain() {
                eprintln!("  {}", style(cause).red());
            }
            None
        }
    }
}

/// Directory the configuration lives in; commands start there
fn build_dir_for(file: &str) -> Result<PathBuf> {
    let parent = Path::new(file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);
    let dir = match parent {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    dir.canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))
}

async fn run_build(cmd: &RunCommand, verbose: bool) -> Result<ExitCode> {
    let config = match load_config(&cmd.file) {
        Some(config) => config,
        None => return Ok(ExitCode::from(EXIT_CONFIG)),
    };

    let build_dir = build_dir_for(&cmd.file)?;
    let project = match &cmd.project {
        Some(project) => project.clone(),
        None => build_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "build".to_string()),
    };

    let mut build = match config.to_build(&project) {
        Ok(build) => build,
        Err(e) => {
            eprintln!("{}Invalid configuration: {:#}", CROSS, e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let home = match &cmd.home {
        Some(home) => {
            let home = PathBuf::from(home);
            if home.is_absolute() {
                HomeDir::Fixed(home)
            } else {
                HomeDir::Fixed(std::env::current_dir()?.join(home))
            }
        }
        None => HomeDir::Scoped,
    };
    let mut workspace = Workspace::new(&build_dir, home, std::env::var("PATH").unwrap_or_default());
    workspace.overrides = cmd.var.clone();

    let notifier: Arc<dyn Notifier> = match cmd.notify {
        NotifyArg::Log => Arc::new(LogNotifier),
        NotifyArg::Sendmail => {
            let mut sendmail = SendmailNotifier::new(cmd.sendmail.clone());
            if let Some(from) = &cmd.mail_from {
                sendmail = sendmail.with_from(from.clone());
            }
            if let Some(secs) = cmd.mail_timeout {
                sendmail = sendmail.with_timeout(Duration::from_secs(secs));
            }
            Arc::new(sendmail)
        }
        NotifyArg::None => Arc::new(NullNotifier),
    };

    let history: Option<Arc<dyn PersistenceBackend>> = if cmd.no_history || cmd.dry_run {
        None
    } else {
        match SqliteBuildStore::with_default_path().await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!("Build history unavailable: {:#}", e);
                None
            }
        }
    };

    println!("{}Loaded {} ({} jobs)", INFO, style(&cmd.file).bold(), build.jobs.len());

    let status = if cmd.dry_run {
        execute(DryRunRunner, workspace, notifier, history, &mut build, verbose).await
    } else {
        let runner = ShellRunner::new(cmd.shell.clone(), cmd.timeout);
        execute(runner, workspace, notifier, history, &mut build, verbose).await
    };

    Ok(match status {
        Some(BuildStatus::Passed) => ExitCode::SUCCESS,
        Some(_) => ExitCode::from(EXIT_FAILED),
        None => {
            eprintln!("\n{}Interrupted", WARN);
            ExitCode::from(EXIT_INTERRUPTED)
        }
    })
}

/// Run the build; `None` when interrupted
async fn execute<R: CommandRunner>(
    runner: R,
    workspace: Workspace,
    notifier: Arc<dyn Notifier>,
    history: Option<Arc<dyn PersistenceBackend>>,
    build: &mut Build,
    verbose: bool,
) -> Option<BuildStatus> {
    let mut engine = BuildEngine::new(runner, workspace).with_notifier(notifier);
    if let Some(history) = history {
        engine = engine.with_history(history);
    }

    let output = Arc::new(TerminalOutput::new(true));
    engine.add_event_handler(move |event| output.on_event(&event));
    if verbose {
        engine.add_event_handler(|event| tracing::debug!(?event, "event"));
    }

    tokio::select! {
        status = engine.execute(build) => Some(status),
        _ = tokio::signal::ctrl_c() => None,
    }
}

fn validate_config(cmd: &ValidateCommand) -> Result<ExitCode> {
    let config = match load_config(&cmd.file) {
        Some(config) => config,
        None => return Ok(ExitCode::from(EXIT_CONFIG)),
    };
    let build = match config.to_build("validate") {
        Ok(build) => build,
        Err(e) => {
            eprintln!("{}Invalid configuration: {:#}", CROSS, e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else if cmd.yaml {
        print!("{}", config.to_yaml()?);
    } else {
        println!("{}Configuration is valid", CHECK);
        println!("  Jobs: {}", style(build.jobs.len()).cyan());
        println!("  Script commands: {}", style(config.script.len()).cyan());
        if let Some(email) = build.email() {
            println!(
                "  Notify: {} (on_success: {:?}, on_failure: {:?})",
                style(email.recipients.join(", ")).bold(),
                email.on_success,
                email.on_failure
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn show_matrix(cmd: &MatrixCommand) -> Result<ExitCode> {
    let config = match load_config(&cmd.file) {
        Some(config) => config,
        None => return Ok(ExitCode::from(EXIT_CONFIG)),
    };
    let build = match config.to_build("matrix") {
        Ok(build) => build,
        Err(e) => {
            eprintln!("{}Invalid configuration: {:#}", CROSS, e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&build.jobs)?);
    } else {
        println!("{}{} jobs:", INFO, build.jobs.len());
        for job in &build.jobs {
            println!("{}", format_job_line(job));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn show_history(cmd: &HistoryCommand) -> Result<ExitCode> {
    let store = SqliteBuildStore::with_default_path().await?;

    if let Some(build_id) = cmd.build {
        let Some(summary) = store.load_build(build_id).await? else {
            eprintln!("{}No build {}", CROSS, build_id);
            return Ok(ExitCode::from(EXIT_FAILED));
        };
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("{}", format_build_detail(&summary));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut builds = match &cmd.project {
        Some(project) => store.list_builds(project).await?,
        None => {
            let mut all = Vec::new();
            for project in store.list_projects().await? {
                all.extend(store.list_builds(&project).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    builds.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "builds": builds });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else if builds.is_empty() {
        println!("{}No builds found", INFO);
    } else {
        println!("{}Build history (latest {}):", INFO, builds.len());
        for summary in &builds {
            println!("  {}", format_build_summary(summary));
        }
    }
    Ok(ExitCode::SUCCESS)
}
