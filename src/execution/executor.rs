//! Job executor - runs the lifecycle phases of one job

use crate::{
    core::{
        config::BuildConfig, BuildStatus, CommandRecord, Job, JobEnvironment, Phase,
    },
    execution::{
        events::{EventBus, ExecutionEvent},
        runner::{CommandRunner, ShellSession},
    },
    provision::Provisioner,
};
use tracing::{debug, error, info, warn};

/// Result of executing a job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: BuildStatus,
    pub commands: Vec<CommandRecord>,
    /// Provisioning or runner error that ended the job
    pub error: Option<String>,
}

impl JobOutcome {
    fn new() -> Self {
        Self {
            status: BuildStatus::Running,
            commands: Vec::new(),
            error: None,
        }
    }

    /// A job that errored before any command ran
    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            status: BuildStatus::Errored,
            commands: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Executes a single job
pub struct JobExecutor<R> {
    runner: R,
}

impl<R: CommandRunner> JobExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Run every phase of a job and return its outcome
    ///
    /// A failing setup command (before_install, install, before_script)
    /// errors the job and nothing after it runs. A failing script command
    /// fails the job and stops the remaining script commands. The after
    /// phases run for their side effects only.
    pub async fn execute(
        &self,
        config: &BuildConfig,
        job: &Job,
        mut env: JobEnvironment,
        events: &EventBus,
    ) -> JobOutcome {
        info!("Executing job {}: {}", job.number, job.spec.label());

        let provision_commands = match &config.conda {
            Some(conda) => {
                match Provisioner::new(conda).plan(&job.spec.os, job.spec.python.as_deref(), &env) {
                    Ok(plan) => {
                        plan.apply_path(&mut env);
                        plan.commands
                    }
                    Err(e) => {
                        error!("Provisioning failed for job {}: {}", job.number, e);
                        return JobOutcome::errored(e.to_string());
                    }
                }
            }
            None => Vec::new(),
        };

        let mut session = match self.runner.open(&env).await {
            Ok(session) => session,
            Err(e) => {
                error!("Could not start shell for job {}: {}", job.number, e);
                return JobOutcome::errored(e.to_string());
            }
        };

        let mut outcome = JobOutcome::new();

        for phase in Phase::SETUP {
            let commands: Vec<String> = if phase == Phase::Install {
                provision_commands
                    .iter()
                    .chain(config.install.iter())
                    .cloned()
                    .collect()
            } else {
                config.commands(phase).to_vec()
            };

            let passed = self
                .run_phase(session.as_mut(), &job.number, phase, &commands, events, &mut outcome)
                .await;
            if !passed {
                warn!("Job {} errored in {}", job.number, phase);
                outcome.status = BuildStatus::Errored;
                session.close().await;
                return outcome;
            }
        }

        let script_passed = self
            .run_phase(
                session.as_mut(),
                &job.number,
                Phase::Script,
                config.commands(Phase::Script),
                events,
                &mut outcome,
            )
            .await;

        outcome.status = if outcome.error.is_some() {
            BuildStatus::Errored
        } else if script_passed {
            BuildStatus::Passed
        } else {
            BuildStatus::Failed
        };

        let follow_up = if script_passed {
            Phase::AfterSuccess
        } else {
            Phase::AfterFailure
        };
        for phase in [follow_up, Phase::AfterScript] {
            self.run_phase(
                session.as_mut(),
                &job.number,
                phase,
                config.commands(phase),
                events,
                &mut outcome,
            )
            .await;
        }

        session.close().await;
        info!("Job {} finished: {}", job.number, outcome.status);
        outcome
    }

    /// Run the commands of one phase; true when every command exited zero
    async fn run_phase(
        &self,
        session: &mut dyn ShellSession,
        job: &str,
        phase: Phase,
        commands: &[String],
        events: &EventBus,
        outcome: &mut JobOutcome,
    ) -> bool {
        if commands.is_empty() {
            return true;
        }

        debug!("Job {}: {} ({} commands)", job, phase, commands.len());
        events.emit(ExecutionEvent::PhaseStarted {
            job: job.to_string(),
            phase,
        });

        for command in commands {
            events.emit(ExecutionEvent::CommandStarted {
                job: job.to_string(),
                phase,
                command: command.clone(),
            });

            let forward = |line: &str| {
                events.emit(ExecutionEvent::CommandOutput {
                    job: job.to_string(),
                    line: line.to_string(),
                })
            };

            let (exit_code, duration_ms, output_tail) = match session.run(command, Some(&forward)).await {
                Ok(result) => (
                    Some(result.exit_code),
                    result.duration.as_millis() as u64,
                    result.output_tail,
                ),
                Err(e) => {
                    if phase.affects_outcome() {
                        error!("Job {}: `{}` could not run: {}", job, command, e);
                        outcome.error = Some(e.to_string());
                    } else {
                        warn!("Job {}: skipped {} command `{}`: {}", job, phase, command, e);
                    }
                    (None, 0, Vec::new())
                }
            };

            events.emit(ExecutionEvent::CommandFinished {
                job: job.to_string(),
                phase,
                command: command.clone(),
                exit_code,
                duration_ms,
            });
            outcome.commands.push(CommandRecord {
                phase,
                command: command.clone(),
                exit_code,
                duration_ms,
                output_tail,
            });

            if exit_code != Some(0) {
                if !phase.affects_outcome() {
                    warn!(
                        "Job {}: {} command `{}` exited with {:?}",
                        job, phase, command, exit_code
                    );
                }
                return false;
            }
        }

        true
    }
}
