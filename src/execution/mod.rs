//! Build execution engine

pub mod engine;
pub mod events;
pub mod executor;
pub mod runner;

pub use engine::{BuildEngine, HomeDir, Workspace};
pub use events::{EventBus, ExecutionEvent};
pub use executor::{JobExecutor, JobOutcome};
pub use runner::{CommandOutcome, CommandRunner, DryRunRunner, RunnerError, ShellRunner, ShellSession};
