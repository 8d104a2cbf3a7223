//! cirunner - runs Travis-style CI configurations locally
//!
//! A configuration is parsed and expanded into a job matrix; each job gets a
//! conda environment, runs its lifecycle phases in one shell session, and the
//! build outcome is reported by e-mail according to the notification policy.

pub mod cli;
pub mod core;
pub mod execution;
pub mod notify;
pub mod persistence;
pub mod provision;

// Re-export commonly used types
pub use crate::core::{config::BuildConfig, Build, BuildStatus, Job, JobEnvironment, Phase};
pub use crate::execution::{BuildEngine, CommandRunner, ExecutionEvent, HomeDir, ShellRunner, Workspace};
pub use crate::notify::{BuildReport, Notifier, NotifyError};
pub use crate::persistence::{BuildSummary, InMemoryPersistence, PersistenceBackend};
