//! Job lifecycle phases

use serde::{Deserialize, Serialize};
use std::fmt;

/// A lifecycle phase of a job, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeInstall,
    Install,
    BeforeScript,
    Script,
    AfterSuccess,
    AfterFailure,
    AfterScript,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::BeforeInstall,
        Phase::Install,
        Phase::BeforeScript,
        Phase::Script,
        Phase::AfterSuccess,
        Phase::AfterFailure,
        Phase::AfterScript,
    ];

    /// Phases that prepare the environment; failing one errors the job
    pub const SETUP: [Phase; 3] = [Phase::BeforeInstall, Phase::Install, Phase::BeforeScript];

    /// Configuration key for this phase
    pub fn key(self) -> &'static str {
        match self {
            Phase::BeforeInstall => "before_install",
            Phase::Install => "install",
            Phase::BeforeScript => "before_script",
            Phase::Script => "script",
            Phase::AfterSuccess => "after_success",
            Phase::AfterFailure => "after_failure",
            Phase::AfterScript => "after_script",
        }
    }

    /// Whether a failing command in this phase changes the job status
    pub fn affects_outcome(self) -> bool {
        !matches!(
            self,
            Phase::AfterSuccess | Phase::AfterFailure | Phase::AfterScript
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
