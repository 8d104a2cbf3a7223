//! Whether a finished build is reported

use crate::core::{config::EmailNotification, config::NotifyPolicy, BuildStatus};

/// Outcome of the notification policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyDecision {
    Send,
    Suppress(String),
}

/// Decide whether to notify about a build
///
/// `previous` is the status of the project's last recorded build; with no
/// history every outcome counts as a change. Failed and errored builds both
/// follow `on_failure`.
pub fn decide(
    email: &EmailNotification,
    status: BuildStatus,
    previous: Option<BuildStatus>,
) -> NotifyDecision {
    if !email.enabled {
        return NotifyDecision::Suppress("e-mail notifications disabled".to_string());
    }

    let (policy, key) = if status.is_success() {
        (email.on_success, "on_success")
    } else if status.is_failure() {
        (email.on_failure, "on_failure")
    } else {
        return NotifyDecision::Suppress(format!("build {}", status));
    };

    match policy {
        NotifyPolicy::Always => NotifyDecision::Send,
        NotifyPolicy::Never => NotifyDecision::Suppress(format!("{}: never", key)),
        NotifyPolicy::Change => match previous {
            Some(prev) if prev.is_success() == status.is_success() => {
                NotifyDecision::Suppress(format!("{}: change, still {}", key, status))
            }
            _ => NotifyDecision::Send,
        },
    }
}
