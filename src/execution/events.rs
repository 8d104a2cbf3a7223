//! Events emitted while a build runs

use crate::core::{BuildStatus, Phase};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Events that can occur during build execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    BuildStarted {
        build_id: Uuid,
        project: String,
        jobs: usize,
    },
    JobStarted {
        job: String,
        label: String,
    },
    PhaseStarted {
        job: String,
        phase: Phase,
    },
    CommandStarted {
        job: String,
        phase: Phase,
        command: String,
    },
    CommandOutput {
        job: String,
        line: String,
    },
    CommandFinished {
        job: String,
        phase: Phase,
        command: String,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
    JobFinished {
        job: String,
        status: BuildStatus,
    },
    JobCanceled {
        job: String,
        reason: String,
    },
    NotificationSent {
        recipients: Vec<String>,
    },
    NotificationSuppressed {
        reason: String,
    },
    NotificationFailed {
        error: String,
    },
    BuildFinished {
        build_id: Uuid,
        status: BuildStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("handlers", &count).finish()
    }
}
