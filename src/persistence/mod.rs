//! Persistence layer for build history
//!
//! History is what makes the `change` notification policy work: the engine
//! reads the latest finished build of a project before recording the new one.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteBuildStore;

use crate::core::{Build, BuildStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Unique build ID
    pub build_id: Uuid,

    /// Project name
    pub project: String,

    /// Build outcome
    pub status: BuildStatus,

    /// When the build started
    pub started_at: DateTime<Utc>,

    /// When the build finished
    pub finished_at: Option<DateTime<Utc>>,

    /// Number of jobs in the matrix
    pub total_jobs: usize,

    /// Number of passed jobs
    pub passed_jobs: usize,

    /// Number of failed or errored jobs
    pub failed_jobs: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a build
    async fn save_build(&self, build: &BuildSummary) -> Result<()>;

    /// Load a build by ID
    async fn load_build(&self, build_id: Uuid) -> Result<Option<BuildSummary>>;

    /// List builds of a project, newest first
    async fn list_builds(&self, project: &str) -> Result<Vec<BuildSummary>>;

    /// Most recent build of a project
    async fn latest_build(&self, project: &str) -> Result<Option<BuildSummary>> {
        Ok(self.list_builds(project).await?.into_iter().next())
    }

    /// List all project names
    async fn list_projects(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    builds: RwLock<HashMap<Uuid, BuildSummary>>,
    by_project: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_build(&self, build: &BuildSummary) -> Result<()> {
        let mut builds = self.builds.write().await;
        let existed = builds.insert(build.build_id, build.clone()).is_some();

        if !existed {
            let mut by_project = self.by_project.write().await;
            by_project
                .entry(build.project.clone())
                .or_default()
                .push(build.build_id);
        }

        Ok(())
    }

    async fn load_build(&self, build_id: Uuid) -> Result<Option<BuildSummary>> {
        let builds = self.builds.read().await;
        Ok(builds.get(&build_id).cloned())
    }

    async fn list_builds(&self, project: &str) -> Result<Vec<BuildSummary>> {
        let builds = self.builds.read().await;
        let by_project = self.by_project.read().await;

        Ok(by_project
            .get(project)
            .map(|ids| ids.iter().rev().filter_map(|id| builds.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let by_project = self.by_project.read().await;
        let mut projects: Vec<String> = by_project.keys().cloned().collect();
        projects.sort();
        Ok(projects)
    }
}

/// Create a summary from a build
pub fn create_summary(build: &Build) -> BuildSummary {
    BuildSummary {
        build_id: build.state.build_id,
        project: build.project.clone(),
        status: build.state.status,
        started_at: build.state.started_at.unwrap_or_else(Utc::now),
        finished_at: build.state.finished_at,
        total_jobs: build.state.total_jobs,
        passed_jobs: build.state.passed_jobs,
        failed_jobs: build.state.failed_jobs,
    }
}
