//! SQLite-based build history store

use crate::persistence::{BuildSummary, PersistenceBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "SELECT id, project, status, started_at, finished_at, total_jobs, passed_jobs, failed_jobs FROM builds";

/// SQLite build store
pub struct SqliteBuildStore {
    pool: SqlitePool,
}

impl SqliteBuildStore {
    /// Open (or create) a store at the given path
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        let options = if path == Path::new(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // One connection keeps `:memory:` databases shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("cirunner");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(db_dir.join("builds.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS builds (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                total_jobs INTEGER NOT NULL DEFAULT 0,
                passed_jobs INTEGER NOT NULL DEFAULT 0,
                failed_jobs INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_project ON builds(project);
            CREATE INDEX IF NOT EXISTS idx_started_at ON builds(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<BuildSummary> {
        Ok(BuildSummary {
            build_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            project: row.get("project"),
            status: row.get::<String, _>("status").parse()?,
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            total_jobs: row.get::<i64, _>("total_jobs") as usize,
            passed_jobs: row.get::<i64, _>("passed_jobs") as usize,
            failed_jobs: row.get::<i64, _>("failed_jobs") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteBuildStore {
    async fn save_build(&self, build: &BuildSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO builds
            (id, project, status, started_at, finished_at, total_jobs, passed_jobs, failed_jobs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(build.build_id.to_string())
        .bind(&build.project)
        .bind(build.status.as_str())
        .bind(Self::to_naive(build.started_at))
        .bind(build.finished_at.map(Self::to_naive))
        .bind(build.total_jobs as i64)
        .bind(build.passed_jobs as i64)
        .bind(build.failed_jobs as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save build")?;

        Ok(())
    }

    async fn load_build(&self, build_id: Uuid) -> Result<Option<BuildSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(build_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load build")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_builds(&self, project: &str) -> Result<Vec<BuildSummary>> {
        let rows = sqlx::query(&format!(
            "{} WHERE project = ?1 ORDER BY started_at DESC, rowid DESC",
            SELECT_COLUMNS
        ))
        .bind(project)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list builds")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn latest_build(&self, project: &str) -> Result<Option<BuildSummary>> {
        let row = sqlx::query(&format!(
            "{} WHERE project = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(project)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest build")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT project FROM builds ORDER BY project ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list projects")?;

        Ok(rows.iter().map(|row| row.get("project")).collect())
    }
}
