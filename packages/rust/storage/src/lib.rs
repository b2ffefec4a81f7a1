//! libSQL run ledger.
//!
//! The [`Ledger`] records every batch run, the terminal state of each
//! repository job and its per-artifact outcomes. Resume reads it back to
//! skip repositories whose most recent job finished `Done`.
//!
//! Writes are issued by the orchestrator's collection loop only, one job at
//! a time, so a single connection is sufficient.

mod migrations;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use repoctx_shared::{RepoCtxError, RepoJob, RepoState, Result, RunId};
use tracing::{debug, info};
use uuid::Uuid;

/// A job row as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub repo_id: String,
    pub repo_path: PathBuf,
    pub state: RepoState,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub artifacts: Vec<ArtifactRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub spec_id: String,
    pub status: String,
    pub attempts: u32,
    pub error: Option<String>,
}

pub struct Ledger {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn db_err(e: libsql::Error) -> RepoCtxError {
    RepoCtxError::Storage(e.to_string())
}

impl Ledger {
    /// Open or create the ledger at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RepoCtxError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let ledger = Self { db, conn };
        ledger.run_migrations().await?;
        info!(path = %path.display(), "ledger opened");
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RepoCtxError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    pub async fn insert_run(
        &self,
        run_id: &RunId,
        started_at: DateTime<Utc>,
        config_json: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at, config_json) VALUES (?1, ?2, ?3)",
                params![run_id.to_string(), started_at.to_rfc3339(), config_json],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn finish_run(
        &self,
        run_id: &RunId,
        ended_at: DateTime<Utc>,
        cancelled: bool,
        report_json: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE runs SET ended_at = ?1, cancelled = ?2, report_json = ?3 WHERE id = ?4",
                params![
                    ended_at.to_rfc3339(),
                    i64::from(cancelled),
                    report_json,
                    run_id.to_string()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Record a terminal job and its artifact outcomes, replacing any earlier
    /// record of the same repository in the same run.
    pub async fn record_job(&self, run_id: &RunId, job: &RepoJob) -> Result<()> {
        let run = run_id.to_string();
        let path = job.repo_path.to_string_lossy().to_string();
        let job_id = Uuid::now_v7().to_string();

        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute(
            "DELETE FROM artifact_results WHERE job_id IN
               (SELECT id FROM repo_jobs WHERE run_id = ?1 AND repo_path = ?2)",
            params![run.as_str(), path.as_str()],
        )
        .await
        .map_err(db_err)?;
        tx.execute(
            "DELETE FROM repo_jobs WHERE run_id = ?1 AND repo_path = ?2",
            params![run.as_str(), path.as_str()],
        )
        .await
        .map_err(db_err)?;
        tx.execute(
            "INSERT INTO repo_jobs (id, run_id, repo_id, repo_path, state, started_at, ended_at, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job_id.as_str(),
                run.as_str(),
                job.repo_id.as_str(),
                path.as_str(),
                job.state.as_str(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.ended_at.map(|t| t.to_rfc3339()),
                job.duration_ms().map(|d| d as i64),
                job.error.as_deref(),
            ],
        )
        .await
        .map_err(db_err)?;

        for result in &job.results {
            tx.execute(
                "INSERT INTO artifact_results (job_id, spec_id, tier, status, attempts, duration_ms, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job_id.as_str(),
                    result.spec_id.as_str(),
                    result.tier.as_str(),
                    result.status.as_str(),
                    i64::from(result.attempts),
                    result.duration_ms as i64,
                    result.error.as_deref(),
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(repo = %job.repo_id, state = %job.state, "job recorded");
        Ok(())
    }

    /// Repository paths whose most recent job ended `Done`.
    pub async fn completed_repos(&self) -> Result<HashSet<PathBuf>> {
        let mut rows = self
            .conn
            .query(
                "SELECT repo_path, state FROM repo_jobs ORDER BY ended_at ASC, rowid ASC",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut latest: HashMap<String, String> = HashMap::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let path: String = row.get(0).map_err(db_err)?;
            let state: String = row.get(1).map_err(db_err)?;
            latest.insert(path, state);
        }
        Ok(latest
            .into_iter()
            .filter(|(_, state)| state == RepoState::Done.as_str())
            .map(|(path, _)| PathBuf::from(path))
            .collect())
    }

    /// Jobs of one run ordered by repository id, with their artifacts.
    pub async fn list_jobs(&self, run_id: &RunId) -> Result<Vec<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, repo_id, repo_path, state, duration_ms, error
                 FROM repo_jobs WHERE run_id = ?1 ORDER BY repo_id",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let job_id: String = row.get(0).map_err(db_err)?;
            let state: String = row.get(3).map_err(db_err)?;
            jobs.push((
                job_id,
                JobRecord {
                    repo_id: row.get(1).map_err(db_err)?,
                    repo_path: PathBuf::from(row.get::<String>(2).map_err(db_err)?),
                    state: state.parse()?,
                    duration_ms: row.get::<i64>(4).ok().map(|d| d as u64),
                    error: row.get::<String>(5).ok(),
                    artifacts: Vec::new(),
                },
            ));
        }

        let mut records = Vec::with_capacity(jobs.len());
        for (job_id, mut record) in jobs {
            record.artifacts = self.list_artifacts(&job_id).await?;
            records.push(record);
        }
        Ok(records)
    }

    async fn list_artifacts(&self, job_id: &str) -> Result<Vec<ArtifactRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT spec_id, status, attempts, error FROM artifact_results
                 WHERE job_id = ?1 ORDER BY id",
                params![job_id],
            )
            .await
            .map_err(db_err)?;

        let mut artifacts = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            artifacts.push(ArtifactRecord {
                spec_id: row.get(0).map_err(db_err)?,
                status: row.get(1).map_err(db_err)?,
                attempts: row.get::<i64>(2).map_err(db_err)? as u32,
                error: row.get::<String>(3).ok(),
            });
        }
        Ok(artifacts)
    }
}
