//! SQL migration definitions for the run ledger.
//!
//! Migrations are applied in order on open. Each one records its version in
//! `schema_migrations` as its final statement.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: runs, repo_jobs, artifact_results",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    ended_at    TEXT,
    cancelled   INTEGER NOT NULL DEFAULT 0,
    config_json TEXT
);

CREATE TABLE IF NOT EXISTS repo_jobs (
    id          TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    repo_id     TEXT NOT NULL,
    repo_path   TEXT NOT NULL,
    state       TEXT NOT NULL,
    started_at  TEXT,
    ended_at    TEXT,
    duration_ms INTEGER,
    error       TEXT,
    UNIQUE(run_id, repo_path)
);

CREATE INDEX IF NOT EXISTS idx_repo_jobs_path ON repo_jobs(repo_path);

CREATE TABLE IF NOT EXISTS artifact_results (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      TEXT NOT NULL REFERENCES repo_jobs(id) ON DELETE CASCADE,
    spec_id     TEXT NOT NULL,
    tier        TEXT NOT NULL,
    status      TEXT NOT NULL,
    attempts    INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    error       TEXT
);

CREATE INDEX IF NOT EXISTS idx_artifact_results_job ON artifact_results(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Store the run report alongside each run",
            sql: r#"
ALTER TABLE runs ADD COLUMN report_json TEXT;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
