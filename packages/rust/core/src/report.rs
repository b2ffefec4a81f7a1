//! Batch report: `run_report.json` and the navigable `INDEX.md`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use repoctx_shared::{ArtifactStatus, BatchRun, RepoJob, RepoState, Result, Tier};

use crate::writer::{write_atomic, write_json};

pub const REPORT_FILE: &str = "run_report.json";
pub const INDEX_FILE: &str = "INDEX.md";

/// Condensed error summaries are cut to this many characters.
const ERROR_SUMMARY_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub done: usize,
    pub partial: usize,
    pub failed: usize,
}

/// Nearest-rank percentiles over per-repository durations, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStats {
    pub spec_id: String,
    pub file_name: String,
    pub tier: Tier,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `succeeded / attempted`; 0.0 when never attempted.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub repo_id: String,
    pub repo_path: String,
    pub state: RepoState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `spec_id: condensed error` for every failed artifact.
    #[serde(default)]
    pub failed_artifacts: Vec<String>,
}

/// A file that could not be extracted, whatever the repository outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub repo_id: String,
    pub path: String,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub wall_clock_ms: u64,
    pub cancelled: bool,
    /// Jobs submitted in this run.
    pub submitted: usize,
    pub counts: StateCounts,
    #[serde(default)]
    pub resumed: Vec<String>,
    #[serde(default)]
    pub not_started: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durations: Option<DurationStats>,
    pub artifacts: Vec<ArtifactStats>,
    pub failures: Vec<FailureSummary>,
    pub extraction_errors: usize,
    #[serde(default)]
    pub extraction_failures: Vec<ExtractionFailure>,
    /// `failed / submitted`.
    pub failure_rate: f64,
    pub failure_threshold: f64,
    pub exceeds_threshold: bool,
}

impl RunReport {
    #[instrument(skip_all, fields(run_id = %run.run_id, jobs = run.jobs.len()))]
    pub fn from_run(run: &BatchRun, failure_threshold: f64) -> Self {
        let counts = StateCounts {
            done: run.count(RepoState::Done),
            partial: run.count(RepoState::Partial),
            failed: run.count(RepoState::Failed),
        };
        let submitted = run.jobs.len();
        let failure_rate = if submitted == 0 {
            0.0
        } else {
            counts.failed as f64 / submitted as f64
        };

        let durations: Vec<u64> = run.jobs.iter().filter_map(RepoJob::duration_ms).collect();
        let wall_clock_ms = run
            .ended_at
            .map(|end| (end - run.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        Self {
            run_id: run.run_id.to_string(),
            started_at: run.started_at,
            ended_at: run.ended_at,
            wall_clock_ms,
            cancelled: run.cancelled,
            submitted,
            counts,
            resumed: run.resumed.clone(),
            not_started: run.not_started.clone(),
            durations: DurationStats::from_samples(&durations),
            artifacts: artifact_stats(&run.jobs),
            failures: failure_summaries(&run.jobs),
            extraction_errors: run.jobs.iter().map(|j| j.extraction_errors.len()).sum(),
            extraction_failures: extraction_failures(&run.jobs),
            failure_rate,
            failure_threshold,
            exceeds_threshold: failure_rate > failure_threshold,
        }
    }
}

impl DurationStats {
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();

        Some(Self {
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            mean_ms: sum as f64 / sorted.len() as f64,
            p50_ms: nearest_rank(&sorted, 50),
            p90_ms: nearest_rank(&sorted, 90),
            p95_ms: nearest_rank(&sorted, 95),
            p99_ms: nearest_rank(&sorted, 99),
        })
    }
}

/// `sorted[ceil(p/100 * n) - 1]`. `sorted` must be non-empty.
fn nearest_rank(sorted: &[u64], percentile: usize) -> u64 {
    let n = sorted.len();
    let rank = (percentile * n).div_ceil(100).clamp(1, n);
    sorted[rank - 1]
}

fn artifact_stats(jobs: &[RepoJob]) -> Vec<ArtifactStats> {
    // Keyed by spec id, listed in first-seen (catalog) order.
    let mut order: Vec<String> = Vec::new();
    let mut stats: BTreeMap<String, ArtifactStats> = BTreeMap::new();

    for result in jobs.iter().flat_map(|j| &j.results) {
        let entry = stats.entry(result.spec_id.clone()).or_insert_with(|| {
            order.push(result.spec_id.clone());
            ArtifactStats {
                spec_id: result.spec_id.clone(),
                file_name: result.file_name.clone(),
                tier: result.tier,
                attempted: 0,
                succeeded: 0,
                failed: 0,
                skipped: 0,
                success_rate: 0.0,
            }
        });
        match result.status {
            ArtifactStatus::Success => {
                entry.attempted += 1;
                entry.succeeded += 1;
            }
            ArtifactStatus::Failed => {
                entry.attempted += 1;
                entry.failed += 1;
            }
            ArtifactStatus::Skipped => entry.skipped += 1,
        }
    }

    order
        .into_iter()
        .filter_map(|id| stats.remove(&id))
        .map(|mut s| {
            if s.attempted > 0 {
                s.success_rate = s.succeeded as f64 / s.attempted as f64;
            }
            s
        })
        .collect()
}

fn failure_summaries(jobs: &[RepoJob]) -> Vec<FailureSummary> {
    let mut failures: Vec<FailureSummary> = jobs
        .iter()
        .filter(|j| matches!(j.state, RepoState::Failed | RepoState::Partial))
        .map(|job| FailureSummary {
            repo_id: job.repo_id.clone(),
            repo_path: job.repo_path.display().to_string(),
            state: job.state,
            error: job.error.as_deref().map(condense),
            failed_artifacts: job
                .results
                .iter()
                .filter(|r| r.status == ArtifactStatus::Failed)
                .map(|r| format!("{}: {}", r.spec_id, condense(r.error.as_deref().unwrap_or("unknown error"))))
                .collect(),
        })
        .collect();
    failures.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
    failures
}

fn extraction_failures(jobs: &[RepoJob]) -> Vec<ExtractionFailure> {
    let mut failures: Vec<ExtractionFailure> = jobs
        .iter()
        .flat_map(|job| {
            job.extraction_errors.iter().map(|e| ExtractionFailure {
                repo_id: job.repo_id.clone(),
                path: e.path.clone(),
                cause: condense(&e.cause),
            })
        })
        .collect();
    failures.sort_by(|a, b| (&a.repo_id, &a.path).cmp(&(&b.repo_id, &b.path)));
    failures
}

/// First line of an error, cut to a fixed length.
fn condense(error: &str) -> String {
    let line = error.lines().next().unwrap_or("").trim();
    if line.chars().count() <= ERROR_SUMMARY_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(ERROR_SUMMARY_CHARS).collect();
        format!("{cut}…")
    }
}

// ---------------------------------------------------------------------------
// INDEX.md
// ---------------------------------------------------------------------------

/// Repository → artifacts → status, with links relative to the output directory.
pub fn render_index(run: &BatchRun, report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Repository Context Index\n");
    let _ = writeln!(out, "- **Run:** `{}`", report.run_id);
    let _ = writeln!(
        out,
        "- **Repositories:** {} submitted, {} done, {} partial, {} failed",
        report.submitted, report.counts.done, report.counts.partial, report.counts.failed
    );
    if !report.resumed.is_empty() {
        let _ = writeln!(out, "- **Resumed (already complete):** {}", report.resumed.len());
    }
    if report.cancelled {
        let _ = writeln!(out, "- **Cancelled:** {} not started", report.not_started.len());
    }
    out.push('\n');

    let mut jobs: Vec<&RepoJob> = run.jobs.iter().collect();
    jobs.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));

    for job in jobs {
        let _ = writeln!(out, "## {} ({})\n", job.repo_id, job.state);
        if let Some(error) = &job.error {
            let _ = writeln!(out, "> {}\n", condense(error));
        }
        if !job.extraction_errors.is_empty() {
            out.push_str("Extraction errors:\n\n");
            for e in &job.extraction_errors {
                let _ = writeln!(out, "- `{}`: {}", e.path, condense(&e.cause));
            }
            out.push('\n');
        }
        if job.results.is_empty() {
            out.push_str("_No artifacts generated._\n\n");
            continue;
        }
        out.push_str("| Artifact | Tier | Status |\n|---|---|---|\n");
        for result in &job.results {
            let name = match result.status {
                ArtifactStatus::Success => {
                    format!("[{}]({}/{})", result.file_name, job.repo_id, result.file_name)
                }
                _ => format!("`{}`", result.file_name),
            };
            let _ = writeln!(out, "| {name} | {} | {} |", result.tier, result.status.as_str());
        }
        out.push('\n');
    }

    if !report.not_started.is_empty() {
        out.push_str("## Not started\n\n");
        for repo in &report.not_started {
            let _ = writeln!(out, "- {repo}");
        }
        out.push('\n');
    }
    out
}

/// Write `run_report.json` and `INDEX.md` into the batch output directory.
pub fn write_report(output_dir: &Path, run: &BatchRun, report: &RunReport) -> Result<()> {
    write_json(&output_dir.join(REPORT_FILE), report)?;
    write_atomic(&output_dir.join(INDEX_FILE), render_index(run, report).as_bytes())?;
    info!(dir = %output_dir.display(), "run report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Duration;
    use repoctx_shared::{ArtifactResult, ExtractionError, RepoTarget, RunId};

    use super::*;

    fn job(id: &str, state: RepoState, ms: i64, results: Vec<ArtifactResult>) -> RepoJob {
        let mut job = RepoJob::new(&RepoTarget {
            id: id.into(),
            path: PathBuf::from(format!("/src/{id}")),
        });
        let start = Utc::now();
        job.state = state;
        job.started_at = Some(start);
        job.ended_at = Some(start + Duration::milliseconds(ms));
        job.results = results;
        job
    }

    fn artifact(id: &str, tier: Tier, status: ArtifactStatus) -> ArtifactResult {
        ArtifactResult {
            status,
            error: (status == ArtifactStatus::Failed).then(|| "timed out after 300000 ms\ntrace".into()),
            ..ArtifactResult::skipped(id, &format!("{id}.md"), tier)
        }
    }

    fn sample_run() -> BatchRun {
        let mut run = BatchRun::new(RunId::new());
        run.jobs.push(job(
            "alpha",
            RepoState::Done,
            100,
            vec![
                artifact("primary-context", Tier::Critical, ArtifactStatus::Success),
                artifact("dependencies", Tier::Enhancement, ArtifactStatus::Skipped),
            ],
        ));
        run.jobs.push(job(
            "beta",
            RepoState::Failed,
            300,
            vec![
                artifact("primary-context", Tier::Critical, ArtifactStatus::Failed),
                artifact("dependencies", Tier::Enhancement, ArtifactStatus::Skipped),
            ],
        ));
        let mut gamma = job("gamma", RepoState::Failed, 200, Vec::new());
        gamma.error = Some("repository gamma failed: cannot read root".into());
        gamma.extraction_errors.push(ExtractionError {
            path: "a.py".into(),
            cause: "bad utf-8".into(),
        });
        run.jobs.push(gamma);
        run.resumed.push("delta".into());
        run.ended_at = Some(run.started_at + Duration::seconds(2));
        run
    }

    #[test]
    fn nearest_rank_percentiles() {
        let samples: Vec<u64> = (1..=100).collect();
        let stats = DurationStats::from_samples(&samples).unwrap();
        assert_eq!(stats.min_ms, 1);
        assert_eq!(stats.max_ms, 100);
        assert_eq!(stats.p50_ms, 50);
        assert_eq!(stats.p90_ms, 90);
        assert_eq!(stats.p99_ms, 99);
        assert!((stats.mean_ms - 50.5).abs() < f64::EPSILON);

        let single = DurationStats::from_samples(&[7]).unwrap();
        assert_eq!((single.p50_ms, single.p99_ms), (7, 7));
        assert!(DurationStats::from_samples(&[]).is_none());
    }

    #[test]
    fn report_aggregates_run() {
        let run = sample_run();
        let report = RunReport::from_run(&run, 0.5);

        assert_eq!(report.submitted, 3);
        assert_eq!(report.counts, StateCounts { done: 1, partial: 0, failed: 2 });
        assert_eq!(report.wall_clock_ms, 2000);
        assert_eq!(report.resumed, vec!["delta".to_string()]);
        assert_eq!(report.extraction_errors, 1);
        assert_eq!(
            report.extraction_failures,
            vec![ExtractionFailure {
                repo_id: "gamma".into(),
                path: "a.py".into(),
                cause: "bad utf-8".into(),
            }]
        );
        assert_eq!(report.durations.unwrap().p50_ms, 200);

        let primary = &report.artifacts[0];
        assert_eq!(primary.spec_id, "primary-context");
        assert_eq!((primary.attempted, primary.succeeded, primary.failed), (2, 1, 1));
        assert!((primary.success_rate - 0.5).abs() < f64::EPSILON);
        let deps = &report.artifacts[1];
        assert_eq!((deps.attempted, deps.skipped), (0, 2));
        assert_eq!(deps.success_rate, 0.0);

        let ids: Vec<&str> = report.failures.iter().map(|f| f.repo_id.as_str()).collect();
        assert_eq!(ids, vec!["beta", "gamma"]);
        assert_eq!(
            report.failures[0].failed_artifacts,
            vec!["primary-context: timed out after 300000 ms".to_string()]
        );

        assert!((report.failure_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(report.exceeds_threshold);
        assert!(!RunReport::from_run(&run, 0.7).exceeds_threshold);
    }

    #[test]
    fn empty_run_report() {
        let report = RunReport::from_run(&BatchRun::new(RunId::new()), 0.1);
        assert_eq!(report.submitted, 0);
        assert_eq!(report.failure_rate, 0.0);
        assert!(!report.exceeds_threshold);
        assert!(report.durations.is_none());
    }

    #[test]
    fn condense_keeps_first_line() {
        assert_eq!(condense("first\nsecond"), "first");
        let long = "x".repeat(500);
        assert_eq!(condense(&long).chars().count(), ERROR_SUMMARY_CHARS + 1);
    }

    #[test]
    fn index_links_successful_artifacts() {
        let run = sample_run();
        let report = RunReport::from_run(&run, 0.5);
        let index = render_index(&run, &report);

        assert!(index.contains("## alpha (done)"));
        assert!(index.contains("[primary-context.md](alpha/primary-context.md)"));
        assert!(index.contains("| `primary-context.md` | critical | failed |"));
        assert!(index.contains("> repository gamma failed: cannot read root"));
        assert!(index.contains("_No artifacts generated._"));
        assert!(index.contains("- `a.py`: bad utf-8"));
        assert!(index.contains("Resumed (already complete):** 1"));
    }

    #[test]
    fn extraction_errors_of_done_repo_are_listed() {
        let mut run = BatchRun::new(RunId::new());
        let mut done = job(
            "clean",
            RepoState::Done,
            50,
            vec![artifact("primary-context", Tier::Critical, ArtifactStatus::Success)],
        );
        done.extraction_errors.push(ExtractionError {
            path: "nb/broken.ipynb".into(),
            cause: "invalid notebook JSON: expected value\nat line 1".into(),
        });
        run.jobs.push(done);

        let report = RunReport::from_run(&run, 0.1);
        assert!(report.failures.is_empty());
        assert_eq!(report.extraction_failures.len(), 1);
        assert_eq!(report.extraction_failures[0].path, "nb/broken.ipynb");
        assert_eq!(report.extraction_failures[0].cause, "invalid notebook JSON: expected value");

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("nb/broken.ipynb"));
        let index = render_index(&run, &report);
        assert!(index.contains("## clean (done)"));
        assert!(index.contains("- `nb/broken.ipynb`: invalid notebook JSON: expected value"));
    }

    #[test]
    fn report_files_written() {
        let dir = std::env::temp_dir().join(format!("repoctx-report-{}", uuid::Uuid::now_v7()));
        let run = sample_run();
        let report = RunReport::from_run(&run, 0.5);
        write_report(&dir, &run, &report).unwrap();

        let json = std::fs::read_to_string(dir.join(REPORT_FILE)).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, report.run_id);
        assert!(dir.join(INDEX_FILE).is_file());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
