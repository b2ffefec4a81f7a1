//! Batch orchestrator: many repositories on a bounded worker pool.
//!
//! A permit is acquired before each job is spawned, so at most
//! `repo_concurrency` jobs exist at once. Results are collected as they
//! complete; ledger writes happen here, one at a time. A job's error or
//! panic becomes that job's `Failed` state and nothing else.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use repoctx_shared::{BatchRun, RepoCtxError, RepoJob, RepoState, RepoTarget, Result, RunId};
use repoctx_storage::Ledger;

use crate::pipeline::{BatchProgress, PipelineContext, process_repo};
use crate::report::{RunReport, write_report};

/// Process every target and return the finished run.
///
/// Only an invalid configuration is an error. Cancelling `cancel` stops new
/// submissions at once; in-flight jobs get `grace_period` to finish, then
/// are aborted and recorded as `Failed`.
#[instrument(skip_all, fields(targets = targets.len()))]
pub async fn run_batch(
    targets: Vec<RepoTarget>,
    ctx: Arc<PipelineContext>,
    ledger: Option<Arc<Ledger>>,
    progress: Arc<dyn BatchProgress>,
    cancel: CancellationToken,
) -> Result<BatchRun> {
    let config = Arc::clone(&ctx.config);
    config.validate()?;

    let mut state = BatchState {
        run: BatchRun::new(RunId::new()),
        tasks: HashMap::new(),
        ledger,
        progress: Arc::clone(&progress),
    };
    let run_id = state.run.run_id.clone();

    if let Some(ledger) = &state.ledger {
        let settings = serde_json::json!({
            "repo_concurrency": config.repo_concurrency,
            "artifact_concurrency": config.artifact_concurrency,
            "max_tier": config.max_tier,
            "retries": config.retries,
            "resume": config.resume,
        });
        if let Err(e) = ledger
            .insert_run(&run_id, state.run.started_at, Some(&settings.to_string()))
            .await
        {
            warn!(error = %e, "failed to record run in ledger");
        }
    }

    let mut queue = state.resume_filter(targets, config.resume && !config.force).await;
    progress.batch_started(queue.len());
    info!(
        %run_id,
        queued = queue.len(),
        resumed = state.run.resumed.len(),
        repo_concurrency = config.repo_concurrency,
        artifact_concurrency = config.artifact_concurrency,
        "starting batch"
    );

    let semaphore = Arc::new(Semaphore::new(config.repo_concurrency));
    let hard_stop = CancellationToken::new();
    let mut set: JoinSet<RepoJob> = JoinSet::new();

    loop {
        if queue.is_empty() && set.is_empty() {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = set.join_next_with_id() => state.record(joined).await,
            permit = Arc::clone(&semaphore).acquire_owned(), if !queue.is_empty() => {
                let Ok(permit) = permit else { break };
                let Some(target) = queue.pop_front() else { continue };

                let ctx = Arc::clone(&ctx);
                let progress = Arc::clone(&progress);
                let stop = hard_stop.clone();
                let job_target = target.clone();
                let handle = set.spawn(async move {
                    let _permit = permit;
                    process_repo(&ctx, &job_target, progress.as_ref(), &stop).await
                });
                debug!(repo = %target.id, "job submitted");
                state.tasks.insert(handle.id(), target);
            }
        }
    }

    if cancel.is_cancelled() {
        state.run.cancelled = true;
        state.run.not_started = queue.drain(..).map(|t| t.id).collect();
        warn!(
            in_flight = set.len(),
            not_started = state.run.not_started.len(),
            grace_secs = config.grace_period.as_secs(),
            "batch cancelled, waiting for in-flight jobs"
        );

        let grace = tokio::time::sleep(config.grace_period);
        tokio::pin!(grace);
        while !set.is_empty() {
            tokio::select! {
                _ = &mut grace => break,
                Some(joined) = set.join_next_with_id() => state.record(joined).await,
            }
        }

        hard_stop.cancel();
        set.abort_all();
        while let Some(joined) = set.join_next_with_id().await {
            state.record(joined).await;
        }
    }

    let mut run = state.run;
    run.jobs.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
    run.ended_at = Some(Utc::now());
    progress.batch_finished(&run);

    info!(
        %run_id,
        done = run.count(RepoState::Done),
        partial = run.count(RepoState::Partial),
        failed = run.count(RepoState::Failed),
        cancelled = run.cancelled,
        "batch finished"
    );
    Ok(run)
}

/// Aggregate the run, write `run_report.json` and `INDEX.md`, and close the
/// ledger entry.
#[instrument(skip_all, fields(run_id = %run.run_id))]
pub async fn finish_run(
    run: &BatchRun,
    ctx: &PipelineContext,
    ledger: Option<&Ledger>,
) -> Result<RunReport> {
    let report = RunReport::from_run(run, ctx.config.failure_threshold);

    let output_dir = ctx.config.output_dir.clone();
    let (run_owned, report_owned) = (run.clone(), report.clone());
    tokio::task::spawn_blocking(move || write_report(&output_dir, &run_owned, &report_owned))
        .await
        .map_err(|e| RepoCtxError::Storage(format!("report task failed: {e}")))??;

    if let Some(ledger) = ledger {
        let report_json = serde_json::to_string(&report).ok();
        let ended_at = run.ended_at.unwrap_or_else(Utc::now);
        if let Err(e) = ledger
            .finish_run(&run.run_id, ended_at, run.cancelled, report_json.as_deref())
            .await
        {
            warn!(error = %e, "failed to close run in ledger");
        }
    }

    if report.exceeds_threshold {
        warn!(
            failure_rate = report.failure_rate,
            threshold = report.failure_threshold,
            "failure rate exceeds threshold"
        );
    }
    Ok(report)
}

struct BatchState {
    run: BatchRun,
    /// In-flight task id → target, to attribute aborts and panics.
    tasks: HashMap<Id, RepoTarget>,
    ledger: Option<Arc<Ledger>>,
    progress: Arc<dyn BatchProgress>,
}

impl BatchState {
    /// Drop targets a previous run completed, listing them as resumed.
    async fn resume_filter(&mut self, targets: Vec<RepoTarget>, resume: bool) -> VecDeque<RepoTarget> {
        let completed = match (&self.ledger, resume) {
            (Some(ledger), true) => match ledger.completed_repos().await {
                Ok(completed) => completed,
                Err(e) => {
                    warn!(error = %e, "could not read ledger, resuming nothing");
                    Default::default()
                }
            },
            _ => Default::default(),
        };

        let mut queue = VecDeque::with_capacity(targets.len());
        for target in targets {
            if completed.contains(&target.path) {
                debug!(repo = %target.id, "already done, skipping");
                self.run.resumed.push(target.id);
            } else {
                queue.push_back(target);
            }
        }
        queue
    }

    async fn record(&mut self, joined: std::result::Result<(Id, RepoJob), JoinError>) {
        let job = match joined {
            Ok((id, job)) => {
                self.tasks.remove(&id);
                job
            }
            Err(e) => {
                let Some(target) = self.tasks.remove(&e.id()) else {
                    warn!(error = %e, "untracked job finished");
                    return;
                };
                let mut job = RepoJob::new(&target);
                if e.is_cancelled() {
                    job.fail("cancelled");
                } else {
                    warn!(repo = %target.id, error = %e, "job panicked");
                    job.fail(format!("worker panicked: {e}"));
                }
                job
            }
        };

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record_job(&self.run.run_id, &job).await {
                warn!(repo = %job.repo_id, error = %e, "failed to record job in ledger");
            }
        }
        self.progress.repo_finished(&job);
        self.run.jobs.push(job);
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use repoctx_artifacts::{ArtifactSpec, Catalog, RenderContext};
    use repoctx_shared::{ArtifactError, BatchConfig, Tier};

    use super::*;
    use crate::pipeline::SilentProgress;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("repoctx-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_repo(root: &Path, name: &str) -> RepoTarget {
        let path = root.join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("main.py"), "def main():\n    pass\n").unwrap();
        RepoTarget {
            id: name.to_string(),
            path,
        }
    }

    fn context(out: &Path) -> Arc<PipelineContext> {
        Arc::new(PipelineContext::new(BatchConfig {
            output_dir: out.to_path_buf(),
            max_tier: Tier::Critical,
            repo_concurrency: 2,
            ..Default::default()
        }))
    }

    #[derive(Default)]
    struct Counting {
        finished: AtomicUsize,
    }

    impl BatchProgress for Counting {
        fn batch_started(&self, _total: usize) {}
        fn repo_state(&self, _repo_id: &str, _state: RepoState) {}
        fn repo_finished(&self, _job: &RepoJob) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        fn batch_finished(&self, _run: &BatchRun) {}
    }

    #[tokio::test]
    async fn mixed_targets_all_terminal() {
        let root = temp_dir("batch-src");
        let out = temp_dir("batch-out");
        let targets = vec![
            make_repo(&root, "a"),
            RepoTarget {
                id: "missing".into(),
                path: root.join("missing"),
            },
            make_repo(&root, "b"),
        ];

        let progress = Arc::new(Counting::default());
        let run = run_batch(targets, context(&out), None, progress.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.jobs.len(), 3);
        assert!(run.is_complete());
        assert_eq!(progress.finished.load(Ordering::SeqCst), 3);
        let states: Vec<(&str, RepoState)> =
            run.jobs.iter().map(|j| (j.repo_id.as_str(), j.state)).collect();
        assert_eq!(
            states,
            vec![("a", RepoState::Done), ("b", RepoState::Done), ("missing", RepoState::Failed)]
        );

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let out = temp_dir("batch-out");
        let ctx = Arc::new(PipelineContext::new(BatchConfig {
            output_dir: out.clone(),
            repo_concurrency: 0,
            ..Default::default()
        }));
        let err = run_batch(Vec::new(), ctx, None, Arc::new(SilentProgress), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("repo_concurrency"));

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn cancelled_before_start_submits_nothing() {
        let root = temp_dir("batch-src");
        let out = temp_dir("batch-out");
        let targets = vec![make_repo(&root, "a"), make_repo(&root, "b")];

        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = run_batch(targets, context(&out), None, Arc::new(SilentProgress), cancel)
            .await
            .unwrap();

        assert!(run.cancelled);
        assert!(run.jobs.is_empty());
        assert_eq!(run.not_started, vec!["a".to_string(), "b".to_string()]);

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&out);
    }

    fn sleepy_render(_: &RenderContext, _: Option<&str>) -> std::result::Result<String, ArtifactError> {
        std::thread::sleep(Duration::from_millis(1500));
        Ok("late\n".into())
    }

    #[tokio::test]
    async fn cancel_mid_run_aborts_in_flight_after_grace() {
        let root = temp_dir("batch-src");
        let out = temp_dir("batch-out");
        let targets = vec![make_repo(&root, "r0"), make_repo(&root, "r1"), make_repo(&root, "r2")];

        let mut ctx = PipelineContext::new(BatchConfig {
            output_dir: out.clone(),
            max_tier: Tier::Critical,
            repo_concurrency: 1,
            artifact_timeout: Duration::from_secs(10),
            grace_period: Duration::from_millis(100),
            ..Default::default()
        });
        ctx.catalog = Arc::new(
            Catalog::from_specs(vec![ArtifactSpec {
                id: "slow-context",
                file_name: "SLOW.md",
                tier: Tier::Critical,
                description: "sleeps past the grace period",
                render: sleepy_render,
                narrative: None,
            }])
            .unwrap(),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let run = run_batch(targets, Arc::new(ctx), None, Arc::new(SilentProgress), cancel)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(run.cancelled);
        assert_eq!(run.jobs.len(), 1);
        assert_eq!(run.jobs[0].repo_id, "r0");
        assert_eq!(run.jobs[0].state, RepoState::Failed);
        assert_eq!(run.jobs[0].error.as_deref(), Some("cancelled"));
        assert_eq!(run.not_started, vec!["r1".to_string(), "r2".to_string()]);
        // Cancel at 200 ms plus 100 ms of grace, well before the render finishes.
        assert!(elapsed < Duration::from_millis(1000), "batch took {elapsed:?}");
        assert!(!out.join("r0").join("SLOW.md").exists());

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn resume_skips_completed_repos() {
        let root = temp_dir("batch-src");
        let out = temp_dir("batch-out");
        let db = root.join("ledger.db");
        let ledger = Arc::new(Ledger::open(&db).await.unwrap());
        let targets = vec![make_repo(&root, "a"), make_repo(&root, "b")];

        let first = run_batch(
            targets.clone(),
            context(&out),
            Some(Arc::clone(&ledger)),
            Arc::new(SilentProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(first.count(RepoState::Done), 2);

        let mut config = BatchConfig {
            output_dir: out.clone(),
            max_tier: Tier::Critical,
            resume: true,
            ..Default::default()
        };
        let second = run_batch(
            targets.clone(),
            Arc::new(PipelineContext::new(config.clone())),
            Some(Arc::clone(&ledger)),
            Arc::new(SilentProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(second.jobs.is_empty());
        assert_eq!(second.resumed, vec!["a".to_string(), "b".to_string()]);

        config.force = true;
        let forced = run_batch(
            targets,
            Arc::new(PipelineContext::new(config)),
            Some(ledger),
            Arc::new(SilentProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(forced.jobs.len(), 2);
        assert!(forced.resumed.is_empty());

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn finish_run_writes_report() {
        let root = temp_dir("batch-src");
        let out = temp_dir("batch-out");
        let ctx = context(&out);
        let run = run_batch(
            vec![make_repo(&root, "a")],
            Arc::clone(&ctx),
            None,
            Arc::new(SilentProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let report = finish_run(&run, &ctx, None).await.unwrap();
        assert_eq!(report.counts.done, 1);
        assert!(!report.exceeds_threshold);
        assert!(out.join(crate::report::REPORT_FILE).is_file());
        assert!(out.join(crate::report::INDEX_FILE).is_file());
        assert!(run.ended_at.unwrap() >= run.started_at);
        assert!(report.wall_clock_ms < Duration::from_secs(60).as_millis() as u64);

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&out);
    }
}
