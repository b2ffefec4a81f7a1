//! Per-repository pipeline: collect → assemble → schedule → write.
//!
//! [`process_repo`] never returns an error. Every failure ends up on the
//! returned [`RepoJob`] as a terminal state and cause.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use repoctx_artifacts::{Catalog, RenderContext, RepoMetadata};
use repoctx_collector::{CollectOptions, ExtractorRegistry, collect};
use repoctx_shared::{ArtifactResult, BatchConfig, BatchRun, RepoJob, RepoState, RepoTarget};

use crate::assembler::{AssembleOptions, assemble_graph};
use crate::scheduler::{ScheduleOptions, derive_outcome, run_artifacts};
use crate::textgen::TextGenerator;
use crate::writer::{RepoOutput, write_repo_output};

/// Everything a repository worker shares with its siblings. Immutable.
pub struct PipelineContext {
    pub config: Arc<BatchConfig>,
    pub catalog: Arc<Catalog>,
    pub registry: Arc<ExtractorRegistry>,
    pub textgen: Option<Arc<dyn TextGenerator>>,
}

impl PipelineContext {
    /// Built-in catalog and extractors, no text generation.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(Catalog::builtin()),
            registry: Arc::new(ExtractorRegistry::with_defaults()),
            textgen: None,
        }
    }

    pub fn with_textgen(mut self, textgen: Option<Arc<dyn TextGenerator>>) -> Self {
        self.textgen = textgen;
        self
    }

    /// Output directory for one repository.
    pub fn repo_dir(&self, target: &RepoTarget) -> PathBuf {
        self.config.output_dir.join(&target.id)
    }
}

/// Progress callback for batch status.
pub trait BatchProgress: Send + Sync {
    /// Called once the target list is final.
    fn batch_started(&self, total: usize);
    /// Called when a job changes state.
    fn repo_state(&self, repo_id: &str, state: RepoState);
    /// Called when a job reaches a terminal state.
    fn repo_finished(&self, job: &RepoJob);
    fn batch_finished(&self, run: &BatchRun);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn batch_started(&self, _total: usize) {}
    fn repo_state(&self, _repo_id: &str, _state: RepoState) {}
    fn repo_finished(&self, _job: &RepoJob) {}
    fn batch_finished(&self, _run: &BatchRun) {}
}

/// Run one repository through the whole pipeline.
///
/// `cancel` stops in-flight artifact work; a cancelled job ends `Failed`
/// with a cancellation cause and writes no output.
#[instrument(skip_all, fields(repo = %target.id))]
pub async fn process_repo(
    ctx: &PipelineContext,
    target: &RepoTarget,
    progress: &dyn BatchProgress,
    cancel: &CancellationToken,
) -> RepoJob {
    let config = &ctx.config;
    let mut job = RepoJob::new(target);
    let deadline = config.repo_timeout.map(|t| Instant::now() + t);

    if let Err(e) = advance(&mut job, RepoState::Analyzing, progress) {
        job.fail(e.to_string());
        return job;
    }

    // --- Collection ---
    let collect_opts = CollectOptions::from(config.as_ref());
    let collection = match within(
        deadline,
        collect(&target.id, &target.path, &ctx.registry, &collect_opts),
    )
    .await
    {
        Some(Ok(collection)) => collection,
        Some(Err(e)) => return failed(job, e.to_string(), progress),
        None => return failed(job, "repository timed out during collection".into(), progress),
    };
    job.extraction_errors = collection.errors.clone();

    // --- Assembly ---
    let assemble_opts = AssembleOptions {
        max_cycle_warnings: config.max_cycle_warnings,
    };
    let graph = match within(
        deadline,
        assemble_graph(&target.id, collection.files, collection.fragments, assemble_opts),
    )
    .await
    {
        Some(Ok(graph)) => Arc::new(graph),
        Some(Err(e)) => return failed(job, e.to_string(), progress),
        None => return failed(job, "repository timed out during graph assembly".into(), progress),
    };
    job.graph = Some(graph.summary());

    if let Err(e) = advance(&mut job, RepoState::Generating, progress) {
        return failed(job, e.to_string(), progress);
    }

    // --- Artifacts ---
    let (specs, skipped) = ctx.catalog.select(config.max_tier);
    let meta = RepoMetadata {
        repo_id: target.id.clone(),
        name: target
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.id.clone()),
        path: target.path.clone(),
        extraction_errors: job.extraction_errors.clone(),
        artifact_files: specs.iter().map(|s| s.file_name.to_string()).collect(),
    };
    // Graph analysis walks every entity; keep it off the runtime workers.
    let analysis_graph = Arc::clone(&graph);
    let key_modules = config.key_module_count;
    let render_ctx = match within(
        deadline,
        tokio::task::spawn_blocking(move || RenderContext::new(analysis_graph, meta, key_modules)),
    )
    .await
    {
        Some(Ok(render_ctx)) => Arc::new(render_ctx),
        Some(Err(e)) => return failed(job, format!("graph analysis failed: {e}"), progress),
        None => return failed(job, "repository timed out during graph analysis".into(), progress),
    };
    let schedule_opts = ScheduleOptions::from_config(config, deadline);
    let attempted = run_artifacts(render_ctx, &specs, &schedule_opts, ctx.textgen.clone(), cancel).await;

    if cancel.is_cancelled() {
        job.results = strip_content(attempted.into_iter().chain(skipped).collect(), &ctx.catalog);
        return failed(job, "cancelled".into(), progress);
    }

    let results = in_catalog_order(attempted.into_iter().chain(skipped).collect(), &ctx.catalog);
    let outcome = derive_outcome(&results);

    // --- Output ---
    let repo_dir = ctx.repo_dir(target);
    let repo_id = target.id.clone();
    let repo_path = target.path.clone();
    let extraction_errors = job.extraction_errors.len();
    let emit_graph = config.emit_graph;
    let written = tokio::task::spawn_blocking(move || {
        let output = RepoOutput {
            repo_id: &repo_id,
            repo_path: &repo_path,
            outcome,
            graph: &graph,
            results: &results,
            extraction_errors,
            emit_graph,
        };
        let manifest = write_repo_output(&repo_dir, &output);
        (results, manifest)
    })
    .await;

    match written {
        Ok((results, Ok(_manifest))) => {
            job.results = strip_content(results, &ctx.catalog);
        }
        Ok((results, Err(e))) => {
            job.results = strip_content(results, &ctx.catalog);
            return failed(job, format!("writing output failed: {e}"), progress);
        }
        Err(e) => return failed(job, format!("output task failed: {e}"), progress),
    }

    if let Err(e) = advance(&mut job, outcome, progress) {
        return failed(job, e.to_string(), progress);
    }
    info!(
        state = %job.state,
        duration_ms = job.duration_ms().unwrap_or(0),
        "repository finished"
    );
    job
}

fn advance(job: &mut RepoJob, next: RepoState, progress: &dyn BatchProgress) -> repoctx_shared::Result<()> {
    job.transition(next)?;
    progress.repo_state(&job.repo_id, next);
    Ok(())
}

fn failed(mut job: RepoJob, cause: String, progress: &dyn BatchProgress) -> RepoJob {
    warn!(repo = %job.repo_id, %cause, "repository failed");
    job.fail(cause);
    progress.repo_state(&job.repo_id, RepoState::Failed);
    job
}

/// Await `fut`, giving up once the repository deadline passes.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        None => Some(fut.await),
        Some(deadline) => tokio::time::timeout_at(deadline.into(), fut).await.ok(),
    }
}

fn in_catalog_order(mut results: Vec<ArtifactResult>, catalog: &Catalog) -> Vec<ArtifactResult> {
    let position = |id: &str| catalog.specs().iter().position(|s| s.id == id).unwrap_or(usize::MAX);
    results.sort_by_key(|r| position(&r.spec_id));
    results
}

/// Artifact text lives on disk once written; jobs keep only the metadata.
fn strip_content(results: Vec<ArtifactResult>, catalog: &Catalog) -> Vec<ArtifactResult> {
    in_catalog_order(results, catalog)
        .into_iter()
        .map(|r| ArtifactResult {
            content: String::new(),
            ..r
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use repoctx_shared::{ArtifactStatus, Tier};

    use super::*;
    use crate::writer::{MANIFEST_FILE, verify_output};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("repoctx-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn context(out: &Path, max_tier: Tier) -> PipelineContext {
        let config = BatchConfig {
            output_dir: out.to_path_buf(),
            max_tier,
            ..Default::default()
        };
        PipelineContext::new(config)
    }

    #[tokio::test]
    async fn python_repo_reaches_done() {
        let repo = temp_dir("pipe-repo");
        let out = temp_dir("pipe-out");
        write(&repo, "app/main.py", "from app import db\n\ndef main():\n    db.connect()\n");
        write(&repo, "app/db.py", "def connect():\n    # TODO: pooling\n    pass\n");

        let ctx = context(&out, Tier::High);
        let target = RepoTarget {
            id: "demo".into(),
            path: repo.clone(),
        };
        let job = process_repo(&ctx, &target, &SilentProgress, &CancellationToken::new()).await;

        assert_eq!(job.state, RepoState::Done, "error: {:?}", job.error);
        assert!(job.graph.unwrap().entities > 0);
        assert_eq!(job.results.len(), ctx.catalog.len());
        assert!(job.results.iter().all(|r| r.content.is_empty()));

        let skipped: Vec<&str> = job
            .results
            .iter()
            .filter(|r| r.status == ArtifactStatus::Skipped)
            .map(|r| r.spec_id.as_str())
            .collect();
        assert_eq!(skipped, vec!["dependencies", "troubleshooting"]);

        let repo_dir = out.join("demo");
        assert!(repo_dir.join("CLAUDE.md").is_file());
        assert!(!repo_dir.join("DEPENDENCIES.md").exists());
        let manifest = verify_output(&repo_dir).unwrap();
        assert_eq!(manifest.artifacts.len(), 8);

        let _ = std::fs::remove_dir_all(&repo);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn skipped_tiers_are_not_linked() {
        let repo = temp_dir("pipe-repo");
        let out = temp_dir("pipe-out");
        write(&repo, "svc/api.py", "def handler():\n    pass\n");

        let ctx = context(&out, Tier::Critical);
        let target = RepoTarget {
            id: "svc".into(),
            path: repo.clone(),
        };
        let job = process_repo(&ctx, &target, &SilentProgress, &CancellationToken::new()).await;
        assert_eq!(job.state, RepoState::Done, "error: {:?}", job.error);

        let primary = std::fs::read_to_string(out.join("svc").join("CLAUDE.md")).unwrap();
        assert!(primary.contains("`.clinerules`"));
        assert!(!primary.contains("ARCHITECTURE.md"));
        assert!(!out.join("svc").join("ARCHITECTURE.md").exists());

        let _ = std::fs::remove_dir_all(&repo);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn missing_root_fails_in_analysis() {
        let out = temp_dir("pipe-out");
        let ctx = context(&out, Tier::Enhancement);
        let target = RepoTarget {
            id: "ghost".into(),
            path: out.join("does-not-exist"),
        };
        let job = process_repo(&ctx, &target, &SilentProgress, &CancellationToken::new()).await;

        assert_eq!(job.state, RepoState::Failed);
        assert!(job.error.as_deref().unwrap().contains("cannot read root"));
        assert!(job.results.is_empty());
        assert!(!out.join("ghost").join(MANIFEST_FILE).exists());

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn cancelled_job_writes_nothing() {
        let repo = temp_dir("pipe-repo");
        let out = temp_dir("pipe-out");
        write(&repo, "README.md", "# Demo\n");

        let ctx = context(&out, Tier::Critical);
        let target = RepoTarget {
            id: "demo".into(),
            path: repo.clone(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = process_repo(&ctx, &target, &SilentProgress, &cancel).await;

        assert_eq!(job.state, RepoState::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));
        assert!(!out.join("demo").exists());

        let _ = std::fs::remove_dir_all(&repo);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[test]
    fn results_sorted_by_catalog() {
        let catalog = Catalog::builtin();
        let results = vec![
            ArtifactResult::skipped("troubleshooting", "TROUBLESHOOTING.md", Tier::Enhancement),
            ArtifactResult::skipped("primary-context", "CLAUDE.md", Tier::Critical),
            ArtifactResult::skipped("architecture", "ARCHITECTURE.md", Tier::High),
        ];
        let ids: Vec<String> = in_catalog_order(results, &catalog)
            .into_iter()
            .map(|r| r.spec_id)
            .collect();
        assert_eq!(ids, vec!["primary-context", "architecture", "troubleshooting"]);
    }
}
