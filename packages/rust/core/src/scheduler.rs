//! Per-repository artifact scheduler.
//!
//! Every selected spec runs on a bounded pool of
//! `min(spec count, artifact_concurrency)` workers. A failing or timed-out
//! artifact is retried, then recorded; it never cancels its siblings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use repoctx_artifacts::{ArtifactSpec, RenderContext};
use repoctx_shared::{ArtifactError, ArtifactResult, ArtifactStatus, BatchConfig, RepoState, Tier};

use crate::textgen::TextGenerator;

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub concurrency: usize,
    pub artifact_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Repository deadline. Attempt timeouts never extend past it.
    pub deadline: Option<Instant>,
}

impl ScheduleOptions {
    pub fn from_config(config: &BatchConfig, deadline: Option<Instant>) -> Self {
        Self {
            concurrency: config.artifact_concurrency,
            artifact_timeout: config.artifact_timeout,
            retries: config.retries,
            retry_backoff: config.retry_backoff,
            deadline,
        }
    }

    /// Budget for the next attempt, `None` once the deadline has passed.
    fn attempt_budget(&self) -> Option<Duration> {
        match self.deadline {
            None => Some(self.artifact_timeout),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then(|| remaining.min(self.artifact_timeout))
            }
        }
    }
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default(), None)
    }
}

/// Render every spec and return one result per spec, in `specs` order.
#[instrument(skip_all, fields(repo = %ctx.meta.repo_id, artifacts = specs.len()))]
pub async fn run_artifacts(
    ctx: Arc<RenderContext>,
    specs: &[ArtifactSpec],
    opts: &ScheduleOptions,
    textgen: Option<Arc<dyn TextGenerator>>,
    cancel: &CancellationToken,
) -> Vec<ArtifactResult> {
    if specs.is_empty() {
        return Vec::new();
    }

    let workers = specs.len().min(opts.concurrency.max(1));
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut set = JoinSet::new();

    for (index, spec) in specs.iter().copied().enumerate() {
        let ctx = Arc::clone(&ctx);
        let sem = Arc::clone(&semaphore);
        let opts = opts.clone();
        let textgen = textgen.clone();
        let cancel = cancel.clone();

        set.spawn(async move {
            let result = match sem.acquire_owned().await {
                Ok(_permit) => run_one(ctx, spec, &opts, textgen, &cancel).await,
                Err(_) => failed(&spec, 0, Duration::ZERO, ArtifactError::Cancelled),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<ArtifactResult>> = vec![None; specs.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!(error = %e, "artifact worker aborted"),
        }
    }

    specs
        .iter()
        .zip(slots)
        .map(|(spec, slot)| {
            slot.unwrap_or_else(|| {
                failed(spec, 0, Duration::ZERO, ArtifactError::Generation("worker aborted".into()))
            })
        })
        .collect()
}

async fn run_one(
    ctx: Arc<RenderContext>,
    spec: ArtifactSpec,
    opts: &ScheduleOptions,
    textgen: Option<Arc<dyn TextGenerator>>,
    cancel: &CancellationToken,
) -> ArtifactResult {
    let started = Instant::now();
    let narrative = narrative_for(&ctx, &spec, opts, textgen.as_deref()).await;
    let max_attempts = opts.retries + 1;

    let mut last_error = ArtifactError::Generation("not attempted".into());
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return failed(&spec, attempt - 1, started.elapsed(), ArtifactError::Cancelled);
        }

        let outcome = match opts.attempt_budget() {
            Some(budget) => attempt_render(&ctx, &spec, narrative.clone(), budget, cancel).await,
            None => Err(ArtifactError::Timeout(0)),
        };

        match outcome {
            Ok(content) => {
                debug!(artifact = spec.id, attempt, "artifact rendered");
                return ArtifactResult {
                    spec_id: spec.id.to_string(),
                    file_name: spec.file_name.to_string(),
                    tier: spec.tier,
                    status: ArtifactStatus::Success,
                    content,
                    duration_ms: started.elapsed().as_millis() as u64,
                    attempts: attempt,
                    error: None,
                };
            }
            Err(ArtifactError::Cancelled) => {
                return failed(&spec, attempt, started.elapsed(), ArtifactError::Cancelled);
            }
            Err(e) => {
                warn!(artifact = spec.id, attempt, error = %e, "artifact attempt failed");
                last_error = e;
            }
        }

        if attempt < max_attempts && !opts.retry_backoff.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return failed(&spec, attempt, started.elapsed(), ArtifactError::Cancelled);
                }
                _ = tokio::time::sleep(opts.retry_backoff) => {}
            }
        }
    }

    failed(&spec, max_attempts, started.elapsed(), last_error)
}

async fn attempt_render(
    ctx: &Arc<RenderContext>,
    spec: &ArtifactSpec,
    narrative: Option<String>,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<String, ArtifactError> {
    let render = spec.render;
    let ctx = Arc::clone(ctx);
    let handle = tokio::task::spawn_blocking(move || render(&ctx, narrative.as_deref()));

    tokio::select! {
        _ = cancel.cancelled() => Err(ArtifactError::Cancelled),
        joined = tokio::time::timeout(budget, handle) => match joined {
            Err(_) => Err(ArtifactError::Timeout(budget.as_millis() as u64)),
            Ok(Err(join_err)) => Err(ArtifactError::Generation(format!("render panicked: {join_err}"))),
            Ok(Ok(rendered)) => rendered,
        },
    }
}

/// Ask the text generator for prose. Any failure degrades to `None` and the
/// template falls back to its deterministic summary.
async fn narrative_for(
    ctx: &RenderContext,
    spec: &ArtifactSpec,
    opts: &ScheduleOptions,
    textgen: Option<&dyn TextGenerator>,
) -> Option<String> {
    let (prompt_fn, generator) = (spec.narrative?, textgen?);
    let budget = opts.attempt_budget()?;
    let prompt = prompt_fn(ctx);

    match tokio::time::timeout(budget, generator.generate(&prompt)).await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            warn!(artifact = spec.id, error = %e, "narrative unavailable, using summary");
            None
        }
        Err(_) => {
            warn!(artifact = spec.id, "narrative timed out, using summary");
            None
        }
    }
}

fn failed(spec: &ArtifactSpec, attempts: u32, elapsed: Duration, error: ArtifactError) -> ArtifactResult {
    ArtifactResult {
        spec_id: spec.id.to_string(),
        file_name: spec.file_name.to_string(),
        tier: spec.tier,
        status: ArtifactStatus::Failed,
        content: String::new(),
        duration_ms: elapsed.as_millis() as u64,
        attempts,
        error: Some(error.to_string()),
    }
}

/// Job outcome from its artifact results. Skipped artifacts do not count.
pub fn derive_outcome(results: &[ArtifactResult]) -> RepoState {
    let is_failed = |r: &&ArtifactResult| r.status == ArtifactStatus::Failed;
    if results.iter().filter(is_failed).any(|r| r.tier == Tier::Critical) {
        RepoState::Failed
    } else if results.iter().any(|r| r.status == ArtifactStatus::Failed) {
        RepoState::Partial
    } else {
        RepoState::Done
    }
}
