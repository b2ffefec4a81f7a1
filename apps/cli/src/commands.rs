//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use repoctx_artifacts::Catalog;
use repoctx_core::{BatchProgress, PipelineContext, RunReport, finish_run, run_batch, textgen};
use repoctx_discovery::{DiscoveryOptions, RepoFilter, RepoSource, discover};
use repoctx_shared::{
    AppConfig, BatchConfig, BatchRun, RepoJob, RepoState, Tier, init_config, load_config,
    load_config_from,
};
use repoctx_storage::Ledger;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// repoctx: turn source repositories into AI-ready context.
#[derive(Parser)]
#[command(
    name = "repoctx",
    version,
    about = "Generate AI-assistant context artifacts for many repositories at once.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.repoctx/repoctx.toml).
    #[arg(long, global = true, env = "REPOCTX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every repository below ROOT, or an explicit list.
    Run {
        /// Directory containing git repositories.
        #[arg(conflicts_with_all = ["list", "repo"], required_unless_present_any = ["list", "repo"])]
        root: Option<PathBuf>,

        /// File with one repository path per line.
        #[arg(long, conflicts_with = "repo")]
        list: Option<PathBuf>,

        /// Repository path (repeatable).
        #[arg(long)]
        repo: Vec<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Process a single repository.
    Repo {
        path: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List the artifact catalog.
    Catalog {
        /// Mark artifacts above this tier as skipped.
        #[arg(long)]
        max_tier: Option<Tier>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Flags overriding config file values for one run.
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct Overrides {
    /// Output directory.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Repositories processed at once.
    #[arg(long)]
    pub repo_concurrency: Option<usize>,

    /// Artifacts rendered at once per repository.
    #[arg(long)]
    pub artifact_concurrency: Option<usize>,

    /// Lowest-priority tier to generate: critical, high or enhancement.
    #[arg(long)]
    pub max_tier: Option<Tier>,

    /// Per-artifact timeout in seconds.
    #[arg(long)]
    pub artifact_timeout: Option<u64>,

    /// Retries after a failed artifact attempt.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Whole-repository timeout in seconds (0 disables).
    #[arg(long)]
    pub repo_timeout: Option<u64>,

    /// Seconds in-flight jobs may run after Ctrl-C.
    #[arg(long)]
    pub grace_period: Option<u64>,

    /// Repository include pattern (repeatable).
    #[arg(long)]
    pub include: Vec<String>,

    /// Repository exclude pattern (repeatable).
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Failure rate above which the run exits non-zero.
    #[arg(long)]
    pub failure_threshold: Option<f64>,

    /// Run ledger database, used for resume.
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Skip repositories the ledger records as done.
    #[arg(long, requires = "ledger")]
    pub resume: bool,

    /// Re-run repositories even when resuming.
    #[arg(long)]
    pub force: bool,

    /// Also write each repository's graph as graph.json.
    #[arg(long)]
    pub emit_graph: bool,

    /// Enable the text-generation collaborator for narrative sections.
    #[arg(long)]
    pub textgen: bool,
}

impl Overrides {
    /// Merge over config file values.
    fn apply(&self, mut config: BatchConfig) -> BatchConfig {
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        if let Some(n) = self.repo_concurrency {
            config.repo_concurrency = n;
        }
        if let Some(n) = self.artifact_concurrency {
            config.artifact_concurrency = n;
        }
        if let Some(tier) = self.max_tier {
            config.max_tier = tier;
        }
        if let Some(secs) = self.artifact_timeout {
            config.artifact_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.retries {
            config.retries = n;
        }
        if let Some(secs) = self.repo_timeout {
            config.repo_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = self.grace_period {
            config.grace_period = Duration::from_secs(secs);
        }
        if !self.include.is_empty() {
            config.include_patterns = self.include.clone();
        }
        if !self.exclude.is_empty() {
            config.exclude_patterns = self.exclude.clone();
        }
        if let Some(rate) = self.failure_threshold {
            config.failure_threshold = rate;
        }
        config.resume |= self.resume;
        config.force |= self.force;
        config.emit_graph |= self.emit_graph;
        config.textgen.enabled |= self.textgen;
        config
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "repoctx=info",
        1 => "repoctx=debug",
        _ => "repoctx=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            root,
            list,
            repo,
            overrides,
        } => {
            let source = match (root, list) {
                (Some(root), _) => RepoSource::Root(root),
                (None, Some(list)) => RepoSource::ListFile(list),
                (None, None) => RepoSource::Paths(repo),
            };
            cmd_run(source, &overrides, config_path).await
        }
        Command::Repo { path, overrides } => {
            cmd_run(RepoSource::Paths(vec![path]), &overrides, config_path).await
        }
        Command::Catalog { max_tier } => cmd_catalog(max_tier),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run / repo
// ---------------------------------------------------------------------------

async fn cmd_run(source: RepoSource, overrides: &Overrides, config_path: Option<&Path>) -> Result<()> {
    let app = load_app_config(config_path)?;
    let config = overrides.apply(BatchConfig::from(&app));
    config.validate()?;

    let filter = RepoFilter::new(&config.include_patterns, &config.exclude_patterns)?;
    let discovered = discover(&source, &filter, &DiscoveryOptions::default()).await?;
    if discovered.targets.is_empty() {
        return Err(eyre!("no repositories to process"));
    }

    let ledger = match &overrides.ledger {
        Some(path) => Some(Arc::new(Ledger::open(path).await?)),
        None => None,
    };
    let generator = textgen::from_settings(&config.textgen)?;
    if let Some(generator) = &generator {
        info!(model = generator.model(), "text generation enabled");
    }

    let ctx = Arc::new(PipelineContext::new(config).with_textgen(generator));
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    info!(
        repos = discovered.targets.len(),
        filtered_out = discovered.filtered_out,
        out = %ctx.config.output_dir.display(),
        "starting run"
    );

    let progress = Arc::new(CliProgress::new());
    let run = run_batch(
        discovered.targets,
        Arc::clone(&ctx),
        ledger.clone(),
        progress,
        cancel,
    )
    .await?;
    let report = finish_run(&run, &ctx, ledger.as_deref()).await?;

    print_summary(&run, &report, &ctx.config.output_dir);

    if report.exceeds_threshold {
        return Err(eyre!(
            "failure rate {:.1}% exceeds threshold {:.1}%",
            report.failure_rate * 100.0,
            report.failure_threshold * 100.0
        ));
    }
    Ok(())
}

/// First Ctrl-C cancels the batch; in-flight jobs get the grace period.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            cancel.cancel();
        }
    });
}

fn print_summary(run: &BatchRun, report: &RunReport, out: &Path) {
    println!();
    println!("  Run:       {}", report.run_id);
    println!(
        "  Repos:     {} done, {} partial, {} failed",
        report.counts.done, report.counts.partial, report.counts.failed
    );
    if !run.resumed.is_empty() {
        println!("  Resumed:   {}", run.resumed.len());
    }
    if run.cancelled {
        println!("  Cancelled: {} not started", run.not_started.len());
    }
    if let Some(d) = &report.durations {
        println!(
            "  Per repo:  p50 {} ms, p95 {} ms, max {} ms",
            d.p50_ms, d.p95_ms, d.max_ms
        );
    }
    println!("  Time:      {:.1}s", report.wall_clock_ms as f64 / 1000.0);
    println!("  Index:     {}", out.join(repoctx_core::report::INDEX_FILE).display());
    for failure in &report.failures {
        let cause = failure
            .error
            .clone()
            .or_else(|| failure.failed_artifacts.first().cloned())
            .unwrap_or_default();
        println!("  ! {} ({}): {cause}", failure.repo_id, failure.state);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress bar. Position counts terminal jobs.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl BatchProgress for CliProgress {
    fn batch_started(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn repo_state(&self, repo_id: &str, state: RepoState) {
        self.bar.set_message(format!("{repo_id}: {state}"));
    }

    fn repo_finished(&self, job: &RepoJob) {
        self.bar.inc(1);
        if job.state != RepoState::Done {
            self.bar.println(format!("  {} → {}", job.repo_id, job.state));
        }
    }

    fn batch_finished(&self, _run: &BatchRun) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// catalog / config
// ---------------------------------------------------------------------------

fn cmd_catalog(max_tier: Option<Tier>) -> Result<()> {
    let catalog = Catalog::builtin();
    println!("{:<20} {:<30} {:<12} DESCRIPTION", "ID", "FILE", "TIER");
    for spec in catalog.specs() {
        let skipped = max_tier.is_some_and(|max| spec.tier > max);
        println!(
            "{:<20} {:<30} {:<12} {}{}",
            spec.id,
            spec.file_name,
            spec.tier.as_str(),
            spec.description,
            if skipped { " (skipped)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load_app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
