//! Repository discovery.
//!
//! A batch is fed either a root directory (every git repository below it
//! is a target), an explicit list of repository paths, or a list file with
//! one path per line. Targets get a stable id used for output directories
//! and resume bookkeeping, then pass through the include/exclude
//! [`RepoFilter`] before anything is scheduled.

mod filter;
mod parser;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use repoctx_shared::{RepoCtxError, RepoTarget, Result};
use tracing::{debug, info, instrument};

pub use filter::RepoFilter;

/// Directories never descended into while looking for repositories.
const SKIP_DIRS: &[&str] = &["node_modules", "target", "__pycache__", ".venv", "venv"];

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Where the batch's repositories come from.
#[derive(Debug, Clone)]
pub enum RepoSource {
    /// Every git repository below this directory.
    Root(PathBuf),
    /// Explicit repository paths.
    Paths(Vec<PathBuf>),
    /// A file listing one repository path per line.
    ListFile(PathBuf),
}

/// Configuration for the discovery walk.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Maximum directory depth below the root.
    pub max_depth: Option<usize>,
    /// Follow symlinked directories.
    pub follow_links: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_depth: Some(8),
            follow_links: false,
        }
    }
}

/// Filtered discovery outcome.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// Targets in deterministic (id) order.
    pub targets: Vec<RepoTarget>,
    /// Targets rejected by the filter.
    pub filtered_out: usize,
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Resolve a source into filtered repository targets.
///
/// An unreadable root or list file is a configuration error. Entries of an
/// explicit list are not checked here: a missing repository becomes a
/// failed job, not a startup error.
#[instrument(skip_all)]
pub async fn discover(
    source: &RepoSource,
    filter: &RepoFilter,
    opts: &DiscoveryOptions,
) -> Result<Discovered> {
    let targets = match source {
        RepoSource::Root(root) => {
            let walk_root = root.clone();
            let opts = opts.clone();
            let repos = tokio::task::spawn_blocking(move || find_git_repos(&walk_root, &opts))
                .await
                .map_err(|e| RepoCtxError::config(format!("discovery task failed: {e}")))??;
            targets_under_root(root, repos)
        }
        RepoSource::Paths(paths) => targets_from_paths(paths),
        RepoSource::ListFile(list) => {
            let content = tokio::fs::read_to_string(list).await.map_err(|e| {
                RepoCtxError::config(format!(
                    "cannot read repository list {}: {e}",
                    list.display()
                ))
            })?;
            let base = list.parent().unwrap_or(Path::new("."));
            targets_from_paths(&parser::parse_repo_list(&content, base))
        }
    };

    let total = targets.len();
    let targets: Vec<RepoTarget> = targets.into_iter().filter(|t| filter.accepts(t)).collect();
    let filtered_out = total - targets.len();

    info!(
        found = total,
        selected = targets.len(),
        filtered_out,
        "repositories discovered"
    );
    Ok(Discovered {
        targets,
        filtered_out,
    })
}

/// Walk `root` and return every directory containing a `.git` entry,
/// sorted. The root itself counts if it is a repository.
pub fn find_git_repos(root: &Path, opts: &DiscoveryOptions) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(root)
        .map_err(|e| RepoCtxError::config(format!("cannot read root {}: {e}", root.display())))?;
    if !meta.is_dir() {
        return Err(RepoCtxError::config(format!(
            "root {} is not a directory",
            root.display()
        )));
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .hidden(true)
        .follow_links(opts.follow_links)
        .max_depth(opts.max_depth)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            let name = entry.file_name().to_string_lossy();
            !(is_dir && SKIP_DIRS.iter().any(|skip| name == *skip))
        });

    let mut repos = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            continue;
        }
        // `.git` is a directory in clones and a file in worktrees/submodules
        if entry.path().join(".git").exists() {
            repos.push(entry.into_path());
        }
    }

    repos.sort();
    Ok(repos)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn targets_under_root(root: &Path, repos: Vec<PathBuf>) -> Vec<RepoTarget> {
    let mut ids = IdAllocator::default();
    repos
        .into_iter()
        .map(|path| {
            let relative = path
                .strip_prefix(root)
                .ok()
                .map(path_to_id)
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| dir_name(&path));
            RepoTarget {
                id: ids.allocate(relative),
                path,
            }
        })
        .collect()
}

fn targets_from_paths(paths: &[PathBuf]) -> Vec<RepoTarget> {
    let mut ids = IdAllocator::default();
    paths
        .iter()
        .map(|path| RepoTarget {
            id: ids.allocate(dir_name(path)),
            path: path.clone(),
        })
        .collect()
}

fn path_to_id(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".into())
}

/// Hands out unique ids, suffixing `-2`, `-3`, ... on collision.
#[derive(Default)]
struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    fn allocate(&mut self, base: String) -> String {
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
