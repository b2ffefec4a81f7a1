//! Source collection: walk one repository and run the kind-specific
//! extractor over every recognized file.
//!
//! This crate provides:
//! - [`extractors`]: the [`Extractor`] trait and built-in extractors
//! - [`ExtractorRegistry`]: the file kind → extractor capability map
//! - [`collect`]: deterministic traversal plus per-file extraction

pub mod extractors;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use repoctx_shared::{
    BatchConfig, ExtractionError, FileKind, Fragment, RepoCtxError, Result, SourceFile,
};
use tracing::{debug, info, instrument, warn};

pub use extractors::{Extractor, ExtractorRegistry};

/// Directories skipped even when not gitignored.
const SKIP_DIRS: &[&str] = &["node_modules", "__pycache__", ".ipynb_checkpoints"];

// ---------------------------------------------------------------------------
// Options & results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Files larger than this are skipped without being read.
    pub max_file_bytes: u64,
    /// Honour `.gitignore` / `.ignore` files inside the repository.
    pub respect_gitignore: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for CollectOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            respect_gitignore: true,
        }
    }
}

/// Everything collected from one repository.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Recognized files with a registered extractor, in path order.
    pub files: Vec<SourceFile>,
    /// One fragment per successfully extracted file, in path order.
    pub fragments: Vec<Fragment>,
    pub errors: Vec<ExtractionError>,
    /// Recognized files skipped for size.
    pub oversized: usize,
    /// Recognized files whose kind has no registered extractor.
    pub unsupported: usize,
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Walk `root` and extract every recognized file.
///
/// Per-file failures (unreadable file, extractor error or panic) are
/// recorded in [`Collection::errors`] and never stop collection. Only an
/// unreadable root is an error, reported as [`RepoCtxError::RepoFatal`].
#[instrument(skip_all, fields(repo = %repo_id))]
pub async fn collect(
    repo_id: &str,
    root: &Path,
    registry: &ExtractorRegistry,
    opts: &CollectOptions,
) -> Result<Collection> {
    let meta = tokio::fs::metadata(root)
        .await
        .map_err(|e| RepoCtxError::repo_fatal(repo_id, format!("cannot read root {}: {e}", root.display())))?;
    if !meta.is_dir() {
        return Err(RepoCtxError::repo_fatal(
            repo_id,
            format!("{} is not a directory", root.display()),
        ));
    }
    // Surface permission errors on the root itself rather than an empty walk.
    let _ = tokio::fs::read_dir(root)
        .await
        .map_err(|e| RepoCtxError::repo_fatal(repo_id, format!("cannot list {}: {e}", root.display())))?;

    let walk_root = root.to_path_buf();
    let walk_opts = opts.clone();
    let candidates = tokio::task::spawn_blocking(move || list_source_files(&walk_root, &walk_opts))
        .await
        .map_err(|e| RepoCtxError::repo_fatal(repo_id, format!("file walk failed: {e}")))?;

    let mut collection = Collection::default();
    for candidate in candidates {
        if candidate.size > opts.max_file_bytes {
            debug!(path = %candidate.file.path, size = candidate.size, "skipping oversized file");
            collection.oversized += 1;
            continue;
        }
        let Some(extractor) = registry.shared(candidate.file.kind) else {
            collection.unsupported += 1;
            continue;
        };

        // Parsing is CPU-bound; keep it off the runtime workers.
        let outcome = match tokio::fs::read(&candidate.abs_path).await {
            Ok(bytes) => {
                let worker = Arc::clone(&extractor);
                let file = candidate.file.clone();
                tokio::task::spawn_blocking(move || run_extractor(worker.as_ref(), &file, &bytes))
                    .await
                    .unwrap_or_else(|e| Err(format!("extraction task failed: {e}")))
            }
            Err(e) => Err(format!("read failed: {e}")),
        };
        match outcome {
            Ok(fragment) => collection.fragments.push(fragment),
            Err(cause) => {
                warn!(path = %candidate.file.path, extractor = extractor.name(), %cause, "extraction failed");
                collection.errors.push(ExtractionError {
                    path: candidate.file.path.clone(),
                    cause,
                });
            }
        }
        collection.files.push(candidate.file);
    }

    info!(
        files = collection.files.len(),
        fragments = collection.fragments.len(),
        errors = collection.errors.len(),
        oversized = collection.oversized,
        "collection complete"
    );
    Ok(collection)
}

/// Run one extractor, converting a panic into an extraction error.
fn run_extractor(
    extractor: &dyn Extractor,
    file: &SourceFile,
    bytes: &[u8],
) -> std::result::Result<Fragment, String> {
    std::panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(file, bytes)))
        .unwrap_or_else(|_| Err(format!("extractor '{}' panicked", extractor.name())))
}

struct Candidate {
    file: SourceFile,
    abs_path: PathBuf,
    size: u64,
}

/// Recognized files below `root`, sorted by repository-relative path.
fn list_source_files(root: &Path, opts: &CollectOptions) -> Vec<Candidate> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(opts.respect_gitignore)
        .git_exclude(opts.respect_gitignore)
        .ignore(opts.respect_gitignore)
        .git_global(false)
        .parents(false)
        .require_git(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            let name = entry.file_name().to_string_lossy();
            !(is_dir && SKIP_DIRS.iter().any(|skip| name == *skip))
        });

    let mut candidates = Vec::new();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Some(kind) = FileKind::from_path(entry.path()) else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        candidates.push(Candidate {
            file: SourceFile { path, kind },
            abs_path: entry.into_path(),
            size,
        });
    }

    candidates.sort_by(|a, b| a.file.path.cmp(&b.file.path));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use repoctx_shared::kinds;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("repoctx-collect-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn collects_in_path_order_and_isolates_failures() {
        let root = temp_dir();
        write(&root, "src/z.py", b"def z():\n    pass\n");
        write(&root, "src/a.py", b"import os\n");
        write(&root, "notebooks/broken.ipynb", b"{ not json");
        write(&root, "README.md", b"# Demo\n");
        write(&root, "Cargo.lock", b"ignored kind");
        write(&root, ".hidden/secret.py", b"x = 1\n");
        write(&root, "node_modules/pkg/index.js", b"module.exports = 1;\n");

        let registry = ExtractorRegistry::with_defaults();
        let collection = collect("demo", &root, &registry, &CollectOptions::default())
            .await
            .unwrap();

        let paths: Vec<_> = collection.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["README.md", "notebooks/broken.ipynb", "src/a.py", "src/z.py"]
        );
        assert_eq!(collection.fragments.len(), 3);
        assert_eq!(collection.errors.len(), 1);
        assert_eq!(collection.errors[0].path, "notebooks/broken.ipynb");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn gitignore_and_size_limits() {
        let root = temp_dir();
        write(&root, ".gitignore", b"build/\n");
        write(&root, "build/gen.py", b"x = 1\n");
        write(&root, "big.sql", &vec![b'-'; 2048]);
        write(&root, "app.py", b"x = 1\n");

        let opts = CollectOptions {
            max_file_bytes: 1024,
            respect_gitignore: true,
        };
        let collection = collect("demo", &root, &ExtractorRegistry::with_defaults(), &opts)
            .await
            .unwrap();
        let paths: Vec<_> = collection.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app.py"]);
        assert_eq!(collection.oversized, 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn empty_registry_marks_files_unsupported() {
        let root = temp_dir();
        write(&root, "main.py", b"print('hi')\n");

        let collection = collect("demo", &root, &ExtractorRegistry::empty(), &CollectOptions::default())
            .await
            .unwrap();
        assert!(collection.files.is_empty());
        assert_eq!(collection.unsupported, 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn panicking_extractor_is_contained() {
        struct Exploding;
        impl Extractor for Exploding {
            fn kinds(&self) -> &'static [FileKind] {
                &[FileKind::Markdown]
            }
            fn extract(&self, _file: &SourceFile, _bytes: &[u8]) -> std::result::Result<Fragment, String> {
                panic!("parser bug");
            }
            fn name(&self) -> &str {
                "exploding"
            }
        }

        let root = temp_dir();
        write(&root, "README.md", b"# x\n");
        write(&root, "lib.py", b"def f():\n    pass\n");

        let mut registry = ExtractorRegistry::with_defaults();
        registry.register(std::sync::Arc::new(Exploding));
        let collection = collect("demo", &root, &registry, &CollectOptions::default())
            .await
            .unwrap();

        assert_eq!(collection.errors.len(), 1);
        assert!(collection.errors[0].cause.contains("panicked"));
        assert!(collection.fragments[0]
            .entities
            .iter()
            .any(|e| e.key.kind == kinds::FUNCTION));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn slow_extractor_leaves_runtime_responsive() {
        struct Slow;
        impl Extractor for Slow {
            fn kinds(&self) -> &'static [FileKind] {
                &[FileKind::Python]
            }
            fn extract(&self, _file: &SourceFile, _bytes: &[u8]) -> std::result::Result<Fragment, String> {
                std::thread::sleep(std::time::Duration::from_millis(200));
                Err("too slow".into())
            }
            fn name(&self) -> &str {
                "slow"
            }
        }

        let root = temp_dir();
        write(&root, "main.py", b"def main():\n    pass\n");
        let mut registry = ExtractorRegistry::empty();
        registry.register(Arc::new(Slow));

        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let collection = collect("demo", &root, &registry, &CollectOptions::default())
            .await
            .unwrap();
        ticker.abort();

        assert_eq!(collection.errors.len(), 1);
        // The single-threaded runtime kept ticking while the extractor slept.
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 5);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_root_is_repo_fatal() {
        let root = std::env::temp_dir().join("repoctx-missing-root-3b9e");
        let err = collect("ghost", &root, &ExtractorRegistry::with_defaults(), &CollectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoCtxError::RepoFatal { .. }));
    }
}
