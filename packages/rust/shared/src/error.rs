//! Error types for repoctx.
//!
//! Library crates use [`RepoCtxError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-file and per-artifact failures are *values*, not propagated errors:
//! see [`crate::types::ExtractionError`] and [`ArtifactError`].

use std::path::PathBuf;

/// Top-level error type for all repoctx operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoCtxError {
    /// Batch configuration loading or validation error. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed input, invalid pattern, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Run ledger error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Text-generation collaborator error (transport, status, or response shape).
    #[error("text generation error: {0}")]
    TextGen(String),

    /// An error that prevents a single repository's graph from being built.
    /// Terminates only that repository's job.
    #[error("repository {repo} failed: {message}")]
    RepoFatal { repo: String, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RepoCtxError>;

impl RepoCtxError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a repository-fatal error.
    pub fn repo_fatal(repo: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RepoFatal {
            repo: repo.into(),
            message: msg.into(),
        }
    }
}

/// Failure of one artifact attempt.
///
/// Generation errors and timeouts are handled identically by the scheduler:
/// retried, then recorded on the artifact result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RepoCtxError::config("repo_concurrency must be at least 1");
        assert_eq!(
            err.to_string(),
            "config error: repo_concurrency must be at least 1"
        );

        let err = RepoCtxError::repo_fatal("acme/api", "root is not a directory");
        assert!(err.to_string().contains("acme/api"));
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn artifact_error_display() {
        assert_eq!(
            ArtifactError::Timeout(1500).to_string(),
            "timed out after 1500 ms"
        );
        assert!(
            ArtifactError::Generation("boom".into())
                .to_string()
                .ends_with("boom")
        );
    }
}
