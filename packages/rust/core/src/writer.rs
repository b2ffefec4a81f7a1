//! Per-repository output: artifact files, `manifest.json`, optional `graph.json`.
//!
//! ```text
//! <output_dir>/<repo_id>/
//! ├── manifest.json
//! ├── graph.json            (with --emit-graph)
//! ├── CLAUDE.md
//! ├── .clinerules
//! └── .claude/context/...
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use repoctx_shared::{
    ArtifactResult, ArtifactStatus, GraphSummary, RepoCtxError, RepoState, RepositoryGraph, Result,
    Tier,
};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Checksum entry for one written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub spec_id: String,
    pub file_name: String,
    pub tier: Tier,
    pub sha256: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputManifest {
    pub schema_version: u32,
    pub repo_id: String,
    pub repo_path: PathBuf,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub outcome: RepoState,
    pub graph: GraphSummary,
    pub artifacts: Vec<ArtifactMeta>,
    /// Spec ids attempted without success.
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub extraction_errors: usize,
}

/// What the writer needs to know about one finished repository.
#[derive(Debug)]
pub struct RepoOutput<'a> {
    pub repo_id: &'a str,
    pub repo_path: &'a Path,
    pub outcome: RepoState,
    pub graph: &'a RepositoryGraph,
    pub results: &'a [ArtifactResult],
    pub extraction_errors: usize,
    /// Also persist the full graph.
    pub emit_graph: bool,
}

/// Write every successful artifact atomically, then the manifest.
///
/// Files left over from an earlier run for artifacts that did not succeed
/// this time are removed, so the directory reflects only this run.
#[instrument(skip_all, fields(repo = %output.repo_id, dir = %repo_dir.display()))]
pub fn write_repo_output(repo_dir: &Path, output: &RepoOutput<'_>) -> Result<OutputManifest> {
    std::fs::create_dir_all(repo_dir).map_err(|e| RepoCtxError::io(repo_dir, e))?;

    let mut artifacts = Vec::new();
    let mut failed = Vec::new();

    for result in output.results {
        let target = repo_dir.join(&result.file_name);
        match result.status {
            ArtifactStatus::Success => {
                write_atomic(&target, result.content.as_bytes())?;
                debug!(file = %result.file_name, size = result.content.len(), "wrote artifact");
                artifacts.push(ArtifactMeta {
                    spec_id: result.spec_id.clone(),
                    file_name: result.file_name.clone(),
                    tier: result.tier,
                    sha256: sha256_hex(result.content.as_bytes()),
                    size_bytes: result.content.len(),
                });
            }
            ArtifactStatus::Failed | ArtifactStatus::Skipped => {
                if result.status == ArtifactStatus::Failed {
                    failed.push(result.spec_id.clone());
                }
                if target.is_file() {
                    std::fs::remove_file(&target).map_err(|e| RepoCtxError::io(&target, e))?;
                    debug!(file = %result.file_name, "removed stale artifact");
                }
            }
        }
    }

    if output.emit_graph {
        write_json(&repo_dir.join(GRAPH_FILE), output.graph)?;
    }

    let manifest = OutputManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        repo_id: output.repo_id.to_string(),
        repo_path: output.repo_path.to_path_buf(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now(),
        outcome: output.outcome,
        graph: output.graph.summary(),
        artifacts,
        failed,
        extraction_errors: output.extraction_errors,
    };
    write_json(&repo_dir.join(MANIFEST_FILE), &manifest)?;

    info!(written = manifest.artifacts.len(), failed = manifest.failed.len(), "repository output written");
    Ok(manifest)
}

/// Check that every artifact listed in the manifest exists with a matching checksum.
pub fn verify_output(repo_dir: &Path) -> Result<OutputManifest> {
    let manifest_path = repo_dir.join(MANIFEST_FILE);
    let content =
        std::fs::read_to_string(&manifest_path).map_err(|e| RepoCtxError::io(&manifest_path, e))?;
    let manifest: OutputManifest = serde_json::from_str(&content)
        .map_err(|e| RepoCtxError::validation(format!("invalid {MANIFEST_FILE}: {e}")))?;

    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(RepoCtxError::validation(format!(
            "unsupported manifest schema version {} (expected {MANIFEST_SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }

    for meta in &manifest.artifacts {
        let path = repo_dir.join(&meta.file_name);
        let bytes = std::fs::read(&path).map_err(|e| RepoCtxError::io(&path, e))?;
        if sha256_hex(&bytes) != meta.sha256 {
            return Err(RepoCtxError::validation(format!(
                "checksum mismatch for {}",
                meta.file_name
            )));
        }
    }
    Ok(manifest)
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| RepoCtxError::io(parent, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RepoCtxError::validation(format!("invalid output path {}", target.display())))?;
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| RepoCtxError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| RepoCtxError::io(target, e))?;
    Ok(())
}

/// Pretty-printed JSON, written atomically.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| RepoCtxError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("repoctx-writer-{}", uuid::Uuid::now_v7()))
    }

    fn result(id: &str, file: &str, status: ArtifactStatus, content: &str) -> ArtifactResult {
        ArtifactResult {
            status,
            content: content.to_string(),
            attempts: 1,
            ..ArtifactResult::skipped(id, file, Tier::Critical)
        }
    }

    #[test]
    fn writes_artifacts_and_manifest() {
        let dir = temp_dir();
        let graph = RepositoryGraph::empty("demo");
        let results = vec![
            result("primary-context", "CLAUDE.md", ArtifactStatus::Success, "# demo\n"),
            result("known-issues", ".claude/context/gotchas.md", ArtifactStatus::Success, "none\n"),
            result("rules", ".clinerules", ArtifactStatus::Failed, ""),
        ];
        let output = RepoOutput {
            repo_id: "demo",
            repo_path: Path::new("/src/demo"),
            outcome: RepoState::Failed,
            graph: &graph,
            results: &results,
            extraction_errors: 2,
            emit_graph: true,
        };

        let manifest = write_repo_output(&dir, &output).unwrap();
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.failed, vec!["rules".to_string()]);
        assert_eq!(std::fs::read_to_string(dir.join("CLAUDE.md")).unwrap(), "# demo\n");
        assert!(dir.join(".claude/context/gotchas.md").is_file());
        assert!(!dir.join(".clinerules").exists());
        assert!(dir.join(GRAPH_FILE).is_file());
        assert!(!dir.join(".CLAUDE.md.tmp").exists());

        let verified = verify_output(&dir).unwrap();
        assert_eq!(verified.repo_id, "demo");
        assert_eq!(verified.extraction_errors, 2);
        assert_eq!(verified.outcome, RepoState::Failed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_artifact_removed() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("TROUBLESHOOTING.md"), "old").unwrap();

        let graph = RepositoryGraph::empty("demo");
        let results = vec![result("troubleshooting", "TROUBLESHOOTING.md", ArtifactStatus::Skipped, "")];
        let output = RepoOutput {
            repo_id: "demo",
            repo_path: Path::new("/src/demo"),
            outcome: RepoState::Done,
            graph: &graph,
            results: &results,
            extraction_errors: 0,
            emit_graph: false,
        };
        let manifest = write_repo_output(&dir, &output).unwrap();
        assert!(manifest.artifacts.is_empty());
        assert!(manifest.failed.is_empty());
        assert!(!dir.join("TROUBLESHOOTING.md").exists());
        assert!(!dir.join(GRAPH_FILE).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn tampered_artifact_fails_verification() {
        let dir = temp_dir();
        let graph = RepositoryGraph::empty("demo");
        let results = vec![result("primary-context", "CLAUDE.md", ArtifactStatus::Success, "a")];
        let output = RepoOutput {
            repo_id: "demo",
            repo_path: Path::new("/src/demo"),
            outcome: RepoState::Done,
            graph: &graph,
            results: &results,
            extraction_errors: 0,
            emit_graph: false,
        };
        write_repo_output(&dir, &output).unwrap();
        std::fs::write(dir.join("CLAUDE.md"), "b").unwrap();

        let err = verify_output(&dir).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sha256_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
