//! Artifact definitions and the input every template renders from.

use std::path::PathBuf;
use std::sync::Arc;

use repoctx_shared::{ArtifactError, ExtractionError, RepositoryGraph, Tier};

use crate::analysis::RepoAnalysis;

/// Renders one artifact. Receives narrative prose when a text generator
/// produced some for this spec.
pub type RenderFn = fn(&RenderContext, Option<&str>) -> Result<String, ArtifactError>;

/// Builds the text-generation prompt for a spec's narrative section.
pub type PromptFn = fn(&RenderContext) -> String;

/// Static definition of one artifact.
#[derive(Clone, Copy)]
pub struct ArtifactSpec {
    pub id: &'static str,
    /// Output path relative to the repository output directory.
    pub file_name: &'static str,
    pub tier: Tier,
    pub description: &'static str,
    pub render: RenderFn,
    pub narrative: Option<PromptFn>,
}

impl std::fmt::Debug for ArtifactSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSpec")
            .field("id", &self.id)
            .field("file_name", &self.file_name)
            .field("tier", &self.tier)
            .field("narrative", &self.narrative.is_some())
            .finish()
    }
}

/// Repository facts that do not come from the graph.
#[derive(Debug, Clone, Default)]
pub struct RepoMetadata {
    pub repo_id: String,
    /// Display name, the repository directory name.
    pub name: String,
    pub path: PathBuf,
    pub extraction_errors: Vec<ExtractionError>,
    /// File names of every artifact selected for this repository.
    /// Templates only cross-reference these.
    pub artifact_files: Vec<String>,
}

/// Immutable input shared by every artifact of one repository.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub graph: Arc<RepositoryGraph>,
    pub meta: RepoMetadata,
    pub analysis: RepoAnalysis,
}

impl RenderContext {
    pub fn new(graph: Arc<RepositoryGraph>, meta: RepoMetadata, key_module_count: usize) -> Self {
        let analysis = RepoAnalysis::from_graph(&graph, key_module_count);
        Self {
            graph,
            meta,
            analysis,
        }
    }

    /// Whether `file_name` is generated alongside the current artifact.
    pub fn publishes(&self, file_name: &str) -> bool {
        self.meta.artifact_files.iter().any(|f| f == file_name)
    }
}
