//! Core domain types for repoctx: source files, graph fragments, artifact
//! results and the per-repository job state machine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RepoCtxError, Result};

/// Well-known entity kinds produced by the built-in extractors.
pub mod kinds {
    pub const MODULE: &str = "module";
    pub const CLASS: &str = "class";
    pub const FUNCTION: &str = "function";
    pub const IMPORT: &str = "import";
    pub const TEST: &str = "test";
    pub const ISSUE: &str = "issue";
    pub const TABLE: &str = "table";
    pub const VIEW: &str = "view";
    pub const COLUMN: &str = "column";
    pub const SECTION: &str = "section";
    pub const DOCUMENT: &str = "document";
}

/// Well-known relationship types.
pub mod rel {
    pub const CONTAINS: &str = "contains";
    pub const IMPORTS: &str = "imports";
    pub const RESOLVES_TO: &str = "resolves_to";
    pub const READS: &str = "reads";
    pub const LINKS_TO: &str = "links_to";
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for batch run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Source files
// ---------------------------------------------------------------------------

/// Recognized file kinds. Detection is by lowercase extension only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Python,
    Notebook,
    Sql,
    JavaScript,
    TypeScript,
    Markdown,
    Html,
    Spreadsheet,
    Document,
    Presentation,
}

impl FileKind {
    pub const ALL: [FileKind; 10] = [
        FileKind::Python,
        FileKind::Notebook,
        FileKind::Sql,
        FileKind::JavaScript,
        FileKind::TypeScript,
        FileKind::Markdown,
        FileKind::Html,
        FileKind::Spreadsheet,
        FileKind::Document,
        FileKind::Presentation,
    ];

    /// Detect the kind of a file from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let kind = match ext.as_str() {
            "py" => Self::Python,
            "ipynb" => Self::Notebook,
            "sql" => Self::Sql,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "md" | "markdown" => Self::Markdown,
            "html" | "htm" => Self::Html,
            "csv" | "xlsx" | "xls" => Self::Spreadsheet,
            "docx" => Self::Document,
            "pptx" => Self::Presentation,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Notebook => "notebook",
            Self::Sql => "sql",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Spreadsheet => "spreadsheet",
            Self::Document => "document",
            Self::Presentation => "presentation",
        }
    }

    /// Kinds that count towards a repository's primary language.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Self::Python | Self::Notebook | Self::Sql | Self::JavaScript | Self::TypeScript
        )
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file discovered during traversal. `path` is repository-relative and
/// always uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub kind: FileKind,
}

/// A per-file extraction failure. Recorded and skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionError {
    pub path: String,
    pub cause: String,
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.cause)
    }
}

// ---------------------------------------------------------------------------
// Graph fragments (extractor output)
// ---------------------------------------------------------------------------

/// Stable key of an entity: unique by `(file, name, kind)` within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub file: String,
    pub name: String,
    pub kind: String,
}

impl EntityRef {
    pub fn new(file: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            kind: kind.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{} ({})", self.file, self.name, self.kind)
    }
}

/// An entity as emitted by an extractor, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntity {
    pub key: EntityRef,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A relationship between two entity keys, possibly in different files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRelationship {
    pub from: EntityRef,
    pub to: EntityRef,
    pub rel_type: String,
}

/// Everything one extractor call produced for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub file: String,
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
}

impl Fragment {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    /// Add an entity owned by this fragment's file and return its key.
    pub fn entity(&mut self, name: impl Into<String>, kind: &str) -> EntityRef {
        self.entity_with(name, kind, std::iter::empty::<(String, String)>())
    }

    /// Add an entity with attributes and return its key.
    pub fn entity_with<K, V>(
        &mut self,
        name: impl Into<String>,
        kind: &str,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> EntityRef
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = EntityRef::new(self.file.clone(), name, kind);
        self.entities.push(RawEntity {
            key: key.clone(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        key
    }

    pub fn relate(&mut self, from: &EntityRef, to: &EntityRef, rel_type: &str) {
        self.relationships.push(RawRelationship {
            from: from.clone(),
            to: to.clone(),
            rel_type: rel_type.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Assembled graph elements
// ---------------------------------------------------------------------------

/// Index of an entity in its graph's arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub file: String,
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: EntityId,
    pub to: EntityId,
    pub rel_type: String,
    pub directed: bool,
}

/// Non-fatal findings recorded while assembling a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphWarning {
    /// A later entity with the same `(file, name, kind)` was dropped.
    DuplicateEntity {
        entity: EntityRef,
        conflicting_attributes: Vec<String>,
    },
    /// A relationship referenced an entity that does not exist.
    DanglingRelationship {
        from: EntityRef,
        to: EntityRef,
        rel_type: String,
    },
    /// A directed cycle, listed as `file::name` in traversal order.
    Cycle { entities: Vec<String> },
    /// Cycle reporting stopped at the configured cap.
    CyclesTruncated { omitted: usize },
}

impl std::fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEntity {
                entity,
                conflicting_attributes,
            } if conflicting_attributes.is_empty() => write!(f, "duplicate entity {entity}"),
            Self::DuplicateEntity {
                entity,
                conflicting_attributes,
            } => write!(
                f,
                "duplicate entity {entity} (conflicting: {})",
                conflicting_attributes.join(", ")
            ),
            Self::DanglingRelationship { from, to, rel_type } => {
                write!(f, "dangling {rel_type} relationship {from} -> {to}")
            }
            Self::Cycle { entities } => write!(f, "cycle: {}", entities.join(" -> ")),
            Self::CyclesTruncated { omitted } => write!(f, "{omitted} further cycles omitted"),
        }
    }
}

/// Counts kept on a job after its graph has been discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub files: usize,
    pub entities: usize,
    pub relationships: usize,
    pub warnings: usize,
    pub cycles: usize,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Scheduling priority of an artifact. Ordered: `Critical < High < Enhancement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical,
    High,
    Enhancement,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Enhancement => "enhancement",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = RepoCtxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "1" => Ok(Self::Critical),
            "high" | "2" => Ok(Self::High),
            "enhancement" | "3" => Ok(Self::Enhancement),
            other => Err(RepoCtxError::validation(format!(
                "unknown tier '{other}' (expected critical, high or enhancement)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Success,
    Failed,
    Skipped,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Per-run output of one artifact spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResult {
    pub spec_id: String,
    pub file_name: String,
    pub tier: Tier,
    pub status: ArtifactStatus,
    /// Rendered text. Not serialized into reports; written to disk instead.
    #[serde(skip)]
    pub content: String,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactResult {
    /// Result for a spec excluded by tier selection.
    pub fn skipped(spec_id: &str, file_name: &str, tier: Tier) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            file_name: file_name.to_string(),
            tier,
            status: ArtifactStatus::Skipped,
            content: String::new(),
            duration_ms: 0,
            attempts: 0,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Repository jobs
// ---------------------------------------------------------------------------

/// A repository selected for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    /// Stable identifier, also the output sub-directory name.
    pub id: String,
    pub path: PathBuf,
}

/// `Queued → Analyzing → Generating → {Done | Partial | Failed}`, plus
/// `Analyzing → Failed` for errors that prevent graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Queued,
    Analyzing,
    Generating,
    Done,
    Partial,
    Failed,
}

impl RepoState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Partial | Self::Failed)
    }

    /// Whether `self → next` is an edge of the job state machine.
    ///
    /// Any non-terminal state may fail (cancellation and worker panics can
    /// interrupt a job at any point).
    pub fn can_transition_to(&self, next: RepoState) -> bool {
        use RepoState::*;
        match (*self, next) {
            (Queued, Analyzing) | (Analyzing, Generating) => true,
            (Generating, Done | Partial) => true,
            (s, Failed) => !s.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RepoState {
    type Err = RepoCtxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "analyzing" => Ok(Self::Analyzing),
            "generating" => Ok(Self::Generating),
            "done" => Ok(Self::Done),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(RepoCtxError::validation(format!("unknown job state '{other}'"))),
        }
    }
}

/// The unit of work tracking one repository through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoJob {
    pub repo_id: String,
    pub repo_path: PathBuf,
    pub state: RepoState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphSummary>,
    #[serde(default)]
    pub results: Vec<ArtifactResult>,
    #[serde(default)]
    pub extraction_errors: Vec<ExtractionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoJob {
    pub fn new(target: &RepoTarget) -> Self {
        Self {
            repo_id: target.id.clone(),
            repo_path: target.path.clone(),
            state: RepoState::Queued,
            graph: None,
            results: Vec::new(),
            extraction_errors: Vec::new(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Move the job along the state machine, stamping start/end times.
    pub fn transition(&mut self, next: RepoState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RepoCtxError::validation(format!(
                "illegal job transition {} -> {next} for {}",
                self.state, self.repo_id
            )));
        }
        if self.state == RepoState::Queued {
            self.started_at = Some(Utc::now());
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Terminate the job as `Failed` with a cause. No-op on terminal jobs.
    pub fn fail(&mut self, cause: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = RepoState::Failed;
        self.error = Some(cause.into());
        self.ended_at = Some(Utc::now());
    }

    /// Wall-clock duration, if the job has both started and ended.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        Some((end - start).num_milliseconds().max(0) as u64)
    }
}

/// Aggregate of every job submitted in one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub run_id: RunId,
    pub jobs: Vec<RepoJob>,
    /// Repositories skipped because a previous run already completed them.
    #[serde(default)]
    pub resumed: Vec<String>,
    /// Repositories never submitted because the run was cancelled.
    #[serde(default)]
    pub not_started: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            jobs: Vec::new(),
            resumed: Vec::new(),
            not_started: Vec::new(),
            cancelled: false,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn count(&self, state: RepoState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }

    /// `Done + Partial + Failed == jobs`, true once every job is terminal.
    pub fn is_complete(&self) -> bool {
        self.count(RepoState::Done) + self.count(RepoState::Partial) + self.count(RepoState::Failed)
            == self.jobs.len()
    }
}
