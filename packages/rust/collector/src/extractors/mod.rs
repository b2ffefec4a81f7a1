//! Extractor trait and built-in extractors.
//!
//! Each extractor turns one file's bytes into a [`Fragment`] of entities and
//! relationships. Extraction is shallow and structure-based: good enough to
//! drive ranking and templates, not a full parse.

mod html;
mod javascript;
mod markdown;
mod notebook;
mod office;
mod python;
mod sql;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use repoctx_shared::{EntityRef, FileKind, Fragment, SourceFile, kinds, rel};

pub use html::HtmlExtractor;
pub use javascript::JavaScriptExtractor;
pub use markdown::MarkdownExtractor;
pub use notebook::NotebookExtractor;
pub use office::{OfficeExtractor, SpreadsheetExtractor};
pub use python::PythonExtractor;
pub use sql::SqlExtractor;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Kind-specific extraction of one file.
///
/// Implementations must report failures as `Err(cause)`; the collector
/// records them as per-file extraction errors and moves on.
pub trait Extractor: Send + Sync {
    /// File kinds this extractor handles.
    fn kinds(&self) -> &'static [FileKind];

    /// Extract entities and relationships from one file's contents.
    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String>;

    /// Human-readable name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Static capability map from file kind to extractor, built once at startup.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_kind: HashMap<FileKind, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry. Every file is unsupported until extractors are registered.
    pub fn empty() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    /// Create a registry with all built-in extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PythonExtractor));
        registry.register(Arc::new(NotebookExtractor));
        registry.register(Arc::new(SqlExtractor));
        registry.register(Arc::new(JavaScriptExtractor));
        registry.register(Arc::new(MarkdownExtractor));
        registry.register(Arc::new(HtmlExtractor));
        registry.register(Arc::new(SpreadsheetExtractor));
        registry.register(Arc::new(OfficeExtractor));
        registry
    }

    /// Register an extractor for every kind it declares, replacing any
    /// previous registration for those kinds.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for kind in extractor.kinds() {
            self.by_kind.insert(*kind, Arc::clone(&extractor));
        }
    }

    pub fn get(&self, kind: FileKind) -> Option<&dyn Extractor> {
        self.by_kind.get(&kind).map(|e| e.as_ref())
    }

    /// Owned handle, for running the extractor off the async runtime.
    pub(crate) fn shared(&self, kind: FileKind) -> Option<Arc<dyn Extractor>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn supports(&self, kind: FileKind) -> bool {
        self.by_kind.contains_key(&kind)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Matches `TODO`/`FIXME`/`XXX`/`HACK` markers inside a comment.
static ISSUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:#|//|--|<!--)\s*(TODO|FIXME|XXX|HACK)\b[:\s]*(.*)").expect("issue regex")
});

/// Decode file bytes as UTF-8 text.
pub(crate) fn utf8(bytes: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {e}"))
}

/// Record issue markers found in `text` as entities contained by `owner`.
/// `line_offset` is added to reported line numbers.
pub(crate) fn scan_issues(frag: &mut Fragment, owner: &EntityRef, text: &str, line_offset: usize) {
    for (idx, line) in text.lines().enumerate() {
        let Some(caps) = ISSUE_RE.captures(line) else {
            continue;
        };
        let line_no = idx + 1 + line_offset;
        let tag = caps[1].to_string();
        let note = caps[2].trim().trim_end_matches("-->").trim().to_string();
        let issue = frag.entity_with(
            format!("{tag}:{line_no}"),
            kinds::ISSUE,
            [("tag", tag), ("text", note), ("line", line_no.to_string())],
        );
        frag.relate(owner, &issue, rel::CONTAINS);
    }
}

/// Normalize a `/`-separated path, resolving `.` and `..` segments.
/// Leading `..` that would escape the root are dropped.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Directory part of a repository-relative path (`""` at the root).
pub(crate) fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Join a relative reference onto the directory of `from_file`.
pub(crate) fn resolve_relative(from_file: &str, reference: &str) -> String {
    let dir = parent_dir(from_file);
    if dir.is_empty() {
        normalize_path(reference)
    } else {
        normalize_path(&format!("{dir}/{reference}"))
    }
}
