//! Artifact templates.
//!
//! Every template is a pure function of a [`RenderContext`]. Sections whose
//! data is missing render one of the placeholder constants below instead of
//! disappearing, so an empty repository still yields complete artifacts.

pub mod context;
pub mod reference;
pub mod support;

use std::collections::BTreeMap;

use repoctx_shared::SourceFile;

use crate::spec::RenderContext;

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

pub const NOT_DETECTED: &str = "Not detected";
pub const NO_ENTRY_POINTS: &str = "_No entry points detected._";
pub const NO_KEY_MODULES: &str = "_Key modules will be identified as analysis progresses._";
pub const NO_TECH_STACK: &str = "_No external packages imported._";
pub const NO_PUBLIC_API: &str = "_No public functions or classes found._";
pub const NO_TESTS: &str = "_No tests found._";
pub const NO_ISSUES: &str = "_No TODO, FIXME, XXX or HACK markers found._";
pub const NO_CYCLES: &str = "_No circular dependencies detected._";
pub const NO_INTERNAL_DEPS: &str = "_No imports between repository modules._";
pub const NO_DATA_OBJECTS: &str = "_No SQL tables or views defined._";
pub const NO_DOCUMENTS: &str = "_No documentation files found._";
pub const NO_FILES: &str = "_No recognized source files._";
pub const NO_EXTRACTION_ERRORS: &str = "_Every recognized file was extracted successfully._";

// ---------------------------------------------------------------------------
// Markdown builder
// ---------------------------------------------------------------------------

/// Append-only markdown document.
#[derive(Debug, Default)]
pub(crate) struct Doc {
    buf: String,
}

impl Doc {
    pub(crate) fn new(title: &str) -> Self {
        let mut doc = Self::default();
        doc.buf.push_str("# ");
        doc.buf.push_str(title);
        doc.buf.push_str("\n\n");
        doc
    }

    pub(crate) fn h2(&mut self, text: &str) -> &mut Self {
        self.buf.push_str("## ");
        self.buf.push_str(text);
        self.buf.push_str("\n\n");
        self
    }

    pub(crate) fn h3(&mut self, text: &str) -> &mut Self {
        self.buf.push_str("### ");
        self.buf.push_str(text);
        self.buf.push_str("\n\n");
        self
    }

    pub(crate) fn para(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(text.trim());
        self.buf.push_str("\n\n");
        self
    }

    /// `**key:** value` line; consecutive calls form one block.
    pub(crate) fn field(&mut self, key: &str, value: &str) -> &mut Self {
        self.buf.push_str(&format!("**{key}:** {value}  \n"));
        self
    }

    /// End a block of [`Doc::field`] lines.
    pub(crate) fn end_fields(&mut self) -> &mut Self {
        self.buf.push('\n');
        self
    }

    /// Bullet list, or `placeholder` when `items` is empty.
    pub(crate) fn bullets<I, S>(&mut self, items: I, placeholder: &str) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut any = false;
        for item in items {
            any = true;
            self.buf.push_str("- ");
            self.buf.push_str(item.as_ref());
            self.buf.push('\n');
        }
        if !any {
            self.buf.push_str(placeholder);
            self.buf.push('\n');
        }
        self.buf.push('\n');
        self
    }

    pub(crate) fn numbered<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        for (idx, item) in items.iter().enumerate() {
            self.buf.push_str(&format!("{}. {}\n", idx + 1, item.as_ref()));
        }
        self.buf.push('\n');
        self
    }

    /// Markdown table, or `placeholder` when there are no rows.
    pub(crate) fn table(&mut self, headers: &[&str], rows: &[Vec<String>], placeholder: &str) -> &mut Self {
        if rows.is_empty() {
            return self.para(placeholder);
        }
        self.buf.push_str("| ");
        self.buf.push_str(&headers.join(" | "));
        self.buf.push_str(" |\n|");
        for _ in headers {
            self.buf.push_str("---|");
        }
        self.buf.push('\n');
        for row in rows {
            let cells: Vec<String> = row.iter().map(|c| escape_cell(c)).collect();
            self.buf.push_str("| ");
            self.buf.push_str(&cells.join(" | "));
            self.buf.push_str(" |\n");
        }
        self.buf.push('\n');
        self
    }

    pub(crate) fn code(&mut self, lang: &str, body: &str) -> &mut Self {
        self.buf.push_str("```");
        self.buf.push_str(lang);
        self.buf.push('\n');
        self.buf.push_str(body.trim_end());
        self.buf.push_str("\n```\n\n");
        self
    }

    pub(crate) fn finish(self) -> String {
        let mut out = self.buf.trim_end().to_string();
        out.push('\n');
        out
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Inline code span.
pub(crate) fn code_span(text: &str) -> String {
    format!("`{text}`")
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Comma-joined list, or [`NOT_DETECTED`].
pub(crate) fn joined_or_not_detected(items: &[String]) -> String {
    if items.is_empty() {
        NOT_DETECTED.to_string()
    } else {
        items.join(", ")
    }
}

/// One-paragraph description of the repository built from graph facts.
pub(crate) fn overview(ctx: &RenderContext) -> String {
    let a = &ctx.analysis;
    if a.file_count == 0 {
        return format!(
            "{} contains no recognized source files. Sections below list what will be filled in once code or documentation is added.",
            ctx.meta.name
        );
    }
    let language = a.primary_language.as_deref().unwrap_or("documentation-only");
    let mut text = format!(
        "{} is a {language} repository with {} recognized files, {} entities and {} relationships.",
        ctx.meta.name, a.file_count, a.entity_count, a.relationship_count
    );
    if !a.frameworks.is_empty() {
        text.push_str(&format!(" It builds on {}.", a.frameworks.join(", ")));
    }
    if let Some(top) = a.key_modules.first() {
        text.push_str(&format!(
            " The most connected component is `{}` in `{}`.",
            top.name, top.file
        ));
    }
    text
}

/// Narrative prose when provided and non-empty, otherwise [`overview`].
pub(crate) fn narrative_or_overview(ctx: &RenderContext, narrative: Option<&str>) -> String {
    narrative
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| overview(ctx))
}

/// Files grouped by their top-level directory (`.` for the root).
pub(crate) fn files_by_directory(files: &[SourceFile]) -> BTreeMap<String, Vec<&SourceFile>> {
    let mut groups: BTreeMap<String, Vec<&SourceFile>> = BTreeMap::new();
    for file in files {
        let dir = match file.path.split_once('/') {
            Some((top, _)) => top.to_string(),
            None => ".".to_string(),
        };
        groups.entry(dir).or_default().push(file);
    }
    groups
}

/// Command that runs the given test framework.
pub(crate) fn test_command(framework: &str) -> Option<&'static str> {
    match framework {
        "pytest" => Some("pytest"),
        "unittest" => Some("python -m unittest discover"),
        "jest" => Some("npx jest"),
        _ => None,
    }
}
