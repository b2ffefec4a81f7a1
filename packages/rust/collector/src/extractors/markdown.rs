//! Markdown extractor: a document entity, its headings as sections, and
//! relative links to other documents.

use std::sync::LazyLock;

use regex::Regex;
use repoctx_shared::{EntityRef, FileKind, Fragment, SourceFile, kinds, rel};

use super::{Extractor, resolve_relative, utf8};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("heading regex"));

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)(?:\s+[^)]*)?\)").expect("link regex"));

pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Markdown]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let text = utf8(bytes)?;
        let mut frag = Fragment::new(file.path.clone());

        let mut in_fence = false;
        let mut title: Option<String> = None;
        let mut sections = Vec::new();
        let mut links = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(caps) = HEADING_RE.captures(line) {
                let level = caps[1].len();
                let heading = caps[2].to_string();
                if level == 1 && title.is_none() {
                    title = Some(heading.clone());
                }
                sections.push((heading, level, idx + 1));
            }
            for caps in LINK_RE.captures_iter(line) {
                if let Some(target) = document_link(&file.path, &caps[1]) {
                    links.push(target);
                }
            }
        }

        let mut attrs = vec![("format", "markdown".to_string())];
        if let Some(title) = title {
            attrs.push(("title", title));
        }
        let doc = frag.entity_with(file.path.clone(), kinds::DOCUMENT, attrs);

        for (heading, level, line) in sections {
            let section = frag.entity_with(
                heading,
                kinds::SECTION,
                [("level", level.to_string()), ("line", line.to_string())],
            );
            frag.relate(&doc, &section, rel::CONTAINS);
        }
        links.sort();
        links.dedup();
        for target in links.into_iter().filter(|t| *t != file.path) {
            let to = EntityRef::new(target.clone(), target, kinds::DOCUMENT);
            frag.relate(&doc, &to, rel::LINKS_TO);
        }
        Ok(frag)
    }

    fn name(&self) -> &str {
        "markdown"
    }
}

/// Resolve a link to another in-repository document, if it is one.
pub(crate) fn document_link(from_file: &str, href: &str) -> Option<String> {
    if href.contains("://") || href.starts_with('#') || href.starts_with("mailto:") {
        return None;
    }
    let path = href.split(['#', '?']).next().unwrap_or("");
    let lower = path.to_ascii_lowercase();
    let is_document = [".md", ".markdown", ".html", ".htm"]
        .iter()
        .any(|ext| lower.ends_with(ext));
    if !is_document {
        return None;
    }
    let resolved = match path.strip_prefix('/') {
        Some(rooted) => super::normalize_path(rooted),
        None => resolve_relative(from_file, path),
    };
    (!resolved.is_empty()).then_some(resolved)
}
