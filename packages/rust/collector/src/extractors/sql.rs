//! SQL script extractor: tables, views and the tables each statement reads.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use repoctx_shared::{EntityRef, FileKind, Fragment, SourceFile, kinds, rel};

use super::{Extractor, scan_issues, utf8};

static CREATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*create\s+(?:or\s+replace\s+)?(?:temp(?:orary)?\s+)?(?:materialized\s+)?(table|view)\s+(?:if\s+not\s+exists\s+)?([\w\."`\[\]]+)"#,
    )
    .expect("create regex")
});

static READS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:from|join)\s+([A-Za-z_][\w\."`\[\]]*)"#).expect("reads regex")
});

static COLUMN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s+[A-Za-z]").expect("column regex"));

/// Words after which a column-list line is really a constraint.
const CONSTRAINT_WORDS: &[&str] = &["primary", "foreign", "unique", "constraint", "check", "key", "index"];

pub struct SqlExtractor;

impl Extractor for SqlExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Sql]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let text = utf8(bytes)?;
        let mut frag = Fragment::new(file.path.clone());
        let script = frag.entity_with(
            file.path.clone(),
            kinds::MODULE,
            [("language", "sql")],
        );

        let mut defined: Vec<(String, EntityRef)> = Vec::new();
        let mut pending_reads: Vec<(EntityRef, BTreeSet<String>)> = Vec::new();

        for statement in strip_line_comments(text).split(';') {
            let Some(caps) = CREATE_RE.captures(statement) else {
                continue;
            };
            let kind = if caps[1].eq_ignore_ascii_case("view") {
                kinds::VIEW
            } else {
                kinds::TABLE
            };
            let name = unquote(&caps[2]);
            let body = &statement[caps.get(0).map(|m| m.end()).unwrap_or(0)..];

            let mut attrs = vec![("statement", kind.to_string())];
            if kind == kinds::TABLE {
                let columns = table_columns(body);
                if !columns.is_empty() {
                    attrs.push(("columns", columns.join(", ")));
                }
            }
            let entity = frag.entity_with(name.clone(), kind, attrs);
            frag.relate(&script, &entity, rel::CONTAINS);

            let reads: BTreeSet<String> = READS_RE
                .captures_iter(body)
                .map(|c| unquote(&c[1]))
                .filter(|t| !t.eq_ignore_ascii_case(&name))
                .collect();
            if !reads.is_empty() {
                pending_reads.push((entity.clone(), reads));
            }
            defined.push((name.to_ascii_lowercase(), entity));
        }

        // Only link reads of objects defined in this script; others are noted.
        for (reader, reads) in pending_reads {
            let mut external = Vec::new();
            for table in reads {
                let lower = table.to_ascii_lowercase();
                match defined.iter().find(|(n, _)| *n == lower) {
                    Some((_, target)) => frag.relate(&reader, target, rel::READS),
                    None => external.push(table),
                }
            }
            if !external.is_empty() {
                if let Some(raw) = frag.entities.iter_mut().find(|e| e.key == reader) {
                    raw.attributes.insert("reads".into(), external.join(", "));
                }
            }
        }

        scan_issues(&mut frag, &script, text, 0);
        Ok(frag)
    }

    fn name(&self) -> &str {
        "sql"
    }
}

fn strip_line_comments(text: &str) -> String {
    text.lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unquote(name: &str) -> String {
    name.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .replace(['"', '`', '[', ']'], "")
}

/// Column names from the parenthesized body of a `CREATE TABLE`.
fn table_columns(body: &str) -> Vec<String> {
    let Some(open) = body.find('(') else {
        return Vec::new();
    };
    let inner = &body[open + 1..];
    let inner = inner.rfind(')').map(|close| &inner[..close]).unwrap_or(inner);
    inner
        .split(',')
        .filter_map(|part| COLUMN_RE.captures(part).map(|c| c[1].to_string()))
        .filter(|col| !CONSTRAINT_WORDS.contains(&col.to_ascii_lowercase().as_str()))
        .collect()
}
