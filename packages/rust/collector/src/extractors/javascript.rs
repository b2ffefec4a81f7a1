//! JavaScript / TypeScript extractor.
//!
//! Handles ES module imports, CommonJS `require`, function declarations,
//! arrow-function bindings, classes, TypeScript interfaces, `export`
//! markers and jest/mocha style `it`/`test` blocks in test files.

use std::sync::LazyLock;

use regex::Regex;
use repoctx_shared::{FileKind, Fragment, SourceFile, kinds, rel};

use super::{Extractor, resolve_relative, scan_issues, utf8};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:import|export)\s+(?:[^'"]*?\s+from\s+)?['"]([^'"]+)['"]"#)
        .expect("import regex")
});

static REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).expect("require regex")
});

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)")
        .expect("function regex")
});

static ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
    )
    .expect("arrow regex")
});

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(export\s+)?(?:default\s+)?(?:abstract\s+)?(class|interface)\s+([A-Za-z_$][\w$]*)")
        .expect("class regex")
});

static TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:it|test)\s*\(\s*['"`]([^'"`]+)['"`]"#).expect("test regex")
});

const SOURCE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"];

pub struct JavaScriptExtractor;

impl Extractor for JavaScriptExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::JavaScript, FileKind::TypeScript]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let text = utf8(bytes)?;
        let mut frag = Fragment::new(file.path.clone());
        let module = frag.entity_with(
            module_name(&file.path),
            kinds::MODULE,
            [
                ("language", file.kind.as_str().to_string()),
                ("lines", text.lines().count().to_string()),
            ],
        );
        let is_test_file = is_test_path(&file.path);

        for (idx, line) in text.lines().enumerate() {
            let line_no = (idx + 1).to_string();
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('*') {
                continue;
            }

            let mut specifiers: Vec<&str> = Vec::new();
            if let Some(caps) = IMPORT_RE.captures(line) {
                specifiers.push(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
            }
            specifiers.extend(REQUIRE_RE.captures_iter(line).filter_map(|c| c.get(1)).map(|m| m.as_str()));
            for spec in specifiers.into_iter().filter(|s| !s.is_empty()) {
                let target = resolve_specifier(&file.path, spec);
                let import = frag.entity_with(target, kinds::IMPORT, [("line", line_no.clone())]);
                frag.relate(&module, &import, rel::IMPORTS);
            }

            if let Some(caps) = CLASS_RE.captures(line) {
                let class = frag.entity_with(
                    &caps[3],
                    kinds::CLASS,
                    [
                        ("line", line_no.clone()),
                        ("exported", caps.get(1).is_some().to_string()),
                        ("interface", (&caps[2] == "interface").to_string()),
                    ],
                );
                frag.relate(&module, &class, rel::CONTAINS);
                continue;
            }

            let func = FUNCTION_RE.captures(line).or_else(|| ARROW_RE.captures(line));
            if let Some(caps) = func {
                let entity = frag.entity_with(
                    &caps[2],
                    kinds::FUNCTION,
                    [
                        ("line", line_no.clone()),
                        ("exported", caps.get(1).is_some().to_string()),
                        ("public", caps.get(1).is_some().to_string()),
                    ],
                );
                frag.relate(&module, &entity, rel::CONTAINS);
                continue;
            }

            if is_test_file {
                if let Some(caps) = TEST_RE.captures(line) {
                    let test = frag.entity_with(
                        &caps[1],
                        kinds::TEST,
                        [("line", line_no), ("framework", "jest".to_string())],
                    );
                    frag.relate(&module, &test, rel::CONTAINS);
                }
            }
        }

        scan_issues(&mut frag, &module, text, 0);
        Ok(frag)
    }

    fn name(&self) -> &str {
        "javascript"
    }
}

/// Module name: repository-relative path without its extension, with
/// `/index` folded into the directory (`src/api/index.ts` → `src/api`).
pub(crate) fn module_name(path: &str) -> String {
    let stem = SOURCE_EXTENSIONS
        .iter()
        .find_map(|ext| path.strip_suffix(ext))
        .unwrap_or(path);
    stem.strip_suffix("/index").unwrap_or(stem).to_string()
}

/// Relative specifiers resolve to module names; bare package specifiers
/// are kept as-is.
fn resolve_specifier(from_file: &str, spec: &str) -> String {
    if spec.starts_with("./") || spec.starts_with("../") {
        module_name(&resolve_relative(from_file, spec))
    } else {
        spec.to_string()
    }
}

fn is_test_path(path: &str) -> bool {
    path.contains(".test.")
        || path.contains(".spec.")
        || path.split('/').any(|seg| seg == "__tests__")
}
