//! Python source extractor.
//!
//! Line-based: recognizes top-level and nested `class`/`def`, `import` and
//! `from ... import`, pytest/unittest style tests, `__main__` guards and
//! issue markers.

use std::sync::LazyLock;

use regex::Regex;
use repoctx_shared::{EntityRef, FileKind, Fragment, SourceFile, kinds, rel};

use super::{Extractor, scan_issues, utf8};

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:").expect("class regex")
});

static DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("def regex")
});

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+)$").expect("import regex"));

static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+(\.*[\w\.]*)\s+import\s+").expect("from-import regex")
});

static MAIN_GUARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^if\s+__name__\s*==\s*['"]__main__['"]\s*:"#).expect("main guard regex")
});

pub struct PythonExtractor;

impl Extractor for PythonExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Python]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let text = utf8(bytes)?;
        if text.contains('\0') {
            return Err("binary content in Python source".into());
        }

        let mut frag = Fragment::new(file.path.clone());
        let module_name = module_name(&file.path);
        let module = frag.entity_with(
            module_name.clone(),
            kinds::MODULE,
            [
                ("language", "python".to_string()),
                ("lines", text.lines().count().to_string()),
            ],
        );
        extract_source(&mut frag, &module, &module_name, text, 0);
        Ok(frag)
    }

    fn name(&self) -> &str {
        "python"
    }
}

/// Dotted module name for a repository-relative path.
/// `pkg/sub/mod.py` → `pkg.sub.mod`, `pkg/__init__.py` → `pkg`.
pub(crate) fn module_name(path: &str) -> String {
    let stem = path
        .strip_suffix(".py")
        .or_else(|| path.strip_suffix(".ipynb"))
        .unwrap_or(path);
    let stem = stem.strip_suffix("/__init__").unwrap_or(stem);
    stem.replace('/', ".")
}

/// Extract Python constructs from `text` into `frag`, attaching them to
/// `module`. Shared with the notebook extractor.
pub(crate) fn extract_source(
    frag: &mut Fragment,
    module: &EntityRef,
    module_name: &str,
    text: &str,
    line_offset: usize,
) {
    let is_test_module = is_test_path(&frag.file);
    // (indent, qualified name, key) of enclosing classes
    let mut class_stack: Vec<(usize, String, EntityRef)> = Vec::new();
    let mut has_main_guard = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = (idx + 1 + line_offset).to_string();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        while class_stack.last().is_some_and(|(ci, _, _)| indent <= *ci) {
            class_stack.pop();
        }

        if let Some(caps) = CLASS_RE.captures(line) {
            let name = caps[2].to_string();
            let qualified = qualify(&class_stack, &name);
            let bases = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
            let is_test_class = name.starts_with("Test") || bases.contains("TestCase");
            let class = frag.entity_with(
                qualified.clone(),
                kinds::CLASS,
                [
                    ("line", line_no),
                    ("bases", bases.to_string()),
                    ("test_class", is_test_class.to_string()),
                ],
            );
            let owner = class_stack.last().map(|(_, _, r)| r.clone());
            frag.relate(owner.as_ref().unwrap_or(module), &class, rel::CONTAINS);
            class_stack.push((indent, qualified, class));
            continue;
        }

        if let Some(caps) = DEF_RE.captures(line) {
            let name = &caps[3];
            let qualified = qualify(&class_stack, name);
            let in_test_class = class_stack.last().is_some_and(|(_, cname, _)| {
                cname.rsplit('.').next().is_some_and(|c| c.starts_with("Test"))
            });
            let is_test = name.starts_with("test") && (is_test_module || in_test_class);
            let kind = if is_test { kinds::TEST } else { kinds::FUNCTION };
            let mut attrs = vec![
                ("line", line_no),
                ("async", caps.get(2).is_some().to_string()),
                ("public", (!name.starts_with('_')).to_string()),
            ];
            if is_test {
                let framework = if in_test_class { "unittest" } else { "pytest" };
                attrs.push(("framework", framework.to_string()));
            }
            let func = frag.entity_with(qualified, kind, attrs);
            let owner = class_stack.last().map(|(_, _, r)| r.clone());
            frag.relate(owner.as_ref().unwrap_or(module), &func, rel::CONTAINS);
            continue;
        }

        if let Some(caps) = FROM_RE.captures(line) {
            let target = resolve_import(module_name, &frag.file, &caps[1]);
            if !target.is_empty() {
                let import = frag.entity_with(target, kinds::IMPORT, [("line", line_no)]);
                frag.relate(module, &import, rel::IMPORTS);
            }
            continue;
        }

        if let Some(caps) = IMPORT_RE.captures(line) {
            for item in caps[1].split(',') {
                // `import a.b as c`
                let target = item.split_whitespace().next().unwrap_or("");
                if target.is_empty() {
                    continue;
                }
                let import = frag.entity_with(target, kinds::IMPORT, [("line", line_no.clone())]);
                frag.relate(module, &import, rel::IMPORTS);
            }
            continue;
        }

        if indent == 0 && MAIN_GUARD_RE.is_match(line) {
            has_main_guard = true;
        }
    }

    if has_main_guard {
        if let Some(raw) = frag.entities.iter_mut().find(|e| &e.key == module) {
            raw.attributes.insert("entry_point".into(), "true".into());
        }
    }

    scan_issues(frag, module, text, line_offset);
}

fn qualify(class_stack: &[(usize, String, EntityRef)], name: &str) -> String {
    match class_stack.last() {
        Some((_, class, _)) => format!("{class}.{name}"),
        None => name.to_string(),
    }
}

/// Resolve `from .x import y` style targets against the importing module.
fn resolve_import(module_name: &str, path: &str, target: &str) -> String {
    let dots = target.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return target.to_string();
    }
    let rest = &target[dots..];
    let mut package: Vec<&str> = module_name.split('.').collect();
    // A package's __init__ is its own package; a plain module's package is its parent.
    if !path.ends_with("__init__.py") {
        package.pop();
    }
    for _ in 1..dots {
        package.pop();
    }
    if !rest.is_empty() {
        package.push(rest);
    }
    package.join(".")
}

pub(crate) fn is_test_path(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.starts_with("test_")
        || file.ends_with("_test.py")
        || path.split('/').any(|seg| seg == "tests" || seg == "test")
}
