//! Jupyter notebook extractor.
//!
//! Code cells are concatenated and run through the Python extractor so line
//! numbers refer to the joined source; markdown cell headings become
//! sections of the notebook module.

use std::sync::LazyLock;

use regex::Regex;
use repoctx_shared::{FileKind, Fragment, SourceFile, kinds, rel};
use serde_json::Value;

use super::python::{extract_source, module_name};
use super::{Extractor, utf8};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").expect("heading regex"));

pub struct NotebookExtractor;

impl Extractor for NotebookExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Notebook]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let doc: Value = serde_json::from_str(utf8(bytes)?)
            .map_err(|e| format!("invalid notebook JSON: {e}"))?;
        let cells = doc
            .get("cells")
            .and_then(Value::as_array)
            .ok_or_else(|| "notebook has no cells array".to_string())?;

        let language = doc
            .pointer("/metadata/kernelspec/language")
            .or_else(|| doc.pointer("/metadata/language_info/name"))
            .and_then(Value::as_str)
            .unwrap_or("python")
            .to_string();

        let mut code = String::new();
        let mut headings = Vec::new();
        let mut code_cells = 0usize;
        for cell in cells {
            let source = cell_source(cell);
            match cell.get("cell_type").and_then(Value::as_str) {
                Some("code") => {
                    code_cells += 1;
                    code.push_str(&source);
                    if !source.ends_with('\n') {
                        code.push('\n');
                    }
                }
                Some("markdown") => {
                    for line in source.lines() {
                        if let Some(caps) = HEADING_RE.captures(line.trim()) {
                            headings.push((caps[1].len(), caps[2].to_string()));
                        }
                    }
                }
                _ => {}
            }
        }

        let mut frag = Fragment::new(file.path.clone());
        let name = module_name(&file.path);
        let module = frag.entity_with(
            name.clone(),
            kinds::MODULE,
            [
                ("language", language.clone()),
                ("notebook", "true".to_string()),
                ("cells", cells.len().to_string()),
                ("code_cells", code_cells.to_string()),
            ],
        );

        for (level, title) in headings {
            let section = frag.entity_with(title, kinds::SECTION, [("level", level.to_string())]);
            frag.relate(&module, &section, rel::CONTAINS);
        }

        if language == "python" {
            extract_source(&mut frag, &module, &name, &code, 0);
        }
        Ok(frag)
    }

    fn name(&self) -> &str {
        "notebook"
    }
}

/// Cell source is either a string or a list of line strings.
fn cell_source(cell: &Value) -> String {
    match cell.get("source") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}
