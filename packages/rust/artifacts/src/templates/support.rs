//! Enhancement-tier templates.

use repoctx_shared::{ArtifactError, GraphWarning};

use super::{
    Doc, NO_CYCLES, NO_EXTRACTION_ERRORS, NO_INTERNAL_DEPS, NO_TECH_STACK, code_span,
    joined_or_not_detected,
};
use crate::spec::RenderContext;

pub fn dependencies(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let mut doc = Doc::new(&format!("{} Dependencies", ctx.meta.name));
    doc.field("Frameworks", &joined_or_not_detected(&a.frameworks))
        .end_fields();

    doc.h2("External Packages");
    let rows: Vec<Vec<String>> = a
        .external_deps
        .iter()
        .map(|d| vec![code_span(&d.name), d.used_by.to_string()])
        .collect();
    doc.table(&["Package", "Imported by (files)"], &rows, NO_TECH_STACK);

    doc.h2("Internal Dependencies").bullets(
        a.internal_deps
            .iter()
            .map(|(from, to)| format!("{} imports {}", code_span(from), code_span(to))),
        NO_INTERNAL_DEPS,
    );

    doc.h2("Circular Imports")
        .bullets(a.cycles.iter().map(|c| c.join(" -> ")), NO_CYCLES);
    Ok(doc.finish())
}

pub fn troubleshooting(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let mut doc = Doc::new(&format!("Troubleshooting {}", ctx.meta.name));

    doc.h2("Files That Failed Analysis");
    let rows: Vec<Vec<String>> = ctx
        .meta
        .extraction_errors
        .iter()
        .map(|e| vec![code_span(&e.path), e.cause.clone()])
        .collect();
    doc.table(&["File", "Cause"], &rows, NO_EXTRACTION_ERRORS);

    let warnings = &ctx.graph.warnings;
    let count = |pred: fn(&GraphWarning) -> bool| warnings.iter().filter(|w| pred(w)).count();
    doc.h2("Graph Consistency");
    doc.table(
        &["Check", "Findings"],
        &[
            vec![
                "Duplicate definitions".to_string(),
                count(|w| matches!(w, GraphWarning::DuplicateEntity { .. })).to_string(),
            ],
            vec![
                "Unresolved references".to_string(),
                count(|w| matches!(w, GraphWarning::DanglingRelationship { .. })).to_string(),
            ],
            vec![
                "Cycles".to_string(),
                count(|w| matches!(w, GraphWarning::Cycle { .. })).to_string(),
            ],
        ],
        "",
    );
    let duplicates: Vec<String> = warnings
        .iter()
        .filter(|w| matches!(w, GraphWarning::DuplicateEntity { .. }))
        .map(|w| w.to_string())
        .collect();
    if !duplicates.is_empty() {
        doc.h3("Duplicate Definitions").bullets(duplicates, "");
    }

    doc.h2("Common Problems").bullets(common_problems(ctx), "");
    Ok(doc.finish())
}

fn common_problems(ctx: &RenderContext) -> Vec<String> {
    let a = &ctx.analysis;
    let mut problems = Vec::new();
    if !a.cycles.is_empty() {
        problems.push(format!(
            "Import errors at startup can come from the {} circular dependencies listed in `DEPENDENCIES.md`.",
            a.cycles.len()
        ));
    }
    if a.tech_stack.iter().any(|t| t == "django") {
        problems.push("Django: run `python manage.py migrate` after pulling model changes.".to_string());
    }
    if a.tech_stack.iter().any(|t| t == "flask") {
        problems.push("Flask: set `FLASK_APP` to the application module before `flask run`.".to_string());
    }
    if a.languages.iter().any(|(k, _)| k.as_str() == "notebook") {
        problems.push("Notebooks: restart the kernel and run all cells to reproduce results.".to_string());
    }
    if !ctx.meta.extraction_errors.is_empty() {
        problems.push("Files listed above could not be parsed; check their encoding and syntax.".to_string());
    }
    if problems.is_empty() {
        problems.push("No repository-specific problems detected.".to_string());
    }
    problems
}
