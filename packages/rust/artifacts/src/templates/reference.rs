//! High-tier templates: reference documentation derived from the graph.

use std::collections::BTreeMap;

use repoctx_shared::{ArtifactError, kinds};

use super::{
    Doc, NO_CYCLES, NO_DATA_OBJECTS, NO_DOCUMENTS, NO_FILES, NO_INTERNAL_DEPS, NO_KEY_MODULES,
    NO_PUBLIC_API, NO_TESTS, NOT_DETECTED, code_span, files_by_directory, joined_or_not_detected,
    narrative_or_overview, test_command,
};
use crate::spec::RenderContext;

// ---------------------------------------------------------------------------
// ARCHITECTURE.md
// ---------------------------------------------------------------------------

pub fn architecture_prompt(ctx: &RenderContext) -> String {
    let a = &ctx.analysis;
    let edges: Vec<String> = a
        .internal_deps
        .iter()
        .take(40)
        .map(|(from, to)| format!("{from} -> {to}"))
        .collect();
    format!(
        "Describe the architecture of the repository '{}' in one or two paragraphs. \
         Top-level directories: {}. Internal module dependencies: {}. \
         External packages: {}. Name the layers and how data flows between them. \
         Plain prose, no headings.",
        ctx.meta.name,
        files_by_directory(&ctx.graph.files)
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        if edges.is_empty() { "none".to_string() } else { edges.join("; ") },
        joined_or_not_detected(&a.tech_stack),
    )
}

pub fn architecture(ctx: &RenderContext, narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let mut doc = Doc::new(&format!("{} Architecture", ctx.meta.name));
    doc.h2("Summary").para(&narrative_or_overview(ctx, narrative));

    doc.h2("Components");
    let rows: Vec<Vec<String>> = files_by_directory(&ctx.graph.files)
        .into_iter()
        .map(|(dir, files)| {
            let code = files.iter().filter(|f| f.kind.is_code()).count();
            vec![code_span(&dir), files.len().to_string(), code.to_string()]
        })
        .collect();
    doc.table(&["Directory", "Files", "Code files"], &rows, NO_FILES);

    doc.h2("Key Modules");
    let rows: Vec<Vec<String>> = a
        .key_modules
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            vec![
                (idx + 1).to_string(),
                code_span(&m.name),
                m.kind.clone(),
                code_span(&m.file),
                m.degree.to_string(),
            ]
        })
        .collect();
    doc.table(&["Rank", "Name", "Kind", "File", "Connections"], &rows, NO_KEY_MODULES);

    doc.h2("Module Dependencies").bullets(
        a.internal_deps
            .iter()
            .map(|(from, to)| format!("{} -> {}", code_span(from), code_span(to))),
        NO_INTERNAL_DEPS,
    );

    doc.h2("Data Layer");
    let rows: Vec<Vec<String>> = a
        .data_objects
        .iter()
        .map(|o| {
            vec![
                code_span(&o.name),
                o.kind.clone(),
                code_span(&o.file),
                o.columns.clone().unwrap_or_default(),
            ]
        })
        .collect();
    doc.table(&["Object", "Kind", "Defined in", "Columns"], &rows, NO_DATA_OBJECTS);

    doc.h2("Documentation").bullets(
        a.documents.iter().map(|d| match &d.title {
            Some(title) => format!("{} - {title}", code_span(&d.file)),
            None => code_span(&d.file),
        }),
        NO_DOCUMENTS,
    );

    doc.h2("Circular Dependencies")
        .bullets(a.cycles.iter().map(|c| c.join(" -> ")), NO_CYCLES);
    Ok(doc.finish())
}

// ---------------------------------------------------------------------------
// API_REFERENCE.md
// ---------------------------------------------------------------------------

pub fn api_reference(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let mut doc = Doc::new(&format!("{} API Reference", ctx.meta.name));

    if a.public_api.is_empty() {
        doc.para(NO_PUBLIC_API);
        return Ok(doc.finish());
    }

    doc.para(&format!(
        "{} public functions and classes across {} files.",
        a.public_api.len(),
        a.public_api
            .iter()
            .map(|i| i.file.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    ));

    let mut by_file: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for item in &a.public_api {
        by_file.entry(item.file.as_str()).or_default().push(item);
    }
    for (file, items) in by_file {
        doc.h2(&code_span(file));
        let rows: Vec<Vec<String>> = items
            .iter()
            .map(|i| {
                vec![
                    code_span(&i.name),
                    i.kind.clone(),
                    i.line.clone().unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();
        doc.table(&["Name", "Kind", "Line"], &rows, NO_PUBLIC_API);
    }
    Ok(doc.finish())
}

// ---------------------------------------------------------------------------
// TESTING_GUIDE.md
// ---------------------------------------------------------------------------

pub fn test_guide(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let t = &ctx.analysis.tests;
    let mut doc = Doc::new(&format!("Testing Guide for {}", ctx.meta.name));

    doc.field("Frameworks", &joined_or_not_detected(&t.frameworks))
        .field("Tests", &t.count.to_string())
        .field("Test files", &t.files.len().to_string())
        .field("Code files", &t.code_files.to_string())
        .end_fields();

    doc.h2("Running Tests");
    let commands: Vec<&str> = t.frameworks.iter().filter_map(|f| test_command(f)).collect();
    if commands.is_empty() {
        doc.para(NO_TESTS);
    } else {
        doc.code("bash", &commands.join("\n"));
    }

    doc.h2("Test Files")
        .bullets(t.files.iter().map(|f| code_span(f)), NO_TESTS);

    doc.h2("Coverage Gaps");
    let tested_dirs: Vec<String> = t.files.iter().map(|f| top_dir(f)).collect();
    let untested: Vec<String> = ctx
        .analysis
        .key_modules
        .iter()
        .filter(|m| m.kind == kinds::MODULE)
        .filter(|m| !tested_dirs.contains(&top_dir(&m.file)) && !t.files.contains(&m.file))
        .map(|m| format!("{} has no tests in its directory", code_span(&m.name)))
        .collect();
    if t.count == 0 {
        doc.para(NO_TESTS);
    } else {
        doc.bullets(untested, "_Every key module has tests nearby._");
    }

    doc.h2("Writing Tests").bullets(
        [
            "Place new tests next to the existing test files listed above.",
            "Name tests after the behaviour they check.",
            "Cover error paths as well as the happy path.",
        ],
        "",
    );
    Ok(doc.finish())
}

fn top_dir(path: &str) -> String {
    path.split_once('/')
        .map(|(top, _)| top.to_string())
        .unwrap_or_else(|| ".".to_string())
}

// ---------------------------------------------------------------------------
// .claude/context/patterns.md
// ---------------------------------------------------------------------------

pub fn patterns(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let graph = &ctx.graph;
    let mut doc = Doc::new(&format!("Code Patterns in {}", ctx.meta.name));

    doc.h2("Naming");
    let functions: Vec<&str> = graph
        .entities_of_kind(kinds::FUNCTION)
        .map(|e| e.name.rsplit('.').next().unwrap_or(&e.name))
        .collect();
    if functions.is_empty() {
        doc.para(&format!("Function naming: {NOT_DETECTED}"));
    } else {
        let snake = functions.iter().filter(|n| is_snake_case(n)).count();
        let camel = functions.iter().filter(|n| is_camel_case(n)).count();
        let style = if snake >= camel { "snake_case" } else { "camelCase" };
        doc.para(&format!(
            "Functions use {style} ({} of {} follow it).",
            snake.max(camel),
            functions.len()
        ));
    }
    let classes = graph.entities_of_kind(kinds::CLASS).count();
    if classes > 0 {
        doc.para(&format!("{classes} classes are defined; class names use PascalCase."));
    }

    doc.h2("Module Organization");
    let rows: Vec<Vec<String>> = a
        .languages
        .iter()
        .map(|(kind, count)| vec![kind.as_str().to_string(), count.to_string()])
        .collect();
    doc.table(&["Kind", "Files"], &rows, NO_FILES);

    doc.h2("Imports");
    let imports = graph.entities_of_kind(kinds::IMPORT).count();
    if imports == 0 {
        doc.para("_No imports found._");
    } else {
        doc.para(&format!(
            "{imports} import statements: {} resolve to modules in this repository, {} external packages are used.",
            a.internal_deps.len(),
            a.external_deps.len()
        ));
    }

    doc.h2("Conventions to Follow").bullets(
        conventions(a.primary_language.as_deref()),
        "",
    );
    Ok(doc.finish())
}

fn is_snake_case(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_camel_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && !name.contains('_')
        && name.chars().any(|c| c.is_ascii_uppercase())
}

fn conventions(language: Option<&str>) -> Vec<&'static str> {
    match language {
        Some("python") | Some("notebook") => vec![
            "Follow PEP 8 formatting.",
            "Keep module-level side effects behind `if __name__ == \"__main__\":`.",
            "Prefer explicit imports over wildcard imports.",
        ],
        Some("javascript") | Some("typescript") => vec![
            "Use ES module `import`/`export` syntax.",
            "Export only what other modules need.",
            "Keep components and utilities in separate files.",
        ],
        Some("sql") => vec![
            "Keep one object definition per statement.",
            "Name tables in snake_case.",
        ],
        _ => vec!["Match the style of surrounding files."],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analysis::tests::sample_graph;
    use crate::spec::RepoMetadata;
    use repoctx_shared::RepositoryGraph;

    fn ctx(graph: RepositoryGraph) -> RenderContext {
        RenderContext::new(
            Arc::new(graph),
            RepoMetadata {
                name: "sample".into(),
                ..Default::default()
            },
            10,
        )
    }

    #[test]
    fn architecture_sections() {
        let out = architecture(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("| `app` | 2 | 2 |"));
        assert!(out.contains("| 1 | `app.db` | module | `app/db.py` | 5 |"));
        assert!(out.contains("- `app.main` -> `app.db`"));
        assert!(out.contains("| `users` | table | `db/schema.sql` | id, email |"));
        assert!(out.contains(NO_DOCUMENTS));
    }

    #[test]
    fn api_reference_groups_by_file() {
        let out = api_reference(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("## `app/db.py`"));
        assert!(out.contains("| `connect` | function | 4 |"));
        assert!(!out.contains("_pool"));

        let empty = api_reference(&ctx(RepositoryGraph::empty("x")), None).unwrap();
        assert!(empty.contains(NO_PUBLIC_API));
    }

    #[test]
    fn test_guide_reports_frameworks_and_gaps() {
        let out = test_guide(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("**Frameworks:** pytest"));
        assert!(out.contains("```bash\npytest\n```"));
        assert!(out.contains("- `tests/test_db.py`"));
        assert!(out.contains("`app.db` has no tests in its directory"));
    }

    #[test]
    fn patterns_detect_naming() {
        let out = patterns(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("Functions use snake_case (2 of 2 follow it)."));
        assert!(out.contains("Follow PEP 8 formatting."));
        assert!(out.contains("3 import statements: 1 resolve"));
    }

    #[test]
    fn empty_graph_placeholders() {
        let c = ctx(RepositoryGraph::empty("x"));
        let arch = architecture(&c, None).unwrap();
        assert!(arch.contains(NO_FILES));
        assert!(arch.contains(NO_KEY_MODULES));
        assert!(arch.contains(NO_INTERNAL_DEPS));
        assert!(test_guide(&c, None).unwrap().contains(NO_TESTS));
        assert!(patterns(&c, None).unwrap().contains("Match the style of surrounding files."));
    }

    #[test]
    fn naming_classifiers() {
        assert!(is_snake_case("load_config"));
        assert!(!is_snake_case("loadConfig"));
        assert!(is_camel_case("loadConfig"));
        assert!(!is_camel_case("load"));
    }
}
