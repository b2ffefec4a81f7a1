//! Critical-tier templates: the files an assistant reads first.

use repoctx_shared::ArtifactError;

use super::{
    Doc, NO_CYCLES, NO_ENTRY_POINTS, NO_EXTRACTION_ERRORS, NO_FILES, NO_ISSUES, NO_KEY_MODULES,
    NO_TECH_STACK, NOT_DETECTED, code_span, files_by_directory, joined_or_not_detected,
    narrative_or_overview, test_command,
};
use crate::spec::RenderContext;

/// Known issues listed in `CLAUDE.md` before pointing at the full list.
const ISSUE_PREVIEW: usize = 5;

/// Modules named in the "tricky parts" section of the gotchas file.
const TRICKY_MODULES: usize = 3;

/// Companion files linked from `CLAUDE.md` when they are generated.
const RELATED_FILES: &[(&str, &str)] = &[
    ("Rules", ".clinerules"),
    ("Gotchas", ".claude/context/gotchas.md"),
    ("Patterns", ".claude/context/patterns.md"),
    ("Agent workflow", "AGENT_INSTRUCTIONS.md"),
    ("Architecture", "ARCHITECTURE.md"),
    ("API reference", "API_REFERENCE.md"),
    ("Testing", "TESTING_GUIDE.md"),
];

// ---------------------------------------------------------------------------
// CLAUDE.md
// ---------------------------------------------------------------------------

pub fn primary_context_prompt(ctx: &RenderContext) -> String {
    let a = &ctx.analysis;
    let modules: Vec<&str> = a.key_modules.iter().map(|m| m.name.as_str()).collect();
    format!(
        "Write a two-paragraph overview of the repository '{}'. \
         Primary language: {}. Frameworks: {}. External packages: {}. \
         Most connected modules: {}. Entry points: {}. \
         Describe what the code most likely does and how it is organised. \
         Plain prose, no headings, no lists.",
        ctx.meta.name,
        a.primary_language.as_deref().unwrap_or("unknown"),
        joined_or_not_detected(&a.frameworks),
        joined_or_not_detected(&a.tech_stack),
        if modules.is_empty() { "none".to_string() } else { modules.join(", ") },
        if a.entry_points.is_empty() { "none".to_string() } else { a.entry_points.join(", ") },
    )
}

pub fn primary_context(ctx: &RenderContext, narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let mut doc = Doc::new(&format!("{} - Project Context", ctx.meta.name));
    doc.field(
        "Primary Language",
        a.primary_language.as_deref().unwrap_or(NOT_DETECTED),
    )
    .field("Framework", &joined_or_not_detected(&a.frameworks))
    .end_fields();

    doc.h2("Overview").para(&narrative_or_overview(ctx, narrative));

    doc.h2("Quick Start");
    doc.h3("Main Entry Points")
        .bullets(a.entry_points.iter().map(|e| code_span(e)), NO_ENTRY_POINTS);
    doc.h3("Key Modules").bullets(
        a.key_modules.iter().map(|m| {
            format!("**{}** ({}) in {} - {} connections", m.name, m.kind, code_span(&m.file), m.degree)
        }),
        NO_KEY_MODULES,
    );
    doc.h3("Tech Stack").bullets(
        a.external_deps
            .iter()
            .map(|d| format!("{} (imported by {} files)", code_span(&d.name), d.used_by)),
        NO_TECH_STACK,
    );

    doc.h2("Known Issues").bullets(
        a.issues
            .iter()
            .take(ISSUE_PREVIEW)
            .map(|i| format!("**{}** {}:{} - {}", i.tag, code_span(&i.file), i.line, i.text)),
        NO_ISSUES,
    );
    if a.issues.len() > ISSUE_PREVIEW {
        doc.para(&format!(
            "{} more in `.claude/context/gotchas.md`.",
            a.issues.len() - ISSUE_PREVIEW
        ));
    }

    let related: Vec<String> = RELATED_FILES
        .iter()
        .filter(|(_, file)| ctx.publishes(file))
        .map(|(label, file)| format!("{label}: {}", code_span(file)))
        .collect();
    if !related.is_empty() {
        doc.h2("Related Files").bullets(related, "");
    }
    Ok(doc.finish())
}

// ---------------------------------------------------------------------------
// .clinerules
// ---------------------------------------------------------------------------

/// YAML-formatted coding rules.
pub fn rules(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let language = a.primary_language.as_deref().unwrap_or("unknown");
    let naming = naming_for(language);

    let mut out = String::new();
    out.push_str(&format!("# Coding rules for {}\n", ctx.meta.name));
    out.push_str(&format!("language: {}\n", yaml_str(language)));
    out.push_str(&format!(
        "framework: {}\n",
        a.frameworks.first().map(|f| yaml_str(f)).unwrap_or_else(|| "null".to_string())
    ));

    out.push_str("naming:\n");
    for (item, style) in naming {
        out.push_str(&format!("  {item}: {style}\n"));
    }

    out.push_str("imports:\n  order: [stdlib, third_party, local]\n");
    yaml_list(&mut out, "  preferred", &a.tech_stack);

    out.push_str("testing:\n");
    out.push_str(&format!(
        "  framework: {}\n",
        a.tests.frameworks.first().map(|f| yaml_str(f)).unwrap_or_else(|| "null".to_string())
    ));
    out.push_str(&format!("  test_files: {}\n", a.tests.files.len()));
    out.push_str("  required_for: [new features, bug fixes]\n");

    out.push_str("documentation:\n  required_for: [public functions, classes]\n");

    let hotspots: Vec<String> = a.key_modules.iter().take(TRICKY_MODULES).map(|m| m.file.clone()).collect();
    yaml_list(&mut out, "review_carefully", &dedup(hotspots));
    Ok(out)
}

fn naming_for(language: &str) -> [(&'static str, &'static str); 3] {
    match language {
        "javascript" | "typescript" => [
            ("functions", "camelCase"),
            ("classes", "PascalCase"),
            ("constants", "UPPER_SNAKE_CASE"),
        ],
        _ => [
            ("functions", "snake_case"),
            ("classes", "PascalCase"),
            ("constants", "UPPER_SNAKE_CASE"),
        ],
    }
}

fn yaml_str(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn yaml_list(out: &mut String, key: &str, items: &[String]) {
    if items.is_empty() {
        out.push_str(&format!("{key}: []\n"));
        return;
    }
    out.push_str(&format!("{key}:\n"));
    let indent = " ".repeat(key.len() - key.trim_start().len());
    for item in items {
        out.push_str(&format!("{indent}  - {}\n", yaml_str(item)));
    }
}

fn dedup(mut items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.retain(|i| seen.insert(i.clone()));
    items
}

// ---------------------------------------------------------------------------
// .claude/context/gotchas.md
// ---------------------------------------------------------------------------

pub fn known_issues(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let mut doc = Doc::new(&format!("Common Gotchas for {}", ctx.meta.name));

    doc.h2("Known Issues");
    if a.issues.is_empty() {
        doc.para(NO_ISSUES);
    } else {
        let mut tags: Vec<&str> = a.issues.iter().map(|i| i.tag.as_str()).collect();
        tags.sort_unstable();
        tags.dedup();
        for tag in tags {
            let matching: Vec<_> = a.issues.iter().filter(|i| i.tag == tag).collect();
            doc.h3(&format!("{tag} ({})", matching.len())).bullets(
                matching
                    .iter()
                    .map(|i| format!("{}:{} - {}", code_span(&i.file), i.line, i.text)),
                "",
            );
        }
    }

    doc.h2("Circular Dependencies").bullets(
        a.cycles.iter().map(|members| members.join(" -> ")),
        NO_CYCLES,
    );

    doc.h2("Tricky Parts of the Codebase").bullets(
        a.key_modules.iter().take(TRICKY_MODULES).map(|m| {
            format!(
                "{} in {} has {} connections; changes here ripple widely.",
                code_span(&m.name),
                code_span(&m.file),
                m.degree
            )
        }),
        NO_KEY_MODULES,
    );

    doc.h2("Files That Could Not Be Analyzed").bullets(
        ctx.meta
            .extraction_errors
            .iter()
            .map(|e| format!("{} - {}", code_span(&e.path), e.cause)),
        NO_EXTRACTION_ERRORS,
    );
    Ok(doc.finish())
}

// ---------------------------------------------------------------------------
// AGENT_INSTRUCTIONS.md
// ---------------------------------------------------------------------------

pub fn agent_instructions(ctx: &RenderContext, _narrative: Option<&str>) -> Result<String, ArtifactError> {
    let a = &ctx.analysis;
    let mut doc = Doc::new(&format!("Agent Instructions for {}", ctx.meta.name));

    let steps: Vec<&str> = [
        ("CLAUDE.md", "Read `CLAUDE.md` for the project overview."),
        (".clinerules", "Follow the rules in `.clinerules`."),
        (".claude/context/gotchas.md", "Check `.claude/context/gotchas.md` before touching a key module."),
        (".claude/context/patterns.md", "Match the conventions in `.claude/context/patterns.md`."),
    ]
    .into_iter()
    .filter(|(file, _)| ctx.publishes(file))
    .map(|(_, step)| step)
    .collect();
    if !steps.is_empty() {
        doc.h2("Before You Start").numbered(&steps);
    }

    doc.h2("Where Things Live");
    let rows: Vec<Vec<String>> = files_by_directory(&ctx.graph.files)
        .into_iter()
        .map(|(dir, files)| {
            let mut kinds: Vec<&str> = files.iter().map(|f| f.kind.as_str()).collect();
            kinds.sort_unstable();
            kinds.dedup();
            vec![code_span(&dir), files.len().to_string(), kinds.join(", ")]
        })
        .collect();
    doc.table(&["Directory", "Files", "Kinds"], &rows, NO_FILES);

    doc.h2("Entry Points")
        .bullets(a.entry_points.iter().map(|e| code_span(e)), NO_ENTRY_POINTS);

    doc.h2("Verifying Changes");
    let commands: Vec<&str> = a.tests.frameworks.iter().filter_map(|f| test_command(f)).collect();
    if commands.is_empty() {
        doc.para("_No test runner detected. Add tests alongside any change._");
    } else {
        doc.code("bash", &commands.join("\n"));
    }

    let mut working_rules = vec![
        "Keep changes small and scoped to one concern.",
        "Add or update tests for every behavioural change.",
    ];
    if ctx.publishes("API_REFERENCE.md") {
        working_rules.push("Update `API_REFERENCE.md` when public functions change.");
    }
    doc.h2("Working Rules").bullets(working_rules, "");
    Ok(doc.finish())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analysis::tests::sample_graph;
    use crate::spec::RepoMetadata;
    use repoctx_shared::{ExtractionError, RepositoryGraph};

    fn ctx(graph: RepositoryGraph) -> RenderContext {
        RenderContext::new(
            Arc::new(graph),
            RepoMetadata {
                repo_id: "sample".into(),
                name: "sample".into(),
                extraction_errors: vec![ExtractionError {
                    path: "nb/broken.ipynb".into(),
                    cause: "invalid notebook JSON".into(),
                }],
                ..Default::default()
            },
            10,
        )
    }

    #[test]
    fn primary_context_lists_facts() {
        let out = primary_context(&ctx(sample_graph()), None).unwrap();
        assert!(out.starts_with("# sample - Project Context\n"));
        assert!(out.contains("**Primary Language:** python"));
        assert!(out.contains("**Framework:** Flask, pytest"));
        assert!(out.contains("- `app/main.py`"));
        assert!(out.contains("**app.db** (module)"));
        assert!(out.contains("pool sizing"));
    }

    #[test]
    fn narrative_replaces_overview() {
        let out = primary_context(&ctx(sample_graph()), Some("A tiny Flask service.")).unwrap();
        assert!(out.contains("## Overview\n\nA tiny Flask service.\n"));

        let fallback = primary_context(&ctx(sample_graph()), Some("   ")).unwrap();
        assert!(fallback.contains("is a python repository"));
    }

    #[test]
    fn empty_graph_renders_placeholders() {
        let c = ctx(RepositoryGraph::empty("sample"));
        let out = primary_context(&c, None).unwrap();
        assert!(out.contains(NO_ENTRY_POINTS));
        assert!(out.contains(NO_KEY_MODULES));
        assert!(out.contains(NOT_DETECTED));

        let gotchas = known_issues(&c, None).unwrap();
        assert!(gotchas.contains(NO_ISSUES));
        assert!(gotchas.contains(NO_CYCLES));

        let agent = agent_instructions(&c, None).unwrap();
        assert!(agent.contains(NO_FILES));
    }

    #[test]
    fn rules_are_yaml_shaped() {
        let out = rules(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("language: \"python\"\n"));
        assert!(out.contains("framework: \"Flask\"\n"));
        assert!(out.contains("  functions: snake_case\n"));
        assert!(out.contains("  preferred:\n    - \"flask\"\n"));
        assert!(out.contains("  framework: \"pytest\"\n"));

        let empty = rules(&ctx(RepositoryGraph::empty("x")), None).unwrap();
        assert!(empty.contains("framework: null\n"));
        assert!(empty.contains("  preferred: []\n"));
    }

    #[test]
    fn gotchas_group_issues_and_list_failures() {
        let out = known_issues(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("### TODO (1)"));
        assert!(out.contains("`app/db.py`:9 - pool sizing"));
        assert!(out.contains("`nb/broken.ipynb` - invalid notebook JSON"));
    }

    #[test]
    fn agent_instructions_show_test_command() {
        let out = agent_instructions(&ctx(sample_graph()), None).unwrap();
        assert!(out.contains("```bash\npytest\n```"));
        assert!(out.contains("| `app` | 2 | python |"));
    }

    #[test]
    fn cross_references_only_generated_files() {
        let mut c = ctx(sample_graph());
        c.meta.artifact_files = ["CLAUDE.md", ".clinerules", ".claude/context/gotchas.md", "AGENT_INSTRUCTIONS.md"]
            .map(String::from)
            .to_vec();

        let primary = primary_context(&c, None).unwrap();
        assert!(primary.contains("## Related Files"));
        assert!(primary.contains("- Rules: `.clinerules`"));
        assert!(!primary.contains("ARCHITECTURE.md"));
        assert!(!primary.contains("TESTING_GUIDE.md"));
        assert!(!primary.contains("patterns.md"));

        let agent = agent_instructions(&c, None).unwrap();
        assert!(agent.contains("1. Read `CLAUDE.md`"));
        assert!(!agent.contains("patterns.md"));
        assert!(!agent.contains("API_REFERENCE.md"));

        c.meta.artifact_files.push("API_REFERENCE.md".into());
        let agent = agent_instructions(&c, None).unwrap();
        assert!(agent.contains("Update `API_REFERENCE.md`"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = primary_context(&ctx(sample_graph()), None).unwrap();
        let b = primary_context(&ctx(sample_graph()), None).unwrap();
        assert_eq!(a, b);
    }
}
