//! Read-only views derived from a [`RepositoryGraph`].
//!
//! Computed once per repository and shared by every template, so all
//! artifacts of one run agree on the same facts.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use repoctx_shared::{Entity, EntityId, FileKind, RepositoryGraph, kinds, rel};
use serde::Serialize;

/// External import roots that identify a framework or major library.
const FRAMEWORK_INDICATORS: &[(&str, &str)] = &[
    ("django", "Django"),
    ("flask", "Flask"),
    ("fastapi", "FastAPI"),
    ("sqlalchemy", "SQLAlchemy"),
    ("pandas", "pandas"),
    ("numpy", "NumPy"),
    ("torch", "PyTorch"),
    ("tensorflow", "TensorFlow"),
    ("react", "React"),
    ("vue", "Vue"),
    ("@angular/core", "Angular"),
    ("next", "Next.js"),
    ("express", "Express"),
];

/// File names that conventionally start a program.
const ENTRY_FILE_NAMES: &[&str] = &[
    "__main__.py",
    "main.py",
    "app.py",
    "manage.py",
    "cli.py",
    "index.js",
    "index.ts",
    "main.js",
    "main.ts",
    "server.js",
    "server.ts",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyEntity {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub degree: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiItem {
    pub file: String,
    pub name: String,
    pub kind: String,
    pub line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataObject {
    pub file: String,
    pub name: String,
    pub kind: String,
    pub columns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub file: String,
    pub title: Option<String>,
    pub format: String,
    pub sections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub tag: String,
    pub text: String,
    pub file: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalDep {
    pub name: String,
    /// Number of distinct files importing it.
    pub used_by: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub count: usize,
    pub files: Vec<String>,
    pub frameworks: Vec<String>,
    pub code_files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoAnalysis {
    pub primary_language: Option<String>,
    /// File counts per kind, most common first.
    pub languages: Vec<(FileKind, usize)>,
    /// External import roots, sorted.
    pub tech_stack: Vec<String>,
    pub frameworks: Vec<String>,
    pub key_modules: Vec<KeyEntity>,
    pub entry_points: Vec<String>,
    pub public_api: Vec<ApiItem>,
    pub data_objects: Vec<DataObject>,
    pub documents: Vec<DocumentInfo>,
    pub tests: TestSummary,
    pub issues: Vec<Issue>,
    /// `(importing module, imported module)` pairs inside the repository.
    pub internal_deps: Vec<(String, String)>,
    pub external_deps: Vec<ExternalDep>,
    pub cycles: Vec<Vec<String>>,
    pub warning_count: usize,
    pub file_count: usize,
    pub entity_count: usize,
    pub relationship_count: usize,
}

impl RepoAnalysis {
    pub fn from_graph(graph: &RepositoryGraph, key_module_count: usize) -> Self {
        let languages = language_breakdown(graph);
        let primary_language = languages
            .iter()
            .find(|(kind, _)| kind.is_code())
            .map(|(kind, _)| kind.as_str().to_string());

        let (internal_deps, external_deps) = dependencies(graph);
        let tech_stack: Vec<String> = external_deps.iter().map(|d| d.name.clone()).collect();
        let tests = test_summary(graph);

        let mut frameworks: Vec<String> = FRAMEWORK_INDICATORS
            .iter()
            .filter(|(root, _)| tech_stack.iter().any(|t| t == root))
            .map(|(_, label)| label.to_string())
            .collect();
        for framework in &tests.frameworks {
            if !frameworks.contains(framework) {
                frameworks.push(framework.clone());
            }
        }

        Self {
            primary_language,
            languages,
            tech_stack,
            frameworks,
            key_modules: graph
                .key_entities(key_module_count)
                .map(|e| KeyEntity {
                    name: e.name.clone(),
                    kind: e.kind.clone(),
                    file: e.file.clone(),
                    degree: graph.degree(e.id),
                })
                .collect(),
            entry_points: entry_points(graph),
            public_api: graph
                .entities
                .iter()
                .filter(|e| e.kind == kinds::FUNCTION || e.kind == kinds::CLASS)
                .filter(|e| is_public(e))
                .map(|e| ApiItem {
                    file: e.file.clone(),
                    name: e.name.clone(),
                    kind: e.kind.clone(),
                    line: e.attr("line").map(str::to_string),
                })
                .collect(),
            data_objects: graph
                .entities
                .iter()
                .filter(|e| e.kind == kinds::TABLE || e.kind == kinds::VIEW)
                .map(|e| DataObject {
                    file: e.file.clone(),
                    name: e.name.clone(),
                    kind: e.kind.clone(),
                    columns: e.attr("columns").map(str::to_string),
                })
                .collect(),
            documents: graph
                .entities_of_kind(kinds::DOCUMENT)
                .map(|e| DocumentInfo {
                    file: e.file.clone(),
                    title: e.attr("title").map(str::to_string),
                    format: e.attr("format").unwrap_or("unknown").to_string(),
                    sections: graph
                        .targets(e.id, rel::CONTAINS)
                        .filter(|s| s.kind == kinds::SECTION)
                        .count(),
                })
                .collect(),
            tests,
            issues: issues(graph),
            internal_deps,
            external_deps,
            cycles: graph.cycles().map(<[String]>::to_vec).collect(),
            warning_count: graph.warnings.len(),
            file_count: graph.files.len(),
            entity_count: graph.entities.len(),
            relationship_count: graph.relationships.len(),
        }
    }
}

fn language_breakdown(graph: &RepositoryGraph) -> Vec<(FileKind, usize)> {
    let mut counts: BTreeMap<FileKind, usize> = BTreeMap::new();
    for file in &graph.files {
        *counts.entry(file.kind).or_default() += 1;
    }
    let mut languages: Vec<(FileKind, usize)> = counts.into_iter().collect();
    // stable sort keeps FileKind order among equal counts
    languages.sort_by(|a, b| b.1.cmp(&a.1));
    languages
}

fn is_public(entity: &Entity) -> bool {
    if let Some(exported) = entity.attr("exported") {
        return exported == "true";
    }
    if let Some(public) = entity.attr("public") {
        return public == "true";
    }
    let last = entity.name.rsplit('.').next().unwrap_or(&entity.name);
    !last.starts_with('_')
}

fn entry_points(graph: &RepositoryGraph) -> Vec<String> {
    let mut entries: BTreeSet<String> = graph
        .entities_of_kind(kinds::MODULE)
        .filter(|e| e.attr("entry_point") == Some("true"))
        .map(|e| e.file.clone())
        .collect();
    for file in &graph.files {
        let name = file.path.rsplit('/').next().unwrap_or(&file.path);
        if ENTRY_FILE_NAMES.contains(&name) {
            entries.insert(file.path.clone());
        }
    }
    entries.into_iter().collect()
}

/// Root package of an external import: `@scope/pkg`, or the first path or
/// dotted segment otherwise.
fn external_root(name: &str) -> Option<String> {
    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    if name.starts_with('@') {
        let mut parts = name.splitn(3, '/');
        let scope = parts.next()?;
        return Some(match parts.next() {
            Some(pkg) => format!("{scope}/{pkg}"),
            None => scope.to_string(),
        });
    }
    name.split(['.', '/']).next().map(str::to_string)
}

fn dependencies(graph: &RepositoryGraph) -> (Vec<(String, String)>, Vec<ExternalDep>) {
    let mut importers: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
    for r in graph.relationships_of_type(rel::IMPORTS) {
        importers.entry(r.to).or_default().push(r.from);
    }

    let mut internal: BTreeSet<(String, String)> = BTreeSet::new();
    let mut external: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for import in graph.entities_of_kind(kinds::IMPORT) {
        let users = importers.get(&import.id).map(Vec::as_slice).unwrap_or(&[]);
        match graph.targets(import.id, rel::RESOLVES_TO).next() {
            Some(module) => {
                for user in users.iter().filter_map(|id| graph.entity(*id)) {
                    if user.id != module.id {
                        internal.insert((user.name.clone(), module.name.clone()));
                    }
                }
            }
            None => {
                if let Some(root) = external_root(&import.name) {
                    external
                        .entry(root)
                        .or_default()
                        .insert(import.file.clone());
                }
            }
        }
    }

    let external = external
        .into_iter()
        .map(|(name, files)| ExternalDep {
            name,
            used_by: files.len(),
        })
        .collect();
    (internal.into_iter().collect(), external)
}

fn test_summary(graph: &RepositoryGraph) -> TestSummary {
    let mut files = BTreeSet::new();
    let mut frameworks = BTreeSet::new();
    let mut count = 0;
    for test in graph.entities_of_kind(kinds::TEST) {
        count += 1;
        files.insert(test.file.clone());
        if let Some(framework) = test.attr("framework") {
            frameworks.insert(framework.to_string());
        }
    }
    TestSummary {
        count,
        files: files.into_iter().collect(),
        frameworks: frameworks.into_iter().collect(),
        code_files: graph.files.iter().filter(|f| f.kind.is_code()).count(),
    }
}

fn issues(graph: &RepositoryGraph) -> Vec<Issue> {
    let mut issues: Vec<Issue> = graph
        .entities_of_kind(kinds::ISSUE)
        .map(|e| Issue {
            tag: e.attr("tag").unwrap_or("TODO").to_string(),
            text: e.attr("text").unwrap_or_default().to_string(),
            file: e.file.clone(),
            line: e.attr("line").and_then(|l| l.parse().ok()).unwrap_or(0),
        })
        .collect();
    issues.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
    issues
}
