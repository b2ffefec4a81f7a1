//! Knowledge graph assembler.
//!
//! Merges per-file fragments into one [`RepositoryGraph`]: entity dedup,
//! relationship validation, import resolution, degree ranking and cycle
//! detection. Pure and deterministic for a given fragment order.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use repoctx_shared::{
    Entity, EntityId, EntityRef, Fragment, GraphWarning, RawEntity, Relationship, RepoCtxError,
    RepositoryGraph, Result, SourceFile, kinds, rel,
};

/// Relationship types that take part in cycle detection. Document links
/// commonly point both ways and are left out.
const CYCLE_EDGE_TYPES: &[&str] = &[rel::CONTAINS, rel::IMPORTS, rel::RESOLVES_TO, rel::READS];

#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
    /// Cycle warnings kept before a single truncation warning is emitted.
    pub max_cycle_warnings: usize,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            max_cycle_warnings: 25,
        }
    }
}

/// Assemble on the blocking pool; graph construction is CPU-bound.
pub async fn assemble_graph(
    repo_id: &str,
    files: Vec<SourceFile>,
    fragments: Vec<Fragment>,
    opts: AssembleOptions,
) -> Result<RepositoryGraph> {
    let id = repo_id.to_string();
    tokio::task::spawn_blocking(move || assemble(&id, files, fragments, opts))
        .await
        .map_err(|e| RepoCtxError::repo_fatal(repo_id, format!("graph assembly failed: {e}")))
}

#[instrument(skip_all, fields(repo = %repo_id, fragments = fragments.len()))]
pub fn assemble(
    repo_id: &str,
    files: Vec<SourceFile>,
    fragments: Vec<Fragment>,
    opts: AssembleOptions,
) -> RepositoryGraph {
    let mut builder = GraphBuilder::default();

    for fragment in &fragments {
        for raw in &fragment.entities {
            builder.add_entity(raw);
        }
    }
    // Entities first, so edges may point into files merged later.
    for fragment in fragments {
        for raw in fragment.relationships {
            builder.add_relationship(&raw.from, &raw.to, raw.rel_type);
        }
    }
    builder.resolve_imports();

    let GraphBuilder {
        entities,
        relationships,
        mut warnings,
        ..
    } = builder;

    let degrees = degrees(entities.len(), &relationships);
    let ranking = rank(&entities, &degrees);
    warnings.extend(find_cycles(&entities, &relationships, opts.max_cycle_warnings));

    info!(
        entities = entities.len(),
        relationships = relationships.len(),
        warnings = warnings.len(),
        "graph assembled"
    );

    RepositoryGraph {
        repo_id: repo_id.to_string(),
        files,
        entities,
        relationships,
        warnings,
        degrees,
        ranking,
    }
}

#[derive(Default)]
struct GraphBuilder {
    entities: Vec<Entity>,
    index: HashMap<EntityRef, EntityId>,
    relationships: Vec<Relationship>,
    edges: HashSet<(EntityId, EntityId, String)>,
    warnings: Vec<GraphWarning>,
}

impl GraphBuilder {
    fn add_entity(&mut self, raw: &RawEntity) {
        if let Some(&existing) = self.index.get(&raw.key) {
            let kept = &self.entities[existing.index()].attributes;
            let conflicting: Vec<String> = raw
                .attributes
                .iter()
                .filter(|(k, v)| kept.get(*k) != Some(*v))
                .map(|(k, _)| k.clone())
                .collect();
            debug!(entity = %raw.key, ?conflicting, "duplicate entity dropped");
            self.warnings.push(GraphWarning::DuplicateEntity {
                entity: raw.key.clone(),
                conflicting_attributes: conflicting,
            });
            return;
        }

        let id = EntityId(self.entities.len() as u32);
        self.index.insert(raw.key.clone(), id);
        self.entities.push(Entity {
            id,
            file: raw.key.file.clone(),
            name: raw.key.name.clone(),
            kind: raw.key.kind.clone(),
            attributes: raw.attributes.clone(),
        });
    }

    fn add_relationship(&mut self, from: &EntityRef, to: &EntityRef, rel_type: String) {
        let (Some(&from_id), Some(&to_id)) = (self.index.get(from), self.index.get(to)) else {
            debug!(%from, %to, %rel_type, "dangling relationship dropped");
            self.warnings.push(GraphWarning::DanglingRelationship {
                from: from.clone(),
                to: to.clone(),
                rel_type,
            });
            return;
        };
        self.push_edge(from_id, to_id, rel_type);
    }

    /// Add an edge unless an identical one exists.
    fn push_edge(&mut self, from: EntityId, to: EntityId, rel_type: String) {
        if !self.edges.insert((from, to, rel_type.clone())) {
            return;
        }
        self.relationships.push(Relationship {
            from,
            to,
            rel_type,
            directed: true,
        });
    }

    /// Link import entities to the module they name: an exact name match,
    /// else a single module whose name ends with `.name` or `/name`.
    fn resolve_imports(&mut self) {
        let modules: Vec<(EntityId, String, String)> = self
            .entities
            .iter()
            .filter(|e| e.kind == kinds::MODULE)
            .map(|e| (e.id, e.name.clone(), e.file.clone()))
            .collect();
        if modules.is_empty() {
            return;
        }

        let imports: Vec<(EntityId, String, String)> = self
            .entities
            .iter()
            .filter(|e| e.kind == kinds::IMPORT)
            .map(|e| (e.id, e.name.clone(), e.file.clone()))
            .collect();

        for (import_id, name, file) in imports {
            let candidates = || modules.iter().filter(|(_, _, f)| *f != file);
            let target = candidates().find(|(_, m, _)| *m == name).map(|(id, _, _)| *id).or_else(|| {
                let dotted = format!(".{name}");
                let slashed = format!("/{name}");
                let mut suffix = candidates().filter(|(_, m, _)| m.ends_with(&dotted) || m.ends_with(&slashed));
                match (suffix.next(), suffix.next()) {
                    (Some((id, _, _)), None) => Some(*id),
                    _ => None,
                }
            });
            if let Some(module_id) = target {
                self.push_edge(import_id, module_id, rel::RESOLVES_TO.to_string());
            }
        }
    }
}

/// Undirected degree per entity.
fn degrees(count: usize, relationships: &[Relationship]) -> Vec<u32> {
    let mut degrees = vec![0u32; count];
    for r in relationships {
        degrees[r.from.index()] += 1;
        degrees[r.to.index()] += 1;
    }
    degrees
}

/// Degree descending, then file path ascending, then first-seen order.
fn rank(entities: &[Entity], degrees: &[u32]) -> Vec<EntityId> {
    let mut ranking: Vec<EntityId> = entities.iter().map(|e| e.id).collect();
    ranking.sort_by(|a, b| {
        degrees[b.index()]
            .cmp(&degrees[a.index()])
            .then_with(|| entities[a.index()].file.cmp(&entities[b.index()].file))
            .then_with(|| a.cmp(b))
    });
    ranking
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative DFS over index adjacency lists. Every back-edge closes one
/// cycle, reported as the stack slice from the back-edge target.
fn find_cycles(entities: &[Entity], relationships: &[Relationship], max: usize) -> Vec<GraphWarning> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); entities.len()];
    for r in relationships {
        if CYCLE_EDGE_TYPES.contains(&r.rel_type.as_str()) {
            adjacency[r.from.index()].push(r.to.index());
        }
    }

    let mut color = vec![Color::White; entities.len()];
    let mut position = vec![usize::MAX; entities.len()];
    let mut warnings = Vec::new();
    let mut omitted = 0usize;

    for start in 0..entities.len() {
        if color[start] != Color::White {
            continue;
        }
        // (node, next adjacency index)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        let mut path: Vec<usize> = vec![start];
        color[start] = Color::Gray;
        position[start] = 0;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if let Some(&target) = adjacency[node].get(frame.1) {
                frame.1 += 1;
                match color[target] {
                    Color::White => {
                        color[target] = Color::Gray;
                        position[target] = path.len();
                        path.push(target);
                        stack.push((target, 0));
                    }
                    Color::Gray => {
                        if warnings.len() < max {
                            warnings.push(cycle_warning(entities, &path[position[target]..]));
                        } else {
                            omitted += 1;
                        }
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
                path.pop();
            }
        }
    }

    if omitted > 0 {
        warnings.push(GraphWarning::CyclesTruncated { omitted });
    }
    warnings
}

/// Members as `file::name`. Import entities only stand for an edge and are
/// left out unless nothing else remains.
fn cycle_warning(entities: &[Entity], members: &[usize]) -> GraphWarning {
    let label = |i: &usize| format!("{}::{}", entities[*i].file, entities[*i].name);
    let mut names: Vec<String> = members
        .iter()
        .filter(|i| entities[**i].kind != kinds::IMPORT)
        .map(label)
        .collect();
    if names.is_empty() {
        names = members.iter().map(label).collect();
    }
    GraphWarning::Cycle { entities: names }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repoctx_shared::FileKind;

    fn file(path: &str) -> SourceFile {
        SourceFile {
            path: path.into(),
            kind: FileKind::from_path(std::path::Path::new(path)).unwrap_or(FileKind::Python),
        }
    }

    fn module(path: &str, name: &str) -> (Fragment, EntityRef) {
        let mut frag = Fragment::new(path);
        let m = frag.entity(name, kinds::MODULE);
        (frag, m)
    }

    fn import(frag: &mut Fragment, owner: &EntityRef, name: &str) {
        let i = frag.entity(name, kinds::IMPORT);
        frag.relate(owner, &i, rel::IMPORTS);
    }

    #[test]
    fn dedup_keeps_first_and_lists_conflicts() {
        let mut frag = Fragment::new("a.py");
        frag.entity_with("run", kinds::FUNCTION, [("line", "1"), ("public", "true")]);
        frag.entity_with("run", kinds::FUNCTION, [("line", "9"), ("public", "true")]);
        frag.entity_with("run", kinds::CLASS, [("line", "12")]);

        let graph = assemble("r", vec![file("a.py")], vec![frag], AssembleOptions::default());
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.entities[0].attr("line"), Some("1"));
        assert_eq!(
            graph.warnings,
            vec![GraphWarning::DuplicateEntity {
                entity: EntityRef::new("a.py", "run", kinds::FUNCTION),
                conflicting_attributes: vec!["line".into()],
            }]
        );
    }

    #[test]
    fn dangling_dropped_and_duplicate_edges_collapsed() {
        let (mut frag, m) = module("a.py", "a");
        let f = frag.entity("f", kinds::FUNCTION);
        frag.relate(&m, &f, rel::CONTAINS);
        frag.relate(&m, &f, rel::CONTAINS);
        frag.relate(&m, &EntityRef::new("zz.py", "ghost", kinds::MODULE), rel::READS);

        let graph = assemble("r", vec![file("a.py")], vec![frag], AssembleOptions::default());
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.warnings.len(), 1);
        assert!(matches!(graph.warnings[0], GraphWarning::DanglingRelationship { .. }));
    }

    #[test]
    fn cross_file_edges_resolve_regardless_of_order() {
        let mut doc = Fragment::new("README.md");
        let d = doc.entity("README.md", kinds::DOCUMENT);
        doc.relate(&d, &EntityRef::new("docs/x.md", "docs/x.md", kinds::DOCUMENT), rel::LINKS_TO);
        let mut other = Fragment::new("docs/x.md");
        other.entity("docs/x.md", kinds::DOCUMENT);

        let graph = assemble(
            "r",
            vec![file("README.md"), file("docs/x.md")],
            vec![doc, other],
            AssembleOptions::default(),
        );
        assert_eq!(graph.relationships.len(), 1);
        assert!(graph.warnings.is_empty());
    }

    #[test]
    fn imports_resolve_exact_and_suffix() {
        let (mut main, m) = module("app/main.py", "app.main");
        import(&mut main, &m, "app.db");
        import(&mut main, &m, "utils");
        import(&mut main, &m, "requests");
        let (db, _) = module("app/db.py", "app.db");
        let (utils, _) = module("lib/pkg/utils.py", "pkg.utils");

        let graph = assemble(
            "r",
            vec![file("app/main.py"), file("app/db.py"), file("lib/pkg/utils.py")],
            vec![main, db, utils],
            AssembleOptions::default(),
        );
        let resolved: Vec<(String, String)> = graph
            .relationships_of_type(rel::RESOLVES_TO)
            .map(|r| {
                (
                    graph.entities[r.from.index()].name.clone(),
                    graph.entities[r.to.index()].name.clone(),
                )
            })
            .collect();
        assert_eq!(
            resolved,
            vec![
                ("app.db".to_string(), "app.db".to_string()),
                ("utils".to_string(), "pkg.utils".to_string()),
            ]
        );
    }

    #[test]
    fn ranking_breaks_ties_by_file_then_first_seen() {
        let (mut b, bm) = module("b.py", "b");
        let bf = b.entity("f", kinds::FUNCTION);
        b.relate(&bm, &bf, rel::CONTAINS);
        let (mut a, am) = module("a.py", "a");
        let af = a.entity("f", kinds::FUNCTION);
        a.relate(&am, &af, rel::CONTAINS);
        let (lonely, _) = module("c.py", "c");

        let graph = assemble(
            "r",
            vec![file("a.py"), file("b.py"), file("c.py")],
            vec![b, a, lonely],
            AssembleOptions::default(),
        );
        let order: Vec<String> = graph
            .ranking
            .iter()
            .map(|id| format!("{}::{}", graph.entities[id.index()].file, graph.entities[id.index()].name))
            .collect();
        assert_eq!(order, vec!["a.py::a", "a.py::f", "b.py::b", "b.py::f", "c.py::c"]);
        assert_eq!(graph.key_entities(10).count(), 4);
    }

    #[test]
    fn import_cycle_detected() {
        let (mut a, am) = module("a.py", "a");
        import(&mut a, &am, "b");
        let (mut b, bm) = module("b.py", "b");
        import(&mut b, &bm, "a");

        let graph = assemble("r", vec![file("a.py"), file("b.py")], vec![a, b], AssembleOptions::default());
        let cycles: Vec<&[String]> = graph.cycles().collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], ["a.py::a".to_string(), "b.py::b".to_string()]);
    }

    #[test]
    fn cycle_warnings_are_capped() {
        let mut fragments = Vec::new();
        let mut files = Vec::new();
        for i in 0..4 {
            let (x, y) = (format!("x{i}.py"), format!("y{i}.py"));
            let (mut fx, mx) = module(&x, &format!("x{i}"));
            import(&mut fx, &mx, &format!("y{i}"));
            let (mut fy, my) = module(&y, &format!("y{i}"));
            import(&mut fy, &my, &format!("x{i}"));
            fragments.extend([fx, fy]);
            files.extend([file(&x), file(&y)]);
        }

        let graph = assemble("r", files, fragments, AssembleOptions { max_cycle_warnings: 2 });
        assert_eq!(graph.cycles().count(), 2);
        assert_eq!(
            graph.warnings.last(),
            Some(&GraphWarning::CyclesTruncated { omitted: 2 })
        );
    }

    #[test]
    fn deterministic_and_dedup_invariant() {
        let build = || {
            let (mut a, am) = module("a.py", "a");
            import(&mut a, &am, "b");
            a.entity("f", kinds::FUNCTION);
            a.entity("f", kinds::FUNCTION);
            let (b, _) = module("b.py", "b");
            assemble("r", vec![file("a.py"), file("b.py")], vec![a, b], AssembleOptions::default())
        };
        let first = build();
        assert_eq!(first, build());

        let keys: HashSet<(&str, &str, &str)> = first
            .entities
            .iter()
            .map(|e| (e.file.as_str(), e.name.as_str(), e.kind.as_str()))
            .collect();
        assert_eq!(keys.len(), first.entities.len());
    }

    #[test]
    fn empty_input_yields_empty_graph() {
        let graph = assemble("r", Vec::new(), Vec::new(), AssembleOptions::default());
        assert!(graph.is_empty());
        assert!(graph.warnings.is_empty());
    }
}
