//! The merged per-repository knowledge graph.
//!
//! Entities live in an arena indexed by [`EntityId`]; relationships refer to
//! entities by index only. Built by the assembler in `repoctx-core`, read by
//! the artifact templates.

use serde::{Deserialize, Serialize};

use crate::types::{Entity, EntityId, GraphSummary, GraphWarning, Relationship, SourceFile};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryGraph {
    pub repo_id: String,
    /// Recognized files, in traversal order.
    pub files: Vec<SourceFile>,
    /// Entity arena. `entities[i].id == EntityId(i)`.
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub warnings: Vec<GraphWarning>,
    /// Undirected degree per entity, indexed like `entities`.
    pub degrees: Vec<u32>,
    /// All entity ids, most important first.
    pub ranking: Vec<EntityId>,
}

impl RepositoryGraph {
    pub fn empty(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.index())
    }

    pub fn degree(&self, id: EntityId) -> u32 {
        self.degrees.get(id.index()).copied().unwrap_or(0)
    }

    /// The top `n` ranked entities that take part in at least one relationship.
    pub fn key_entities(&self, n: usize) -> impl Iterator<Item = &Entity> {
        self.ranking
            .iter()
            .filter(|id| self.degree(**id) > 0)
            .filter_map(|id| self.entity(*id))
            .take(n)
    }

    /// Entities of one kind, in arena (first-seen) order.
    pub fn entities_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Entity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    pub fn relationships_of_type<'a>(
        &'a self,
        rel_type: &'a str,
    ) -> impl Iterator<Item = &'a Relationship> {
        self.relationships
            .iter()
            .filter(move |r| r.rel_type == rel_type)
    }

    /// Targets of `id`'s outgoing relationships of one type.
    pub fn targets<'a>(
        &'a self,
        id: EntityId,
        rel_type: &'a str,
    ) -> impl Iterator<Item = &'a Entity> {
        self.relationships
            .iter()
            .filter(move |r| r.from == id && r.rel_type == rel_type)
            .filter_map(|r| self.entity(r.to))
    }

    /// Cycle warnings, each as a list of `file::name` members.
    pub fn cycles(&self) -> impl Iterator<Item = &[String]> {
        self.warnings.iter().filter_map(|w| match w {
            GraphWarning::Cycle { entities } => Some(entities.as_slice()),
            _ => None,
        })
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            files: self.files.len(),
            entities: self.entities.len(),
            relationships: self.relationships.len(),
            warnings: self.warnings.len(),
            cycles: self.cycles().count(),
        }
    }
}
