//! The artifact catalog and tier selection.

use std::collections::HashSet;

use repoctx_shared::{ArtifactResult, RepoCtxError, Result, Tier};

use crate::spec::ArtifactSpec;
use crate::templates::{context, reference, support};

/// Built-in specs in catalog order.
const BUILTIN: &[ArtifactSpec] = &[
    ArtifactSpec {
        id: "primary-context",
        file_name: "CLAUDE.md",
        tier: Tier::Critical,
        description: "Project overview, entry points, key modules and known issues",
        render: context::primary_context,
        narrative: Some(context::primary_context_prompt),
    },
    ArtifactSpec {
        id: "rules",
        file_name: ".clinerules",
        tier: Tier::Critical,
        description: "Coding rules: naming, imports, testing",
        render: context::rules,
        narrative: None,
    },
    ArtifactSpec {
        id: "known-issues",
        file_name: ".claude/context/gotchas.md",
        tier: Tier::Critical,
        description: "TODO/FIXME markers, cycles and fragile modules",
        render: context::known_issues,
        narrative: None,
    },
    ArtifactSpec {
        id: "agent-instructions",
        file_name: "AGENT_INSTRUCTIONS.md",
        tier: Tier::Critical,
        description: "Workflow for coding agents",
        render: context::agent_instructions,
        narrative: None,
    },
    ArtifactSpec {
        id: "architecture",
        file_name: "ARCHITECTURE.md",
        tier: Tier::High,
        description: "Components, module dependencies and data layer",
        render: reference::architecture,
        narrative: Some(reference::architecture_prompt),
    },
    ArtifactSpec {
        id: "api-reference",
        file_name: "API_REFERENCE.md",
        tier: Tier::High,
        description: "Public functions and classes by file",
        render: reference::api_reference,
        narrative: None,
    },
    ArtifactSpec {
        id: "test-guide",
        file_name: "TESTING_GUIDE.md",
        tier: Tier::High,
        description: "Test frameworks, commands and coverage gaps",
        render: reference::test_guide,
        narrative: None,
    },
    ArtifactSpec {
        id: "patterns",
        file_name: ".claude/context/patterns.md",
        tier: Tier::High,
        description: "Observed naming and organization conventions",
        render: reference::patterns,
        narrative: None,
    },
    ArtifactSpec {
        id: "dependencies",
        file_name: "DEPENDENCIES.md",
        tier: Tier::Enhancement,
        description: "External packages and internal imports",
        render: support::dependencies,
        narrative: None,
    },
    ArtifactSpec {
        id: "troubleshooting",
        file_name: "TROUBLESHOOTING.md",
        tier: Tier::Enhancement,
        description: "Analysis failures, graph warnings and common problems",
        render: support::troubleshooting,
        narrative: None,
    },
];

/// An ordered, validated set of artifact specs.
#[derive(Debug, Clone)]
pub struct Catalog {
    specs: Vec<ArtifactSpec>,
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            specs: BUILTIN.to_vec(),
        }
    }

    /// Build a catalog from custom specs. Ids and file names must be unique.
    pub fn from_specs(specs: Vec<ArtifactSpec>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut files = HashSet::new();
        for spec in &specs {
            if !ids.insert(spec.id) {
                return Err(RepoCtxError::config(format!("duplicate artifact id '{}'", spec.id)));
            }
            if !files.insert(spec.file_name) {
                return Err(RepoCtxError::config(format!(
                    "duplicate artifact file name '{}'",
                    spec.file_name
                )));
            }
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[ArtifactSpec] {
        &self.specs
    }

    pub fn get(&self, id: &str) -> Option<&ArtifactSpec> {
        self.specs.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Split into specs to attempt and `Skipped` results for specs above
    /// `max_tier`. Both keep catalog order.
    pub fn select(&self, max_tier: Tier) -> (Vec<ArtifactSpec>, Vec<ArtifactResult>) {
        let mut selected = Vec::new();
        let mut skipped = Vec::new();
        for spec in &self.specs {
            if spec.tier <= max_tier {
                selected.push(*spec);
            } else {
                skipped.push(ArtifactResult::skipped(spec.id, spec.file_name, spec.tier));
            }
        }
        (selected, skipped)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::spec::{RenderContext, RepoMetadata};
    use repoctx_shared::{ArtifactStatus, RepositoryGraph};

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), 10);
        assert!(Catalog::from_specs(catalog.specs().to_vec()).is_ok());
        assert_eq!(catalog.get("rules").unwrap().file_name, ".clinerules");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn select_by_tier() {
        let catalog = Catalog::builtin();

        let (selected, skipped) = catalog.select(Tier::Critical);
        assert_eq!(selected.len(), 4);
        assert!(selected.iter().all(|s| s.tier == Tier::Critical));
        assert_eq!(skipped.len(), 6);
        assert!(skipped.iter().all(|r| r.status == ArtifactStatus::Skipped));
        assert_eq!(skipped[0].spec_id, "architecture");

        let (selected, skipped) = catalog.select(Tier::Enhancement);
        assert_eq!(selected.len(), 10);
        assert!(skipped.is_empty());
    }

    #[test]
    fn duplicates_rejected() {
        let spec = BUILTIN[0];
        let err = Catalog::from_specs(vec![spec, spec]).unwrap_err();
        assert!(err.to_string().contains("duplicate artifact id"));

        let mut other = BUILTIN[1];
        other.file_name = spec.file_name;
        let err = Catalog::from_specs(vec![spec, other]).unwrap_err();
        assert!(err.to_string().contains("duplicate artifact file name"));
    }

    #[test]
    fn every_builtin_renders_an_empty_graph() {
        let ctx = RenderContext::new(
            Arc::new(RepositoryGraph::empty("empty")),
            RepoMetadata {
                repo_id: "empty".into(),
                name: "empty".into(),
                ..Default::default()
            },
            10,
        );
        for spec in Catalog::builtin().specs() {
            let out = (spec.render)(&ctx, None).unwrap();
            assert!(!out.trim().is_empty(), "{} rendered nothing", spec.id);
        }
    }
}
