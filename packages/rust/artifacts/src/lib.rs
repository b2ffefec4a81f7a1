//! Context Synthesizer: the artifact catalog and its templates.
//!
//! This crate provides:
//! - [`Catalog`]: the ordered set of [`ArtifactSpec`]s and tier selection
//! - [`RenderContext`]: graph, metadata and derived [`RepoAnalysis`]
//! - [`templates`]: pure render functions with documented placeholders

pub mod analysis;
pub mod catalog;
pub mod spec;
pub mod templates;

pub use analysis::RepoAnalysis;
pub use catalog::Catalog;
pub use spec::{ArtifactSpec, PromptFn, RenderContext, RenderFn, RepoMetadata};
