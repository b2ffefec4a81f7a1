//! Shared types, error model, and configuration for repoctx.
//!
//! This crate is the foundation depended on by all other repoctx crates.
//! It provides:
//! - [`RepoCtxError`] and [`ArtifactError`], the error model
//! - Domain types ([`SourceFile`], [`Fragment`], [`RepoJob`], [`BatchRun`], ...)
//! - [`RepositoryGraph`], the per-repository knowledge graph
//! - Configuration ([`AppConfig`], [`BatchConfig`], config loading)

pub mod config;
pub mod error;
pub mod graph;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, BatchSection, FiltersSection, GenerationSection, TextGenSection,
    config_dir, config_file_path, init_config, load_config, load_config_from, textgen_api_key,
};
pub use error::{ArtifactError, RepoCtxError, Result};
pub use graph::RepositoryGraph;
pub use types::{
    ArtifactResult, ArtifactStatus, BatchRun, Entity, EntityId, EntityRef, ExtractionError,
    FileKind, Fragment, GraphSummary, GraphWarning, RawEntity, RawRelationship, Relationship,
    RepoJob, RepoState, RepoTarget, RunId, SourceFile, Tier, kinds, rel,
};
