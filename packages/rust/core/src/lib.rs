//! Core pipeline orchestration for repoctx.
//!
//! This crate ties together collection, graph assembly, artifact
//! scheduling and reporting:
//! - [`assembler`]: fragments → [`repoctx_shared::RepositoryGraph`]
//! - [`scheduler`]: bounded, retrying artifact execution for one repository
//! - [`pipeline`]: one repository end to end
//! - [`batch`]: many repositories, cancellation and resume
//! - [`report`]: `run_report.json` and `INDEX.md`

pub mod assembler;
pub mod batch;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod textgen;
pub mod writer;

pub use batch::{finish_run, run_batch};
pub use pipeline::{BatchProgress, PipelineContext, SilentProgress, process_repo};
pub use report::RunReport;
pub use textgen::TextGenerator;
