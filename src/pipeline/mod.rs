//! Staged build pipeline
//!
//! Raw corpus text becomes graph nodes and weighted edges, the edges become
//! dictionaries and sparse vectors, and the vectors go to a clustering
//! consumer. Each step is a `Stage`; the `Orchestrator` plans and runs the
//! enabled ones.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod stage;
mod stages;

pub use config::{ConfigError, PipelineConfig, PipelineParams, RunConfig, TermSelection};
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{ExecutionPlan, InputSource, Orchestrator, PlannedStage, RunReport, StageOutcome};
pub use stage::{Artifact, Stage};
