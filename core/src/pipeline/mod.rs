// quire/src/pipeline/mod.rs

//! Named-step workflow engine. A [`Pipeline`] runs its steps in order, each
//! with `before`, `on` and `after` handlers over a shared [`ContextData`].

pub mod context;
pub mod control;
pub mod definition;
pub mod execution;
pub mod hooks;
pub mod registry;
pub mod step;

pub use context::ContextData;
pub use control::{PipelineControl, PipelineResult};
pub use definition::{Handler, Pipeline};
pub use registry::Workflows;
pub use step::{SkipCondition, StepDef};
