// crates/core/src/loader/mod.rs

//! Agent code loading pipeline: discover, translate, persist, load, invoke.

pub mod descriptor;
pub mod host_functions;
pub mod pipeline;
pub mod translate;

pub use descriptor::{discover, AgentModuleDescriptor, ENTRY_MODULE_NAME};
pub use pipeline::{AgentPipeline, AgentRunReport};
pub use translate::{translate, SourceDialect};
