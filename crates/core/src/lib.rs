// crates/core/src/lib.rs

//! Runtime shim for dynamically loaded agents.
//!
//! An agent is a WebAssembly module (text or binary) that reads thread files,
//! requests completions and posts replies through a [`CapabilityClient`].
//! The shim owns everything around that code: the process-wide
//! [`RuntimeContext`], the loading [`loader::AgentPipeline`], the
//! agent-facing [`Environment`], and, when the worker runs sandboxed, the
//! [`transport`] that proxies capability calls to a supervisor.

pub mod capability_client;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod loader;
pub mod memory;
pub mod remote_client;
pub mod transport;
pub mod types;

pub use capability_client::CapabilityClient;
pub use config::{ClientMode, RuntimeConfig};
pub use context::{AgentRun, ContextPhase, RuntimeContext};
pub use environment::Environment;
pub use error::{LoadStage, ShimError, ShimResult};
pub use loader::{AgentPipeline, AgentRunReport};
pub use memory::{InMemoryCapabilityClient, ThreadFixture};
pub use remote_client::RemoteCapabilityClient;
pub use transport::{CapabilityService, CorrelationTransport, ProxyCapabilityClient};
pub use types::{ChatMessage, CompletionResult, FileRef, Message, SortOrder};
