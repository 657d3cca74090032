// crates/core/src/context.rs

//! Process-wide runtime context.
//!
//! Dynamically loaded agent code has no constructor through which to receive
//! its dependencies, so the worker keeps one context per process. The
//! context is still an ordinary value: the pipeline receives it explicitly
//! and tests build their own with [`RuntimeContext::new`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::capability_client::CapabilityClient;
use crate::config::RuntimeConfig;
use crate::environment::Environment;
use crate::error::{ShimError, ShimResult};
use crate::loader::{AgentPipeline, AgentRunReport};

static GLOBAL: Lazy<Arc<RuntimeContext>> = Lazy::new(|| Arc::new(RuntimeContext::new()));

/// Observable lifecycle phase of a [`RuntimeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    Uninitialized,
    Initializing,
    Initialized,
}

enum ContextState {
    Uninitialized,
    Initializing,
    Initialized {
        thread_id: String,
        client: Arc<dyn CapabilityClient>,
    },
}

/// Handle to a launched agent run; resolves to `None` if the run failed
/// (the failure has already been logged).
pub type AgentRun = JoinHandle<Option<AgentRunReport>>;

pub struct RuntimeContext {
    state: Mutex<ContextState>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ContextState::Uninitialized),
        }
    }

    /// A context that is already initialized and launches nothing; for
    /// hosts that drive [`AgentPipeline`] themselves.
    pub fn with_client(thread_id: impl Into<String>, client: Arc<dyn CapabilityClient>) -> Self {
        Self {
            state: Mutex::new(ContextState::Initialized {
                thread_id: thread_id.into(),
                client,
            }),
        }
    }

    /// The process-wide instance.
    pub fn global() -> Arc<RuntimeContext> {
        GLOBAL.clone()
    }

    pub fn state(&self) -> ContextPhase {
        match &*self.lock() {
            ContextState::Uninitialized => ContextPhase::Uninitialized,
            ContextState::Initializing => ContextPhase::Initializing,
            ContextState::Initialized { .. } => ContextPhase::Initialized,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ContextPhase::Initialized
    }

    /// Initialize from a serialized config and launch the agent at
    /// `agent_entry_path`.
    ///
    /// A second call is a logged no-op returning `Ok(None)`. The agent run
    /// happens on a background task: its failures are logged there and
    /// never surface through this call.
    ///
    /// Must be called from within a tokio runtime; otherwise it fails with
    /// [`ShimError::Config`] and leaves the context uninitialized.
    pub fn initialize(
        self: &Arc<Self>,
        config: &str,
        agent_entry_path: impl AsRef<Path>,
    ) -> ShimResult<Option<AgentRun>> {
        require_runtime()?;
        if !self.begin() {
            tracing::info!("runtime context already initialized; ignoring initialize");
            return Ok(None);
        }

        let built = RuntimeConfig::parse(config).and_then(|config| {
            let client = config.build_client()?;
            Ok((config, client))
        });

        match built {
            Ok((config, client)) => Ok(Some(self.complete(
                config,
                client,
                agent_entry_path.as_ref().to_path_buf(),
            ))),
            Err(error) => {
                *self.lock() = ContextState::Uninitialized;
                Err(error)
            }
        }
    }

    /// Like [`initialize`](Self::initialize) with an already-built client.
    pub fn initialize_with_client(
        self: &Arc<Self>,
        config: RuntimeConfig,
        client: Arc<dyn CapabilityClient>,
        agent_entry_path: impl AsRef<Path>,
    ) -> ShimResult<Option<AgentRun>> {
        require_runtime()?;
        if !self.begin() {
            tracing::info!("runtime context already initialized; ignoring initialize");
            return Ok(None);
        }
        Ok(Some(self.complete(
            config,
            client,
            agent_entry_path.as_ref().to_path_buf(),
        )))
    }

    /// The active capability client.
    pub fn client(&self) -> ShimResult<Arc<dyn CapabilityClient>> {
        match &*self.lock() {
            ContextState::Initialized { client, .. } => Ok(client.clone()),
            _ => Err(ShimError::NotInitialized),
        }
    }

    pub fn thread_id(&self) -> ShimResult<String> {
        match &*self.lock() {
            ContextState::Initialized { thread_id, .. } => Ok(thread_id.clone()),
            _ => Err(ShimError::NotInitialized),
        }
    }

    /// Claim the Uninitialized -> Initializing transition.
    fn begin(&self) -> bool {
        let mut state = self.lock();
        if matches!(*state, ContextState::Uninitialized) {
            *state = ContextState::Initializing;
            true
        } else {
            false
        }
    }

    /// Mark the context initialized, then start the agent run.
    fn complete(
        self: &Arc<Self>,
        config: RuntimeConfig,
        client: Arc<dyn CapabilityClient>,
        entry: PathBuf,
    ) -> AgentRun {
        *self.lock() = ContextState::Initialized {
            thread_id: config.thread_id.clone(),
            client,
        };
        tracing::info!(thread_id = %config.thread_id, "runtime context initialized");

        let environment = Environment::new(self.clone());
        let pipeline = AgentPipeline::from_config(&config);
        tokio::spawn(async move {
            match pipeline.prepare_and_run(&entry, environment).await {
                Ok(report) => {
                    tracing::info!(
                        entry = %entry.display(),
                        invoked = report.invoked,
                        "agent run finished"
                    );
                    Some(report)
                }
                Err(error) => {
                    tracing::error!(entry = %entry.display(), %error, "agent run failed");
                    None
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The agent run is spawned onto the caller's runtime.
fn require_runtime() -> ShimResult<()> {
    Handle::try_current()
        .map(|_| ())
        .map_err(|_| ShimError::Config("initialize must be called within a tokio runtime".into()))
}
